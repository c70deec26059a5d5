//! Operations over sets of requests, built from single-request test and wait.
use std::thread;
use crate::{Error, Result};
use crate::transport::{MessageTransport, Status};
use super::{Request, RequestState};

fn all_cancelled<T: MessageTransport>(requests: &[Request<T>]) -> bool {
    requests.iter().all(|req| req.state() == RequestState::Cancelled)
}

/// First ready request in order, or `None` if nothing is ready yet.
pub fn test_any<T: MessageTransport>(requests: &mut [Request<T>]) -> Result<Option<(usize, Status)>> {
    for (i, req) in requests.iter_mut().enumerate() {
        let (ready, status) = req.test()?;
        if ready {
            return Ok(Some((i, status)));
        }
    }
    Ok(None)
}

/// Every status if all requests are ready, otherwise an empty list.
pub fn test_all<T: MessageTransport>(requests: &mut [Request<T>]) -> Result<Vec<Status>> {
    let mut statuses = Vec::with_capacity(requests.len());
    let mut all_ready = true;
    for req in requests.iter_mut() {
        let (ready, status) = req.test()?;
        all_ready &= ready;
        statuses.push(status);
    }
    if all_ready {
        Ok(statuses)
    } else {
        Ok(vec![])
    }
}

/// Indices and statuses of every request that is ready right now.
pub fn test_some<T: MessageTransport>(requests: &mut [Request<T>]) -> Result<(Vec<usize>, Vec<Status>)> {
    let mut indices = vec![];
    let mut statuses = vec![];
    for (i, req) in requests.iter_mut().enumerate() {
        let (ready, status) = req.test()?;
        if ready {
            indices.push(i);
            statuses.push(status);
        }
    }
    Ok((indices, statuses))
}

/// Poll until one request is ready.
pub fn wait_any<T: MessageTransport>(requests: &mut [Request<T>]) -> Result<(usize, Status)> {
    if requests.is_empty() {
        return Err(Error::EmptyRequestSet);
    }
    loop {
        if let Some(hit) = test_any(requests)? {
            return Ok(hit);
        }
        if all_cancelled(requests) {
            return Err(Error::InvalidRequestState("every request was cancelled"));
        }
        thread::yield_now();
    }
}

/// Wait on each request in order.
pub fn wait_all<T: MessageTransport>(requests: &mut [Request<T>]) -> Result<Vec<Status>> {
    requests.iter_mut().map(|req| req.wait()).collect()
}

/// Poll until at least one request is ready and return all ready ones.
pub fn wait_some<T: MessageTransport>(requests: &mut [Request<T>]) -> Result<(Vec<usize>, Vec<Status>)> {
    loop {
        let (indices, statuses) = test_some(requests)?;
        if !indices.is_empty() || requests.is_empty() || all_cancelled(requests) {
            return Ok((indices, statuses));
        }
        thread::yield_now();
    }
}
