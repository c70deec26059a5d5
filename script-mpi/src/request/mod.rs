//! Non-blocking requests.
//!
//! A receive is a two step protocol: the first frame says whether a second
//! transfer follows and how large it is, so the overflow receive can only be
//! posted once the first frame has landed. Requests progress lazily, only
//! when they are tested or waited on.
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use log::{debug, trace, warn};
use crate::{Error, Result, Value};
use crate::codec::{Overflow, WireCodec, WireMessage};
use crate::transport::{Completion, MessageTransport, Rank, Status, Tag};

mod batch;
pub use batch::{test_all, test_any, test_some, wait_all, wait_any, wait_some};

/// Sends that were dropped or cancelled before the transport finished them.
///
/// The transport may not be able to cancel a send, so the handles are parked
/// here and force-cancelled once, when the manager shuts down.
pub struct AbandonedSends<H> {
    handles: Vec<H>,
    drained: usize,
}

impl<H> AbandonedSends<H> {
    pub fn new() -> AbandonedSends<H> {
        AbandonedSends {
            handles: vec![],
            drained: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Number of handles released by earlier drains.
    pub fn drained(&self) -> usize {
        self.drained
    }

    fn push(&mut self, handle: H) {
        self.handles.push(handle);
    }

    fn take(&mut self) -> Vec<H> {
        let handles = std::mem::take(&mut self.handles);
        self.drained += handles.len();
        handles
    }
}

impl<H> Default for AbandonedSends<H> {
    fn default() -> AbandonedSends<H> {
        AbandonedSends::new()
    }
}

/// Posts requests and owns the transport they run on.
pub struct RequestManager<T: MessageTransport> {
    transport: T,
    codec: WireCodec,
    abandoned: RefCell<AbandonedSends<T::Handle>>,
}

impl<T: MessageTransport> RequestManager<T> {
    pub fn new(
        transport: T,
        codec: WireCodec,
        abandoned: AbandonedSends<T::Handle>,
    ) -> Rc<RequestManager<T>> {
        Rc::new(RequestManager {
            transport,
            codec,
            abandoned: RefCell::new(abandoned),
        })
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn codec(&self) -> &WireCodec {
        &self.codec
    }

    /// Sends currently parked in the abandoned registry.
    pub fn abandoned(&self) -> usize {
        self.abandoned.borrow().len()
    }

    fn abandon(&self, handle: T::Handle) {
        debug!("rank {} abandoning an unfinished send", self.transport.rank());
        self.abandoned.borrow_mut().push(handle);
    }

    /// Pack `value` and post the first frame, plus the overflow if there is
    /// one. Nothing is sent if packing fails.
    pub fn post_send(self: &Rc<Self>, value: &Value, dest: Rank, tag: Tag) -> Result<Request<T>> {
        let packed = self.codec.pack(value)?;
        let frame = packed.message.to_frame(self.codec.frame_len())?;
        let description = self.transport.isend(&frame, dest, tag)?;
        let payload = match &packed.overflow {
            Some(overflow) => match self.transport.isend(overflow.as_slice(), dest, tag) {
                Ok(handle) => Some(handle),
                Err(err) => {
                    self.abandon(description);
                    return Err(err);
                }
            },
            None => None,
        };
        trace!("rank {} posted send to {} tag {}", self.transport.rank(), dest, tag);
        Ok(Request {
            manager: Rc::clone(self),
            is_send: true,
            state: RequestState::Posted,
            description: Some(description),
            payload,
            first_frame: Some(packed.message),
            resolved: None,
            status: Status::default(),
        })
    }

    /// Post a receive for the first frame only.
    pub fn post_recv(self: &Rc<Self>, source: Rank, tag: Tag) -> Result<Request<T>> {
        let description = self.transport.irecv(self.codec.frame_len(), source, tag)?;
        trace!("rank {} posted receive from {} tag {}", self.transport.rank(), source, tag);
        Ok(Request {
            manager: Rc::clone(self),
            is_send: false,
            state: RequestState::Posted,
            description: Some(description),
            payload: None,
            first_frame: None,
            resolved: None,
            status: Status::default(),
        })
    }

    /// Force-cancel every abandoned send, ignoring errors. Returns how many
    /// handles were released.
    pub fn shutdown(&self) -> usize {
        let handles = self.abandoned.borrow_mut().take();
        let count = handles.len();
        for mut handle in handles {
            if let Err(err) = self.transport.cancel(&mut handle) {
                debug!("ignoring error while cancelling abandoned send: {}", err);
            }
            let _ = self.transport.test(&mut handle);
        }
        if count > 0 {
            debug!("rank {} drained {} abandoned sends", self.transport.rank(), count);
        }
        count
    }
}

impl<T: MessageTransport> Drop for RequestManager<T> {
    fn drop(&mut self) {
        if !self.abandoned.get_mut().is_empty() {
            self.shutdown();
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    Posted,
    /// First frame received, overflow receive posted
    DescriptionReady,
    Complete,
    Cancelled,
    /// Decoding or the transport failed after the request was posted
    Failed,
}

pub struct Request<T: MessageTransport> {
    manager: Rc<RequestManager<T>>,
    is_send: bool,
    state: RequestState,
    description: Option<T::Handle>,
    payload: Option<T::Handle>,
    first_frame: Option<WireMessage>,
    resolved: Option<Value>,
    status: Status,
}

impl<T: MessageTransport> Request<T> {
    pub fn is_send(&self) -> bool {
        self.is_send
    }

    pub fn state(&self) -> RequestState {
        self.state
    }

    /// Status of the last transport completion.
    pub fn status(&self) -> Status {
        self.status
    }

    pub fn test_cancelled(&self) -> bool {
        self.status.cancelled
    }

    /// Whether the received value is available. Not defined for sends.
    pub fn ready(&self) -> Result<bool> {
        if self.is_send {
            return Err(Error::InvalidRequestState("no ready on send request"));
        }
        Ok(self.resolved.is_some())
    }

    /// Resolved value, if the receive has completed.
    pub fn value(&self) -> Option<&Value> {
        self.resolved.as_ref()
    }

    /// Wait if necessary and return the received value.
    pub fn message(&mut self) -> Result<&Value> {
        if self.is_send {
            return Err(Error::InvalidRequestState("no message on send request"));
        }
        if self.resolved.is_none() {
            self.wait()?;
        }
        self.resolved
            .as_ref()
            .ok_or(Error::InvalidRequestState("request was cancelled"))
    }

    /// Take the received value out of a completed request.
    pub fn take_value(&mut self) -> Option<Value> {
        self.resolved.take()
    }

    /// Poll without blocking.
    pub fn test(&mut self) -> Result<(bool, Status)> {
        match self.state {
            RequestState::Complete => return Ok((true, self.status)),
            RequestState::Cancelled => return Ok((false, self.status)),
            RequestState::Failed => return Err(Error::InvalidRequestState("request failed")),
            _ => (),
        }
        let result = if self.is_send {
            self.test_send()
        } else {
            self.test_recv()
        };
        self.fail_on_error(result)?;
        Ok((self.state == RequestState::Complete, self.status))
    }

    fn test_send(&mut self) -> Result<()> {
        let transport = &self.manager.transport;
        for slot in [&mut self.description, &mut self.payload] {
            if let Some(handle) = slot.as_mut() {
                if let Some(done) = transport.test(handle)? {
                    *slot = None;
                    self.status = done.status;
                }
            }
        }
        if self.description.is_none() && self.payload.is_none() {
            self.state = RequestState::Complete;
        }
        Ok(())
    }

    fn test_recv(&mut self) -> Result<()> {
        if self.state == RequestState::Posted {
            let done = match self.description.as_mut() {
                Some(handle) => self.manager.transport.test(handle)?,
                None => None,
            };
            match done {
                Some(done) => self.on_description(done)?,
                None => return Ok(()),
            }
        }
        if self.state == RequestState::DescriptionReady {
            let done = match self.payload.as_mut() {
                Some(handle) => self.manager.transport.test(handle)?,
                None => None,
            };
            if let Some(done) = done {
                self.on_payload(done)?;
            }
        }
        Ok(())
    }

    /// Blocking version of [`test`](Request::test). Returns the cached status
    /// once the request is complete.
    pub fn wait(&mut self) -> Result<Status> {
        let result = self.wait_inner();
        self.fail_on_error(result)?;
        Ok(self.status)
    }

    fn wait_inner(&mut self) -> Result<()> {
        loop {
            match self.state {
                RequestState::Complete | RequestState::Cancelled => return Ok(()),
                RequestState::Failed => return Err(Error::InvalidRequestState("request failed")),
                RequestState::Posted if self.is_send => {
                    let transport = &self.manager.transport;
                    for slot in [&mut self.description, &mut self.payload] {
                        if let Some(mut handle) = slot.take() {
                            self.status = transport.wait(&mut handle)?.status;
                        }
                    }
                    self.state = RequestState::Complete;
                }
                RequestState::Posted => {
                    let mut handle = self
                        .description
                        .take()
                        .ok_or(Error::InvalidRequestState("receive has no pending frame"))?;
                    let done = self.manager.transport.wait(&mut handle)?;
                    self.on_description(done)?;
                }
                RequestState::DescriptionReady => {
                    let mut handle = self
                        .payload
                        .take()
                        .ok_or(Error::InvalidRequestState("receive has no pending overflow"))?;
                    let done = self.manager.transport.wait(&mut handle)?;
                    self.on_payload(done)?;
                }
            }
        }
    }

    fn fail_on_error(&mut self, result: Result<()>) -> Result<()> {
        if result.is_err() {
            self.state = RequestState::Failed;
        }
        result
    }

    /// First frame arrived: decode it now, or post the overflow receive
    /// using the source and tag the frame actually came from.
    fn on_description(&mut self, done: Completion) -> Result<()> {
        self.description = None;
        self.status = done.status;
        if done.status.cancelled {
            self.state = RequestState::Cancelled;
            return Ok(());
        }
        let frame = done.data.unwrap_or_default();
        let message = WireMessage::from_frame(&frame)?;
        let overflow_len = message.header.overflow_len();
        if overflow_len == 0 {
            self.resolved = Some(self.manager.codec.unpack(&message, None)?);
            self.state = RequestState::Complete;
            trace!("receive from {} complete in one frame", self.status.source);
            return Ok(());
        }
        let handle = self
            .manager
            .transport
            .irecv(overflow_len, done.status.source, done.status.tag)?;
        self.payload = Some(handle);
        self.first_frame = Some(message);
        self.state = RequestState::DescriptionReady;
        trace!("receive from {} waiting on {} overflow bytes", self.status.source, overflow_len);
        Ok(())
    }

    fn on_payload(&mut self, done: Completion) -> Result<()> {
        self.payload = None;
        if done.status.cancelled {
            self.status.cancelled = true;
            self.first_frame = None;
            self.state = RequestState::Cancelled;
            return Ok(());
        }
        let message = self
            .first_frame
            .take()
            .ok_or(Error::InvalidRequestState("overflow arrived without a first frame"))?;
        let overflow = done.data.map(Overflow::Owned);
        self.resolved = Some(self.manager.codec.unpack(&message, overflow)?);
        self.state = RequestState::Complete;
        Ok(())
    }

    /// Cancel the request. Finished requests are left untouched.
    pub fn cancel(&mut self) -> Result<()> {
        match self.state {
            RequestState::Complete | RequestState::Cancelled | RequestState::Failed => Ok(()),
            _ if self.is_send => self.cancel_send(),
            _ => {
                let result = self.cancel_recv();
                self.fail_on_error(result)
            }
        }
    }

    fn cancel_send(&mut self) -> Result<()> {
        let manager = Rc::clone(&self.manager);
        if !manager.transport.supports_send_cancel() {
            for handle in [self.description.take(), self.payload.take()].into_iter().flatten() {
                manager.abandon(handle);
            }
            self.status.cancelled = true;
            self.state = RequestState::Cancelled;
            return Ok(());
        }
        let mut cancelled = false;
        for slot in [&mut self.description, &mut self.payload] {
            if let Some(handle) = slot.as_mut() {
                manager.transport.cancel(handle)?;
                if let Some(done) = manager.transport.test(handle)? {
                    cancelled |= done.status.cancelled;
                    *slot = None;
                }
            }
        }
        if self.description.is_none() && self.payload.is_none() {
            self.status.cancelled = cancelled;
            self.state = if cancelled {
                RequestState::Cancelled
            } else {
                RequestState::Complete
            };
        }
        Ok(())
    }

    fn cancel_recv(&mut self) -> Result<()> {
        if self.state == RequestState::Posted {
            let done = match self.description.as_mut() {
                Some(handle) => {
                    self.manager.transport.cancel(handle)?;
                    self.manager.transport.test(handle)?
                }
                None => None,
            };
            match done {
                // Already arrived; fall through and cancel the overflow.
                Some(done) => self.on_description(done)?,
                None => return Ok(()),
            }
        }
        if self.state == RequestState::DescriptionReady {
            let done = match self.payload.as_mut() {
                Some(handle) => {
                    self.manager.transport.cancel(handle)?;
                    self.manager.transport.test(handle)?
                }
                None => None,
            };
            if let Some(done) = done {
                self.on_payload(done)?;
            }
        }
        Ok(())
    }
}

impl<T: MessageTransport> Drop for Request<T> {
    fn drop(&mut self) {
        let pending = [self.description.take(), self.payload.take()];
        if self.is_send {
            for handle in pending.into_iter().flatten() {
                self.manager.abandon(handle);
            }
            return;
        }
        for mut handle in pending.into_iter().flatten() {
            let transport = &self.manager.transport;
            if let Err(err) = transport.cancel(&mut handle) {
                warn!("failed to cancel receive on drop: {}", err);
            }
            let _ = transport.test(&mut handle);
        }
    }
}

impl<T: MessageTransport> fmt::Display for Request<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_send {
            write!(f, "<Request send operation>")
        } else if self.state == RequestState::Complete {
            write!(f, "<Request recv operation: finished>")
        } else {
            write!(f, "<Request recv operation: pending>")
        }
    }
}
