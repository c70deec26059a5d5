use std::cell::Cell;
use std::thread;
use script_mpi::{
    test_all, test_any, test_some, wait_all, wait_any, wait_some, Communicator, Config, Error,
    LocalCluster, LocalTransport, MessageTransport, Rank, ReduceOp, Request, RequestState,
    Status, Tag, Value,
};
use script_mpi::transport::{Completion, ScalarPair};

mod common;
use common::{cluster, run_ranks, run_with};

/// Local transport that counts blocking waits.
struct Counting {
    inner: LocalTransport,
    waits: Cell<usize>,
}

impl MessageTransport for Counting {
    type Handle = <LocalTransport as MessageTransport>::Handle;

    fn rank(&self) -> Rank {
        self.inner.rank()
    }

    fn size(&self) -> usize {
        self.inner.size()
    }

    fn supports_send_cancel(&self) -> bool {
        self.inner.supports_send_cancel()
    }

    fn send(&self, buf: &[u8], dest: Rank, tag: Tag) -> script_mpi::Result<()> {
        self.inner.send(buf, dest, tag)
    }

    fn recv(&self, len: usize, source: Rank, tag: Tag) -> script_mpi::Result<(Vec<u8>, Status)> {
        self.inner.recv(len, source, tag)
    }

    fn isend(&self, buf: &[u8], dest: Rank, tag: Tag) -> script_mpi::Result<Self::Handle> {
        self.inner.isend(buf, dest, tag)
    }

    fn irecv(&self, len: usize, source: Rank, tag: Tag) -> script_mpi::Result<Self::Handle> {
        self.inner.irecv(len, source, tag)
    }

    fn test(&self, handle: &mut Self::Handle) -> script_mpi::Result<Option<Completion>> {
        self.inner.test(handle)
    }

    fn wait(&self, handle: &mut Self::Handle) -> script_mpi::Result<Completion> {
        self.waits.set(self.waits.get() + 1);
        self.inner.wait(handle)
    }

    fn cancel(&self, handle: &mut Self::Handle) -> script_mpi::Result<()> {
        self.inner.cancel(handle)
    }

    fn barrier(&self) -> script_mpi::Result<()> {
        self.inner.barrier()
    }

    fn bcast(&self, buf: Option<&[u8]>, len: usize, root: Rank) -> script_mpi::Result<Option<Vec<u8>>> {
        self.inner.bcast(buf, len, root)
    }

    fn gather(&self, send: &[u8], root: Rank) -> script_mpi::Result<Option<Vec<u8>>> {
        self.inner.gather(send, root)
    }

    fn gatherv(
        &self,
        send: &[u8],
        counts: Option<&[usize]>,
        root: Rank,
    ) -> script_mpi::Result<Option<Vec<u8>>> {
        self.inner.gatherv(send, counts, root)
    }

    fn allgather(&self, send: &[u8]) -> script_mpi::Result<Vec<u8>> {
        self.inner.allgather(send)
    }

    fn reduce(&self, input: ScalarPair, op: ReduceOp, root: Rank) -> script_mpi::Result<Option<ScalarPair>> {
        self.inner.reduce(input, op, root)
    }

    fn allreduce(&self, input: ScalarPair, op: ReduceOp) -> script_mpi::Result<ScalarPair> {
        self.inner.allreduce(input, op)
    }

    fn scan(&self, input: ScalarPair, op: ReduceOp) -> script_mpi::Result<ScalarPair> {
        self.inner.scan(input, op)
    }
}

fn single<R, F>(cluster: LocalCluster, f: F) -> R
where
    R: Send,
    F: Fn(Communicator<LocalTransport>) -> script_mpi::Result<R> + Sync,
{
    run_with(cluster, Config::default(), f).pop().unwrap()
}

#[test]
fn wait_is_idempotent() {
    let transports = cluster(2).build();
    thread::scope(|s| {
        for inner in transports {
            s.spawn(move || {
                let transport = Counting { inner, waits: Cell::new(0) };
                let comm = Communicator::new(transport, Config::default()).unwrap();
                let big = Value::bytes(vec![7u8; 2000]);
                if comm.rank() == 0 {
                    comm.isend(&big, 1, 2).unwrap().wait().unwrap();
                    return;
                }
                let mut req = comm.irecv(0, 2).unwrap();
                let first = req.wait().unwrap();
                let waits = comm.manager().transport().waits.get();
                assert_eq!(waits, 2);
                let second = req.wait().unwrap();
                assert_eq!(first, second);
                assert_eq!(comm.manager().transport().waits.get(), waits);
                assert_eq!(req.test().unwrap(), (true, first));
                assert_eq!(req.message().unwrap(), &big);
                assert_eq!(req.state(), RequestState::Complete);
            });
        }
    });
}

#[test]
fn wait_any_rejects_an_empty_set() {
    let mut none: Vec<Request<LocalTransport>> = vec![];
    assert_eq!(wait_any(&mut none).unwrap_err(), Error::EmptyRequestSet);
    assert!(wait_all(&mut none).unwrap().is_empty());
    assert_eq!(wait_some(&mut none).unwrap(), (vec![], vec![]));
}

#[test]
fn partial_readiness() {
    let results = run_ranks(2, |comm| {
        if comm.rank() == 0 {
            comm.send(&Value::str("first"), 1, 1)?;
            comm.barrier()?;
            comm.barrier()?;
            comm.send(&Value::str("second"), 1, 2)?;
            return Ok(vec![]);
        }
        let mut requests = vec![comm.irecv(0, 1)?, comm.irecv(0, 2)?];
        comm.barrier()?;
        assert!(test_all(&mut requests)?.is_empty());
        let (index, status) = test_any(&mut requests)?.unwrap();
        assert_eq!((index, status.tag), (0, 1));
        let (indices, _) = test_some(&mut requests)?;
        assert_eq!(indices, vec![0]);
        comm.barrier()?;
        let statuses = wait_all(&mut requests)?;
        Ok(statuses.iter().map(|s| s.tag).collect())
    });
    assert_eq!(results[1], vec![1, 2]);
}

#[test]
fn wait_any_returns_the_ready_request() {
    let index = single(cluster(1), |comm| {
        let mut requests = vec![comm.irecv(0, 1)?, comm.irecv(0, 2)?];
        comm.send(&Value::Int(2), 0, 2)?;
        let (index, status) = wait_any(&mut requests)?;
        assert_eq!(status.tag, 2);
        assert_eq!(requests[index].message()?, &Value::Int(2));
        requests[0].cancel()?;
        Ok(index)
    });
    assert_eq!(index, 1);
}

#[test]
fn cancel_before_completion() {
    single(cluster(1), |comm| {
        let mut req = comm.irecv(0, 9)?;
        req.cancel()?;
        let (done, status) = req.test()?;
        assert!(!done);
        assert!(status.cancelled);
        assert!(req.test_cancelled());
        assert!(req.wait()?.cancelled);
        assert!(req.message().is_err());
        assert!(!req.ready()?);
        Ok(())
    });
}

#[test]
fn cancel_after_completion_keeps_the_value() {
    single(cluster(1), |comm| {
        comm.send(&Value::Int(5), 0, 1)?;
        let mut req = comm.irecv(0, 1)?;
        req.wait()?;
        req.cancel()?;
        let (done, status) = req.test()?;
        assert!(done);
        assert!(!status.cancelled);
        assert_eq!(req.message()?, &Value::Int(5));
        Ok(())
    });
}

#[test]
fn cancel_receive_between_frames() {
    single(cluster(1), |comm| {
        // Deliver only the first frame so the overflow receive stays posted.
        let codec = comm.manager().codec();
        let big = Value::bytes(vec![1u8; 4096]);
        let packed = codec.pack(&big)?;
        let frame = packed.message.to_frame(codec.frame_len())?;
        comm.manager().transport().send(&frame, 0, 3)?;

        let mut recv = comm.irecv(0, 3)?;
        assert!(!recv.test()?.0);
        assert_eq!(recv.state(), RequestState::DescriptionReady);
        recv.cancel()?;
        assert!(recv.test_cancelled());
        assert_eq!(recv.state(), RequestState::Cancelled);
        assert!(recv.value().is_none());
        Ok(())
    });
}

#[test]
fn dropped_sends_are_abandoned_until_shutdown() {
    let counts = single(cluster(1), |comm| {
        let big = Value::bytes(vec![0u8; 5000]);
        drop(comm.isend(&big, 0, 4)?);
        let after_drop = comm.manager().abandoned();

        let mut req = comm.isend(&Value::Int(1), 0, 5)?;
        req.cancel()?;
        assert!(req.test_cancelled());
        assert_eq!(req.test()?, (false, req.status()));
        let after_cancel = comm.manager().abandoned();

        let drained = comm.shutdown();
        Ok((after_drop, after_cancel, drained, comm.manager().abandoned()))
    });
    assert_eq!(counts, (2, 3, 3, 0));
}

#[test]
fn withdrawn_send_is_never_received() {
    single(cluster(1).eager_threshold(0).send_cancel(true), |comm| {
        let mut send = comm.isend(&Value::Int(11), 0, 6)?;
        send.cancel()?;
        assert!(send.test_cancelled());
        let mut recv = comm.irecv(0, 6)?;
        assert!(!recv.test()?.0);
        recv.cancel()?;
        Ok(())
    });
}

#[test]
fn two_phase_receive_completes_after_overflow() {
    let value = single(cluster(1).eager_threshold(0), |comm| {
        let mut requests = vec![
            comm.irecv(0, 8)?,
            comm.isend(&Value::bytes(vec![3u8; 3000]), 0, 8)?,
        ];
        let statuses = wait_all(&mut requests)?;
        assert_eq!(statuses[0].source, 0);
        Ok(requests[0].take_value())
    });
    assert_eq!(value, Some(Value::bytes(vec![3u8; 3000])));
}

#[test]
fn accessors_and_display() {
    single(cluster(1), |comm| {
        let mut send = comm.isend(&Value::str("x"), 0, 1)?;
        assert!(send.is_send());
        assert_eq!(send.to_string(), "<Request send operation>");
        assert!(matches!(send.ready(), Err(Error::InvalidRequestState(_))));
        assert!(send.message().is_err());
        send.wait()?;

        let mut recv = comm.irecv(0, 1)?;
        assert!(!recv.is_send());
        assert_eq!(recv.to_string(), "<Request recv operation: pending>");
        recv.wait()?;
        assert!(recv.ready()?);
        assert_eq!(recv.to_string(), "<Request recv operation: finished>");
        Ok(())
    });
}
