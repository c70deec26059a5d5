use std::rc::Rc;
use log::trace;
use crate::{Config, Error, Result, Value};
use crate::codec::{Overflow, WireCodec, WireMessage};
use crate::request::{AbandonedSends, Request, RequestManager};
use crate::transport::{MessageTransport, Rank, Status, Tag};

/// A group of ranks exchanging values over a transport.
///
/// Point-to-point operations live here; collectives are implemented in the
/// `collective` module on the same type.
pub struct Communicator<T: MessageTransport> {
    manager: Rc<RequestManager<T>>,
    config: Config,
}

impl<T: MessageTransport> Communicator<T> {
    pub fn new(transport: T, config: Config) -> Result<Communicator<T>> {
        Communicator::with_registry(transport, config, AbandonedSends::new())
    }

    /// Create a communicator whose request manager parks abandoned sends in
    /// `registry`.
    pub fn with_registry(
        transport: T,
        config: Config,
        registry: AbandonedSends<T::Handle>,
    ) -> Result<Communicator<T>> {
        config.validate()?;
        let manager = RequestManager::new(transport, config.codec(), registry);
        Ok(Communicator { manager, config })
    }

    pub fn rank(&self) -> Rank {
        self.manager.transport().rank()
    }

    pub fn size(&self) -> usize {
        self.manager.transport().size()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn manager(&self) -> &Rc<RequestManager<T>> {
        &self.manager
    }

    pub(crate) fn transport(&self) -> &T {
        self.manager.transport()
    }

    pub(crate) fn codec(&self) -> &WireCodec {
        self.manager.codec()
    }

    /// Blocking send of the first frame followed by the overflow, if any.
    pub fn send(&self, value: &Value, dest: Rank, tag: Tag) -> Result<()> {
        let codec = self.codec();
        let packed = codec.pack(value)?;
        let frame = packed.message.to_frame(codec.frame_len())?;
        self.transport().send(&frame, dest, tag)?;
        if let Some(overflow) = &packed.overflow {
            self.transport().send(overflow.as_slice(), dest, tag)?;
        }
        trace!("rank {} sent {} to {} tag {}", self.rank(), value.type_name(), dest, tag);
        Ok(())
    }

    /// Blocking receive. The overflow is received from the source and tag
    /// the first frame actually matched, so wildcards are safe.
    pub fn recv(&self, source: Rank, tag: Tag) -> Result<(Value, Status)> {
        let codec = self.codec();
        let (frame, status) = self.transport().recv(codec.frame_len(), source, tag)?;
        let message = WireMessage::from_frame(&frame)?;
        let overflow = match message.header.overflow_len() {
            0 => None,
            len => {
                let (data, _) = self.transport().recv(len, status.source, status.tag)?;
                Some(Overflow::Owned(data))
            }
        };
        let value = codec.unpack(&message, overflow)?;
        Ok((value, status))
    }

    /// Send to `dest` and receive from `source` without deadlocking against
    /// a peer doing the same.
    pub fn sendrecv(
        &self,
        value: &Value,
        dest: Rank,
        send_tag: Tag,
        source: Rank,
        recv_tag: Tag,
    ) -> Result<(Value, Status)> {
        let mut send = self.isend(value, dest, send_tag)?;
        let received = self.recv(source, recv_tag)?;
        send.wait()?;
        Ok(received)
    }

    pub fn isend(&self, value: &Value, dest: Rank, tag: Tag) -> Result<Request<T>> {
        self.manager.post_send(value, dest, tag)
    }

    pub fn irecv(&self, source: Rank, tag: Tag) -> Result<Request<T>> {
        self.manager.post_recv(source, tag)
    }

    pub fn barrier(&self) -> Result<()> {
        self.transport().barrier()
    }

    /// Drain abandoned sends. Returns how many were force-cancelled.
    pub fn shutdown(&self) -> usize {
        self.manager.shutdown()
    }

    /// Ensure `value` is present on the root of a rooted operation.
    pub(crate) fn root_value<'v>(&self, value: Option<&'v Value>, op: &str) -> Result<&'v Value> {
        value.ok_or_else(|| Error::argument(format!("{} root must supply a value", op)))
    }
}
