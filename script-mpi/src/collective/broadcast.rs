use log::debug;
use crate::{Error, Result, Value};
use crate::codec::{Overflow, WireMessage};
use crate::communicator::Communicator;
use crate::transport::{check_root, MessageTransport, Rank};

impl<T: MessageTransport> Communicator<T> {
    /// Broadcast a value from `root`. The root gets its own value back; the
    /// argument is ignored on every other rank.
    pub fn bcast(&self, value: Option<Value>, root: Rank) -> Result<Value> {
        check_root(root, self.size())?;
        let codec = self.codec();
        let transport = self.transport();
        if self.rank() == root {
            let value = value
                .ok_or_else(|| Error::argument("broadcast root must supply a value"))?;
            {
                let packed = codec.pack(&value)?;
                let frame = packed.message.to_frame(codec.frame_len())?;
                transport.bcast(Some(&frame), frame.len(), root)?;
                if let Some(overflow) = &packed.overflow {
                    transport.bcast(Some(overflow.as_slice()), overflow.len(), root)?;
                }
                debug!(
                    "broadcast {} from root {} ({} overflow bytes)",
                    value.type_name(),
                    root,
                    packed.overflow.as_ref().map_or(0, |o| o.len()),
                );
            }
            return Ok(value);
        }
        let frame = transport
            .bcast(None, codec.frame_len(), root)?
            .ok_or_else(|| Error::transport("broadcast delivered no frame"))?;
        let message = WireMessage::from_frame(&frame)?;
        let overflow = match message.header.overflow_len() {
            0 => None,
            len => {
                let data = transport
                    .bcast(None, len, root)?
                    .ok_or_else(|| Error::transport("broadcast delivered no overflow"))?;
                Some(Overflow::Owned(data))
            }
        };
        codec.unpack(&message, overflow)
    }
}
