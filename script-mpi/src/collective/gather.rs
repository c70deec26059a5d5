use log::debug;
use crate::{Error, Result, Value};
use crate::codec::{Overflow, WireMessage};
use crate::communicator::Communicator;
use crate::transport::{check_root, MessageTransport, Rank};
use crate::value::NdArray;

impl<T: MessageTransport> Communicator<T> {
    /// Gather the first `count` items of every rank's sequence to `root`
    /// and concatenate them in rank order. A negative `count` takes the
    /// whole sequence. Non-root ranks get `None`.
    ///
    /// First frames are gathered with the fixed-size native gather; their
    /// headers give the overflow lengths for a single variable-size gather.
    pub fn gather(&self, value: &Value, count: isize, root: Rank) -> Result<Value> {
        check_root(root, self.size())?;
        let mut items = value.clone().into_items()?;
        if count >= 0 {
            let count = count as usize;
            if items.len() < count {
                return Err(Error::argument(format!(
                    "sequence of length {} is shorter than count {}",
                    items.len(),
                    count,
                )));
            }
            items.truncate(count);
        }
        let local = Value::List(items);

        let codec = self.codec();
        let transport = self.transport();
        let packed = codec.pack(&local)?;
        let frame = packed.message.to_frame(codec.frame_len())?;
        let empty: &[u8] = &[];
        let overflow = packed.overflow.as_ref().map_or(empty, |o| o.as_slice());

        let frames = match transport.gather(&frame, root)? {
            Some(frames) => frames,
            None => {
                transport.gatherv(overflow, None, root)?;
                return Ok(Value::None);
            }
        };
        let messages = frames
            .chunks_exact(codec.frame_len())
            .map(WireMessage::from_frame)
            .collect::<Result<Vec<_>>>()?;
        let counts: Vec<usize> = messages.iter().map(|m| m.header.overflow_len()).collect();
        let overflows = transport
            .gatherv(overflow, Some(&counts), root)?
            .ok_or_else(|| Error::transport("gatherv delivered nothing to the root"))?;
        debug!(
            "gathered {} frames and {} overflow bytes on root {}",
            messages.len(),
            overflows.len(),
            root,
        );

        let mut out = vec![];
        let mut offset = 0;
        for (message, len) in messages.iter().zip(counts) {
            let part = match len {
                0 => None,
                len => Some(Overflow::Borrowed(&overflows[offset..offset + len])),
            };
            offset += len;
            match codec.unpack(message, part)? {
                Value::List(items) => out.extend(items),
                other => {
                    return Err(Error::DeserializationFailed(format!(
                        "gathered a {} instead of a list",
                        other.type_name(),
                    )))
                }
            }
        }
        Ok(Value::List(out))
    }

    /// Gather to rank 0, then broadcast the combined sequence to everyone.
    pub fn allgather(&self, value: &Value, count: isize) -> Result<Value> {
        let gathered = self.gather(value, count, 0)?;
        let root_value = if self.rank() == 0 { Some(gathered) } else { None };
        self.bcast(root_value, 0)
    }

    /// Gather equally sized arrays with the native gather and concatenate
    /// them along the leading axis on `root`.
    pub fn gather_native(&self, array: &NdArray, root: Rank) -> Result<Option<NdArray>> {
        check_root(root, self.size())?;
        match self.transport().gather(array.as_bytes(), root)? {
            Some(data) => stacked(array, self.size(), data).map(Some),
            None => Ok(None),
        }
    }

    pub fn allgather_native(&self, array: &NdArray) -> Result<NdArray> {
        let data = self.transport().allgather(array.as_bytes())?;
        stacked(array, self.size(), data)
    }
}

/// Shape of `size` copies of `local` stacked along the leading axis.
fn stacked(local: &NdArray, size: usize, data: Vec<u8>) -> Result<NdArray> {
    let mut shape = local.shape().to_vec();
    match shape.first_mut() {
        Some(rows) => *rows *= size,
        None => shape.push(size),
    }
    NdArray::from_raw(local.dtype(), shape, data)
}
