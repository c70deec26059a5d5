use log::debug;
use crate::{Result, Value};
use crate::communicator::Communicator;
use crate::transport::{check_root, MessageTransport, Rank};

impl<T: MessageTransport> Communicator<T> {
    /// Split a sequence held by `root` into near-equal contiguous slices, one
    /// per rank. The first `len % size` ranks get one extra element. A slice
    /// that cannot be taken is delivered as `None`.
    pub fn scatter(&self, value: Option<&Value>, root: Rank) -> Result<Value> {
        check_root(root, self.size())?;
        let tag = self.config().scatter_tag;
        if self.rank() != root {
            return self.recv(root, tag).map(|(value, _)| value);
        }
        let value = self.root_value(value, "scatter")?;
        let size = self.size();
        let len = value.len().unwrap_or(0);
        let per_process = len / size;
        let extras = len % size;

        let mut mine = Value::None;
        let mut start = 0;
        for rank in 0..size {
            let count = per_process + usize::from(rank < extras);
            let slice = value.slice(start, start + count).unwrap_or_else(|err| {
                debug!("scatter slice for rank {} failed: {}", rank, err);
                Value::None
            });
            start += count;
            if rank as Rank == root {
                mine = slice;
            } else {
                self.send(&slice, rank as Rank, tag)?;
            }
        }
        Ok(mine)
    }
}
