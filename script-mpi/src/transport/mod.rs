//! Transport abstraction.
//!
//! The message layer only needs a small set of byte-buffer primitives from the
//! network: tagged point-to-point transfers (blocking and non-blocking) and a
//! handful of fixed-size collectives. Anything that provides these can carry
//! values.
use crate::{Error, Result};

pub mod local;

pub type Rank = i32;
pub type Tag = i32;

/// Wildcard source for receives.
pub const ANY_SOURCE: Rank = -1;
/// Wildcard tag for receives.
pub const ANY_TAG: Tag = -1;

/// Completion status of a transport operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Status {
    pub source: Rank,
    pub tag: Tag,
    /// Native error code, 0 on success
    pub error: i32,
    /// Number of bytes transferred
    pub count: usize,
    pub cancelled: bool,
}

impl Status {
    pub fn cancelled() -> Status {
        Status {
            cancelled: true,
            ..Status::default()
        }
    }
}

/// Result of a finished non-blocking operation.
#[derive(Debug)]
pub struct Completion {
    pub status: Status,
    /// Received bytes; `None` for sends and cancelled receives
    pub data: Option<Vec<u8>>,
}

/// Named reduction operators understood natively by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReduceOp {
    Max,
    Min,
    Sum,
    Prod,
    LAnd,
    BAnd,
    LOr,
    BOr,
    LXor,
    BXor,
    MinLoc,
    MaxLoc,
}

impl ReduceOp {
    /// Whether this operator pairs each value with its contributing rank.
    pub fn is_location(self) -> bool {
        matches!(self, ReduceOp::MinLoc | ReduceOp::MaxLoc)
    }

    fn is_bitwise(self) -> bool {
        matches!(self, ReduceOp::BAnd | ReduceOp::BOr | ReduceOp::BXor)
    }

    /// Check that the operator is defined for the scalar's type.
    pub fn check_scalar(self, value: Scalar) -> Result<()> {
        match value {
            Scalar::Double(_) if self.is_bitwise() => Err(Error::operator(format!(
                "{:?} is not defined for doubles",
                self,
            ))),
            _ => Ok(()),
        }
    }

    /// Combine two scalar pairs, `a` being the earlier rank.
    pub fn combine(self, a: ScalarPair, b: ScalarPair) -> Result<ScalarPair> {
        let value = match (a.value, b.value) {
            (Scalar::Long(x), Scalar::Long(y)) if self.is_location() => {
                return Ok(pick_location(self, x.cmp(&y), a, b));
            }
            (Scalar::Double(x), Scalar::Double(y)) if self.is_location() => {
                let ord = x
                    .partial_cmp(&y)
                    .ok_or_else(|| Error::operator("cannot order NaN"))?;
                return Ok(pick_location(self, ord, a, b));
            }
            (Scalar::Long(x), Scalar::Long(y)) => {
                Scalar::Long(match self {
                    ReduceOp::Max => x.max(y),
                    ReduceOp::Min => x.min(y),
                    ReduceOp::Sum => x.wrapping_add(y),
                    ReduceOp::Prod => x.wrapping_mul(y),
                    ReduceOp::LAnd => (x != 0 && y != 0) as i64,
                    ReduceOp::LOr => (x != 0 || y != 0) as i64,
                    ReduceOp::LXor => ((x != 0) != (y != 0)) as i64,
                    ReduceOp::BAnd => x & y,
                    ReduceOp::BOr => x | y,
                    ReduceOp::BXor => x ^ y,
                    ReduceOp::MinLoc | ReduceOp::MaxLoc => {
                        return Err(Error::operator(format!("{:?} needs a location pair", self)))
                    }
                })
            }
            (Scalar::Double(x), Scalar::Double(y)) => {
                Scalar::Double(match self {
                    ReduceOp::Max => x.max(y),
                    ReduceOp::Min => x.min(y),
                    ReduceOp::Sum => x + y,
                    ReduceOp::Prod => x * y,
                    ReduceOp::LAnd => (x != 0.0 && y != 0.0) as i64 as f64,
                    ReduceOp::LOr => (x != 0.0 || y != 0.0) as i64 as f64,
                    ReduceOp::LXor => ((x != 0.0) != (y != 0.0)) as i64 as f64,
                    _ => return Err(Error::operator(format!(
                        "{:?} is not defined for doubles",
                        self,
                    ))),
                })
            }
            _ => return Err(Error::operator("mixed scalar types in reduction")),
        };
        Ok(ScalarPair { value, rank: a.rank })
    }
}

/// Select the winning pair of a location reduction. Ties go to the lower rank.
fn pick_location(
    op: ReduceOp,
    ord: std::cmp::Ordering,
    a: ScalarPair,
    b: ScalarPair,
) -> ScalarPair {
    use std::cmp::Ordering::*;
    let take_b = match (op, ord) {
        (ReduceOp::MinLoc, Greater) | (ReduceOp::MaxLoc, Less) => true,
        (_, Equal) => b.rank < a.rank,
        _ => false,
    };
    if take_b { b } else { a }
}

/// Primitive value for native reductions.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Scalar {
    Long(i64),
    Double(f64),
}

/// A value paired with the rank that contributed it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScalarPair {
    pub value: Scalar,
    pub rank: Rank,
}

/// Point-to-point and collective primitives over raw byte buffers.
///
/// Non-blocking operations return a handle that is progressed with
/// [`test`](MessageTransport::test) or [`wait`](MessageTransport::wait). A
/// handle yields its completion exactly once.
pub trait MessageTransport {
    type Handle;

    fn rank(&self) -> Rank;

    fn size(&self) -> usize;

    /// Whether a posted send can be cancelled before it is matched.
    fn supports_send_cancel(&self) -> bool;

    fn send(&self, buf: &[u8], dest: Rank, tag: Tag) -> Result<()>;

    /// Receive at most `len` bytes.
    fn recv(&self, len: usize, source: Rank, tag: Tag) -> Result<(Vec<u8>, Status)>;

    fn isend(&self, buf: &[u8], dest: Rank, tag: Tag) -> Result<Self::Handle>;

    fn irecv(&self, len: usize, source: Rank, tag: Tag) -> Result<Self::Handle>;

    /// Poll a handle without blocking.
    fn test(&self, handle: &mut Self::Handle) -> Result<Option<Completion>>;

    fn wait(&self, handle: &mut Self::Handle) -> Result<Completion>;

    /// Cancel an outstanding operation. Cancelling a finished one does nothing.
    fn cancel(&self, handle: &mut Self::Handle) -> Result<()>;

    fn barrier(&self) -> Result<()>;

    /// Broadcast `len` bytes from `root`. The root passes its buffer and gets
    /// `None` back; every other rank gets the received bytes.
    fn bcast(&self, buf: Option<&[u8]>, len: usize, root: Rank) -> Result<Option<Vec<u8>>>;

    /// Gather equal-sized buffers to `root` in rank order.
    fn gather(&self, send: &[u8], root: Rank) -> Result<Option<Vec<u8>>>;

    /// Gather variable-sized buffers. Only the root supplies `counts`.
    fn gatherv(&self, send: &[u8], counts: Option<&[usize]>, root: Rank) -> Result<Option<Vec<u8>>>;

    fn allgather(&self, send: &[u8]) -> Result<Vec<u8>>;

    fn reduce(&self, input: ScalarPair, op: ReduceOp, root: Rank) -> Result<Option<ScalarPair>>;

    fn allreduce(&self, input: ScalarPair, op: ReduceOp) -> Result<ScalarPair>;

    /// Inclusive prefix reduction.
    fn scan(&self, input: ScalarPair, op: ReduceOp) -> Result<ScalarPair>;
}

/// Check that `root` names a rank of a communicator of `size` ranks.
pub fn check_root(root: Rank, size: usize) -> Result<usize> {
    if root < 0 || root as usize >= size {
        Err(Error::InvalidRoot { root, size })
    } else {
        Ok(root as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn long(v: i64, rank: Rank) -> ScalarPair {
        ScalarPair { value: Scalar::Long(v), rank }
    }

    #[test]
    fn test_combine_long() {
        assert_eq!(ReduceOp::Sum.combine(long(2, 0), long(5, 1)).unwrap().value, Scalar::Long(7));
        assert_eq!(ReduceOp::BXor.combine(long(6, 0), long(3, 1)).unwrap().value, Scalar::Long(5));
        assert_eq!(ReduceOp::LAnd.combine(long(6, 0), long(0, 1)).unwrap().value, Scalar::Long(0));
    }

    #[test]
    fn test_location_ties_pick_lower_rank() {
        let r = ReduceOp::MaxLoc.combine(long(4, 2), long(4, 1)).unwrap();
        assert_eq!(r, long(4, 1));
        let r = ReduceOp::MinLoc.combine(long(4, 0), long(1, 3)).unwrap();
        assert_eq!(r, long(1, 3));
    }

    #[test]
    fn test_bitwise_double_rejected() {
        assert!(ReduceOp::BAnd.check_scalar(Scalar::Double(1.0)).is_err());
        assert!(ReduceOp::Sum.check_scalar(Scalar::Double(1.0)).is_ok());
        let a = ScalarPair { value: Scalar::Double(1.0), rank: 0 };
        assert!(ReduceOp::BOr.combine(a, a).is_err());
    }

    #[test]
    fn test_location_on_doubles() {
        let a = ScalarPair { value: Scalar::Double(2.5), rank: 0 };
        let b = ScalarPair { value: Scalar::Double(7.0), rank: 1 };
        assert_eq!(ReduceOp::MaxLoc.combine(a, b).unwrap(), b);
        assert_eq!(ReduceOp::MinLoc.combine(a, b).unwrap(), a);
        let nan = ScalarPair { value: Scalar::Double(f64::NAN), rank: 2 };
        assert!(ReduceOp::MaxLoc.combine(a, nan).is_err());
    }

    #[test]
    fn test_check_root() {
        assert_eq!(check_root(2, 4).unwrap(), 2);
        assert!(check_root(4, 4).is_err());
        assert!(check_root(-1, 4).is_err());
    }
}
