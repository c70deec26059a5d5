//! Collective operations built on the framed point-to-point layer and the
//! transport's native fixed-size collectives.
mod broadcast;
mod gather;
mod op;
mod reduce;
mod scatter;

pub use op::{Operator, ReduceFn};
pub use reduce::{Methodology, ReductionSpec, ValueKind};
