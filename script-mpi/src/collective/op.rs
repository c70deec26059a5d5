use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;
use crate::{Error, Result, Value};
use crate::transport::ReduceOp;

/// User supplied reduction function, applied as `f(mine, theirs)`.
pub type ReduceFn = Arc<dyn Fn(&Value, &Value) -> Result<Value> + Send + Sync>;

/// Reduction operator: a named native operation or an arbitrary function.
#[derive(Clone)]
pub enum Operator {
    Native(ReduceOp),
    Function(ReduceFn),
}

impl Operator {
    pub fn function<F>(f: F) -> Operator
    where
        F: Fn(&Value, &Value) -> Result<Value> + Send + Sync + 'static,
    {
        Operator::Function(Arc::new(f))
    }

    pub fn apply(&self, a: &Value, b: &Value) -> Result<Value> {
        match self {
            Operator::Native(op) => op.apply(a, b),
            Operator::Function(f) => f(a, b),
        }
    }

    pub fn is_location(&self) -> bool {
        matches!(self, Operator::Native(op) if op.is_location())
    }
}

impl From<ReduceOp> for Operator {
    fn from(op: ReduceOp) -> Operator {
        Operator::Native(op)
    }
}

impl fmt::Debug for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operator::Native(op) => write!(f, "Native({:?})", op),
            Operator::Function(_) => write!(f, "Function"),
        }
    }
}

impl ReduceOp {
    /// Apply the operator to two arbitrary values.
    pub fn apply(self, a: &Value, b: &Value) -> Result<Value> {
        match self {
            ReduceOp::Max => Ok((if b.compare(a)? == Ordering::Greater { b } else { a }).clone()),
            ReduceOp::Min => Ok((if b.compare(a)? == Ordering::Less { b } else { a }).clone()),
            ReduceOp::Sum => a.add(b),
            ReduceOp::Prod => a.mul(b),
            ReduceOp::LAnd => Ok(flag(a.truthy() && b.truthy())),
            ReduceOp::LOr => Ok(flag(a.truthy() || b.truthy())),
            ReduceOp::LXor => Ok(flag(a.truthy() != b.truthy())),
            ReduceOp::BAnd => bitwise(a, b, "&", |x, y| x & y),
            ReduceOp::BOr => bitwise(a, b, "|", |x, y| x | y),
            ReduceOp::BXor => bitwise(a, b, "^", |x, y| x ^ y),
            ReduceOp::MinLoc | ReduceOp::MaxLoc => location(self, a, b),
        }
    }
}

fn flag(b: bool) -> Value {
    Value::Int(b as i64)
}

fn bitwise(a: &Value, b: &Value, name: &str, f: fn(i64, i64) -> i64) -> Result<Value> {
    match (a.as_int(), b.as_int()) {
        (Some(x), Some(y)) => Ok(Value::Int(f(x, y))),
        _ => Err(Error::operator(format!(
            "unsupported operand types for {}: {} and {}",
            name,
            a.type_name(),
            b.type_name(),
        ))),
    }
}

/// Compare the first element of two `(value, rank)` tuples. Ties keep `a`.
fn location(op: ReduceOp, a: &Value, b: &Value) -> Result<Value> {
    let (x, y) = match (a, b) {
        (Value::Tuple(x), Value::Tuple(y)) if !x.is_empty() && !y.is_empty() => (&x[0], &y[0]),
        _ => {
            return Err(Error::operator(format!(
                "{:?} needs (value, rank) tuples",
                op,
            )))
        }
    };
    let take_b = matches!(
        (op, x.compare(y)?),
        (ReduceOp::MinLoc, Ordering::Greater) | (ReduceOp::MaxLoc, Ordering::Less)
    );
    Ok(if take_b { b.clone() } else { a.clone() })
}
