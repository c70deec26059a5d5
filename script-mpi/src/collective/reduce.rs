//! Reduce, all-reduce and scan.
//!
//! One entry point, [`Communicator::reduction`], picks between three
//! strategies:
//!
//! * native: named operator on an int or double with no ground value; the
//!   transport reduces a `(value, rank)` pair without any serialization
//! * tree: binomial tree over framed point-to-point messages
//! * generic: gather every value to the root, fold there in rank order and
//!   distribute the result
//!
//! Operator failures in the tree and generic strategies are held back until
//! the communication pattern has finished, so no rank is left waiting on a
//! message that will never come.
use log::debug;
use crate::{Error, Result, Value};
use crate::communicator::Communicator;
use crate::transport::{check_root, MessageTransport, Rank, ReduceOp, Scalar, ScalarPair};
use super::op::Operator;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Methodology {
    ReduceToRoot,
    ReduceAndBroadcast,
    ReduceViaScan,
}

/// Primitive type hint that enables the native strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Int,
    Double,
}

/// Parameters of a reduction.
#[derive(Debug, Clone)]
pub struct ReductionSpec {
    pub operator: Operator,
    pub root: Rank,
    /// Initial value folded in before rank 0's contribution
    pub ground: Option<Value>,
    pub value_kind: Option<ValueKind>,
    /// Prefer the binomial tree over gathering to the root
    pub tree_order: bool,
}

impl ReductionSpec {
    pub fn new(operator: impl Into<Operator>) -> ReductionSpec {
        ReductionSpec {
            operator: operator.into(),
            root: 0,
            ground: None,
            value_kind: None,
            tree_order: false,
        }
    }

    pub fn root(mut self, root: Rank) -> ReductionSpec {
        self.root = root;
        self
    }

    pub fn ground(mut self, ground: Value) -> ReductionSpec {
        self.ground = Some(ground);
        self
    }

    pub fn kind(mut self, kind: ValueKind) -> ReductionSpec {
        self.value_kind = Some(kind);
        self
    }

    pub fn tree(mut self, tree_order: bool) -> ReductionSpec {
        self.tree_order = tree_order;
        self
    }

    fn native(&self) -> Option<(ReduceOp, ValueKind)> {
        match (&self.operator, self.value_kind, &self.ground) {
            (Operator::Native(op), Some(kind), None) => Some((*op, kind)),
            _ => None,
        }
    }
}

impl<T: MessageTransport> Communicator<T> {
    /// Reduce to `spec.root`; other ranks get `None`.
    pub fn reduce(&self, value: &Value, spec: &ReductionSpec) -> Result<Value> {
        self.reduction(value, spec, Methodology::ReduceToRoot)
    }

    pub fn allreduce(&self, value: &Value, spec: &ReductionSpec) -> Result<Value> {
        self.reduction(value, spec, Methodology::ReduceAndBroadcast)
    }

    /// Inclusive prefix reduction in rank order.
    pub fn scan(&self, value: &Value, spec: &ReductionSpec) -> Result<Value> {
        self.reduction(value, spec, Methodology::ReduceViaScan)
    }

    pub fn reduction(&self, value: &Value, spec: &ReductionSpec, method: Methodology) -> Result<Value> {
        check_root(spec.root, self.size())?;
        if let Some((op, kind)) = spec.native() {
            debug!("{:?} with native {:?} on {:?}", method, op, kind);
            return self.reduce_native(value, op, kind, spec.root, method);
        }
        let tree = spec.tree_order
            && spec.ground.is_none()
            && !spec.operator.is_location()
            && method != Methodology::ReduceViaScan;
        if tree {
            debug!("{:?} with tree order", method);
            self.reduce_tree(value, spec, method)
        } else {
            debug!("{:?} on root {}", method, spec.root);
            self.reduce_generic(value, spec, method)
        }
    }

    fn reduce_native(
        &self,
        value: &Value,
        op: ReduceOp,
        kind: ValueKind,
        root: Rank,
        method: Methodology,
    ) -> Result<Value> {
        let scalar = match kind {
            ValueKind::Int => value
                .as_int()
                .or_else(|| value.as_float().map(|x| x as i64))
                .map(Scalar::Long),
            ValueKind::Double => value.as_float().map(Scalar::Double),
        }
        .ok_or_else(|| {
            Error::argument(format!("cannot reduce a {} as {:?}", value.type_name(), kind))
        })?;
        let pair = ScalarPair {
            value: scalar,
            rank: self.rank(),
        };
        let transport = self.transport();
        let result = match method {
            Methodology::ReduceToRoot => transport.reduce(pair, op, root)?,
            Methodology::ReduceAndBroadcast => Some(transport.allreduce(pair, op)?),
            Methodology::ReduceViaScan => Some(transport.scan(pair, op)?),
        };
        Ok(match result {
            Some(pair) => pair_value(pair, op),
            None => Value::None,
        })
    }

    /// Binomial tree. Ranks are renumbered relative to the root; at each
    /// step a rank with the mask bit set hands its partial result to its
    /// parent and drops out, the others fold in their child's partial.
    fn reduce_tree(&self, value: &Value, spec: &ReductionSpec, method: Methodology) -> Result<Value> {
        let size = self.size() as Rank;
        let rank = self.rank();
        let root = spec.root;
        let tag = self.config().tree_tag;
        let wrapped = (rank - root).rem_euclid(size);

        let mut partial = value.clone();
        let mut failure: Option<Error> = None;
        let mut mask = 1;
        while mask < size {
            if wrapped & mask != 0 {
                let parent = ((wrapped & !mask) + root) % size;
                self.send(&partial, parent, tag)?;
                break;
            }
            let child = wrapped | mask;
            if child < size {
                let (theirs, _) = self.recv((child + root) % size, tag)?;
                if failure.is_none() {
                    match spec.operator.apply(&partial, &theirs) {
                        Ok(folded) => partial = folded,
                        Err(err) => {
                            failure = Some(err);
                            partial = Value::None;
                        }
                    }
                }
            }
            mask <<= 1;
        }

        let result = match method {
            Methodology::ReduceAndBroadcast => {
                let mine = if rank == root { Some(partial) } else { None };
                self.bcast(mine, root)?
            }
            _ if rank == root => partial,
            _ => Value::None,
        };
        match failure {
            Some(err) => Err(err),
            None => Ok(result),
        }
    }

    fn reduce_generic(&self, value: &Value, spec: &ReductionSpec, method: Methodology) -> Result<Value> {
        let root = spec.root;
        let data = self.collect_to_root(value, spec.operator.is_location(), root)?;
        let mut failure: Option<Error> = None;

        let result = match method {
            Methodology::ReduceViaScan => match data {
                Some(values) => self.distribute_scan(values, spec, &mut failure)?,
                None => self.recv(root, self.config().collective_tag)?.0,
            },
            _ => {
                let folded = data.map(|values| {
                    fold(&spec.operator, spec.ground.clone(), values).unwrap_or_else(|err| {
                        failure = Some(err);
                        Value::None
                    })
                });
                if method == Methodology::ReduceAndBroadcast {
                    self.bcast(folded, root)?
                } else {
                    folded.unwrap_or(Value::None)
                }
            }
        };
        match failure {
            Some(err) => Err(err),
            None => Ok(result),
        }
    }

    /// Root only: fold a running partial in rank order and send each rank
    /// its prefix. Returns the root's own prefix.
    fn distribute_scan(
        &self,
        values: Vec<Value>,
        spec: &ReductionSpec,
        failure: &mut Option<Error>,
    ) -> Result<Value> {
        let tag = self.config().collective_tag;
        let mut running = spec.ground.clone();
        let mut mine = Value::None;
        for (rank, value) in values.into_iter().enumerate() {
            let partial = match running.take() {
                Some(prev) => spec.operator.apply(&prev, &value).unwrap_or_else(|err| {
                    failure.get_or_insert(err);
                    Value::None
                }),
                None => value,
            };
            if rank as Rank == spec.root {
                mine = partial.clone();
            } else {
                self.send(&partial, rank as Rank, tag)?;
            }
            running = Some(partial);
        }
        Ok(mine)
    }

    /// Pull every rank's value to `root`, in rank order. Location operators
    /// get each value paired with its rank.
    fn collect_to_root(&self, value: &Value, with_rank: bool, root: Rank) -> Result<Option<Vec<Value>>> {
        let tag = self.config().collective_tag;
        if self.rank() != root {
            self.send(value, root, tag)?;
            return Ok(None);
        }
        let mut values = Vec::with_capacity(self.size());
        for rank in 0..self.size() as Rank {
            let v = if rank == root {
                value.clone()
            } else {
                self.recv(rank, tag)?.0
            };
            values.push(if with_rank {
                Value::Tuple(vec![v, Value::Int(rank as i64)])
            } else {
                v
            });
        }
        Ok(Some(values))
    }
}

fn fold(op: &Operator, ground: Option<Value>, values: Vec<Value>) -> Result<Value> {
    let mut values = values.into_iter();
    let mut acc = match ground {
        Some(ground) => ground,
        None => values
            .next()
            .ok_or_else(|| Error::argument("reduction over no values"))?,
    };
    for value in values {
        acc = op.apply(&acc, &value)?;
    }
    Ok(acc)
}

fn pair_value(pair: ScalarPair, op: ReduceOp) -> Value {
    let value = match pair.value {
        Scalar::Long(v) => Value::Int(v),
        Scalar::Double(v) => Value::Float(v),
    };
    if op.is_location() {
        Value::Tuple(vec![value, Value::Int(pair.rank as i64)])
    } else {
        value
    }
}
