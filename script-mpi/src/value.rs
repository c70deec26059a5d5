//! Dynamically typed application values.
//!
//! A [`Value`] is what user code hands to a send, a collective or a reduction.
//! Most variants travel through the generic serializer; integers, floats, byte
//! strings and numeric arrays have dedicated wire encodings.
use std::cmp::Ordering;
use std::fmt;
use serde::{Serialize, Deserialize};
use crate::{Error, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    /// Raw byte string
    Bytes(Vec<u8>),
    Str(String),
    Array(NdArray),
    List(Vec<Value>),
    Tuple(Vec<Value>),
    /// Insertion-ordered mapping
    Map(Vec<(Value, Value)>),
}

/// Element types supported by the array fast path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ElementType {
    I8,
    U8,
    I16,
    U16,
    I32,
    U32,
    I64,
    U64,
    F32,
    F64,
}

impl ElementType {
    /// Tag carried in the header's long payload.
    pub fn tag(self) -> i64 {
        match self {
            ElementType::I8 => 1,
            ElementType::U8 => 2,
            ElementType::I16 => 3,
            ElementType::U16 => 4,
            ElementType::I32 => 5,
            ElementType::U32 => 6,
            ElementType::I64 => 7,
            ElementType::U64 => 8,
            ElementType::F32 => 9,
            ElementType::F64 => 10,
        }
    }

    pub fn from_tag(tag: i64) -> Option<ElementType> {
        let ty = match tag {
            1 => ElementType::I8,
            2 => ElementType::U8,
            3 => ElementType::I16,
            4 => ElementType::U16,
            5 => ElementType::I32,
            6 => ElementType::U32,
            7 => ElementType::I64,
            8 => ElementType::U64,
            9 => ElementType::F32,
            10 => ElementType::F64,
            _ => return None,
        };
        Some(ty)
    }

    /// Size of one element in bytes.
    pub fn size(self) -> usize {
        match self {
            ElementType::I8 | ElementType::U8 => 1,
            ElementType::I16 | ElementType::U16 => 2,
            ElementType::I32 | ElementType::U32 | ElementType::F32 => 4,
            ElementType::I64 | ElementType::U64 | ElementType::F64 => 8,
        }
    }
}

/// Primitive numeric types that can back an [`NdArray`].
pub trait Element: Copy {
    const TYPE: ElementType;

    fn write(self, out: &mut Vec<u8>);

    /// Read one element from exactly `TYPE.size()` bytes.
    fn read(bytes: &[u8]) -> Self;

    fn to_value(self) -> Value;
}

macro_rules! element {
    ($t:ty, $variant:ident, $x:ident => $value:expr) => {
        impl Element for $t {
            const TYPE: ElementType = ElementType::$variant;

            fn write(self, out: &mut Vec<u8>) {
                out.extend_from_slice(&self.to_ne_bytes());
            }

            fn read(bytes: &[u8]) -> Self {
                let mut raw = [0u8; std::mem::size_of::<$t>()];
                raw.copy_from_slice(bytes);
                <$t>::from_ne_bytes(raw)
            }

            fn to_value(self) -> Value {
                let $x = self;
                $value
            }
        }
    };
}

element!(i8, I8, x => Value::Int(x as i64));
element!(u8, U8, x => Value::Int(x as i64));
element!(i16, I16, x => Value::Int(x as i64));
element!(u16, U16, x => Value::Int(x as i64));
element!(i32, I32, x => Value::Int(x as i64));
element!(u32, U32, x => Value::Int(x as i64));
element!(i64, I64, x => Value::Int(x));
element!(u64, U64, x => Value::Int(x as i64));
element!(f32, F32, x => Value::Float(x as f64));
element!(f64, F64, x => Value::Float(x));

/// Contiguous n-dimensional numeric array with native-endian storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NdArray {
    dtype: ElementType,
    shape: Vec<usize>,
    data: Vec<u8>,
}

impl NdArray {
    pub fn new<T: Element>(shape: Vec<usize>, values: &[T]) -> Result<NdArray> {
        if shape.iter().product::<usize>() != values.len() {
            return Err(Error::argument(format!(
                "shape {:?} does not match {} elements",
                shape,
                values.len(),
            )));
        }
        let mut data = Vec::with_capacity(values.len() * T::TYPE.size());
        for v in values {
            v.write(&mut data);
        }
        Ok(NdArray {
            dtype: T::TYPE,
            shape,
            data,
        })
    }

    /// One-dimensional array from a vector.
    pub fn from_vec<T: Element>(values: Vec<T>) -> NdArray {
        let mut data = Vec::with_capacity(values.len() * T::TYPE.size());
        for v in &values {
            v.write(&mut data);
        }
        NdArray {
            dtype: T::TYPE,
            shape: vec![values.len()],
            data,
        }
    }

    pub fn from_raw(dtype: ElementType, shape: Vec<usize>, data: Vec<u8>) -> Result<NdArray> {
        let expected = shape.iter().product::<usize>() * dtype.size();
        if expected != data.len() {
            return Err(Error::argument(format!(
                "array of shape {:?} needs {} bytes, got {}",
                shape,
                expected,
                data.len(),
            )));
        }
        Ok(NdArray { dtype, shape, data })
    }

    pub fn dtype(&self) -> ElementType {
        self.dtype
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Raw contiguous storage.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Total number of elements.
    pub fn len(&self) -> usize {
        self.shape.iter().product()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn to_vec<T: Element>(&self) -> Result<Vec<T>> {
        if T::TYPE != self.dtype {
            return Err(Error::argument(format!(
                "array holds {:?}, not {:?}",
                self.dtype,
                T::TYPE,
            )));
        }
        Ok(self.data.chunks_exact(self.dtype.size()).map(T::read).collect())
    }

    /// Elements per index of the leading axis.
    fn row_elements(&self) -> usize {
        self.shape.iter().skip(1).product()
    }

    /// Slice rows `start..end` of the leading axis.
    pub fn slice_rows(&self, start: usize, end: usize) -> Result<NdArray> {
        let rows = match self.shape.first() {
            Some(rows) => *rows,
            None => return Err(Error::argument("cannot slice a zero-dimensional array")),
        };
        if start > end || end > rows {
            return Err(Error::argument(format!(
                "slice {}..{} out of range for {} rows",
                start, end, rows,
            )));
        }
        let row_bytes = self.row_elements() * self.dtype.size();
        let mut shape = self.shape.clone();
        shape[0] = end - start;
        Ok(NdArray {
            dtype: self.dtype,
            shape,
            data: self.data[start * row_bytes..end * row_bytes].to_vec(),
        })
    }

    /// Concatenate arrays along the leading axis.
    pub fn concat(parts: &[NdArray]) -> Result<NdArray> {
        let first = parts
            .first()
            .ok_or_else(|| Error::argument("nothing to concatenate"))?;
        if first.shape.is_empty() {
            return Err(Error::argument("cannot concatenate zero-dimensional arrays"));
        }
        let mut rows = 0;
        let mut data = vec![];
        for part in parts {
            if part.dtype != first.dtype || part.shape.get(1..) != first.shape.get(1..) {
                return Err(Error::argument("arrays differ in element type or trailing shape"));
            }
            rows += part.shape[0];
            data.extend_from_slice(&part.data);
        }
        let mut shape = first.shape.clone();
        shape[0] = rows;
        Ok(NdArray {
            dtype: first.dtype,
            shape,
            data,
        })
    }

    /// Items along the leading axis: scalars for 1-D arrays, sub-arrays otherwise.
    fn items(&self) -> Result<Vec<Value>> {
        let rows = match self.shape.first() {
            Some(rows) => *rows,
            None => return Err(Error::argument("zero-dimensional array is not a sequence")),
        };
        if self.shape.len() == 1 {
            let size = self.dtype.size();
            return Ok(self.data.chunks_exact(size).map(|c| self.scalar(c)).collect());
        }
        (0..rows)
            .map(|i| {
                let mut row = self.slice_rows(i, i + 1)?;
                row.shape.remove(0);
                Ok(Value::Array(row))
            })
            .collect()
    }

    fn scalar(&self, bytes: &[u8]) -> Value {
        match self.dtype {
            ElementType::I8 => i8::read(bytes).to_value(),
            ElementType::U8 => u8::read(bytes).to_value(),
            ElementType::I16 => i16::read(bytes).to_value(),
            ElementType::U16 => u16::read(bytes).to_value(),
            ElementType::I32 => i32::read(bytes).to_value(),
            ElementType::U32 => u32::read(bytes).to_value(),
            ElementType::I64 => i64::read(bytes).to_value(),
            ElementType::U64 => u64::read(bytes).to_value(),
            ElementType::F32 => f32::read(bytes).to_value(),
            ElementType::F64 => f64::read(bytes).to_value(),
        }
    }
}

impl Value {
    pub fn str(s: impl Into<String>) -> Value {
        Value::Str(s.into())
    }

    pub fn bytes(b: impl Into<Vec<u8>>) -> Value {
        Value::Bytes(b.into())
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Value::None)
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::None => "none",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Bytes(_) => "bytes",
            Value::Str(_) => "str",
            Value::Array(_) => "array",
            Value::List(_) => "list",
            Value::Tuple(_) => "tuple",
            Value::Map(_) => "map",
        }
    }

    /// Integer view, treating booleans as 0/1.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Bool(b) => Some(*b as i64),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            _ => self.as_int().map(|i| i as f64),
        }
    }

    pub fn truthy(&self) -> bool {
        match self {
            Value::None => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Float(f) => *f != 0.0,
            Value::Bytes(b) => !b.is_empty(),
            Value::Str(s) => !s.is_empty(),
            Value::Array(a) => !a.is_empty(),
            Value::List(v) | Value::Tuple(v) => !v.is_empty(),
            Value::Map(m) => !m.is_empty(),
        }
    }

    /// Sequence length, if this value is a sequence.
    pub fn len(&self) -> Option<usize> {
        match self {
            Value::Bytes(b) => Some(b.len()),
            Value::Str(s) => Some(s.chars().count()),
            Value::Array(a) => a.shape().first().copied(),
            Value::List(v) | Value::Tuple(v) => Some(v.len()),
            Value::Map(m) => Some(m.len()),
            _ => None,
        }
    }

    /// Slice `start..end`, keeping the sequence kind.
    pub fn slice(&self, start: usize, end: usize) -> Result<Value> {
        let check = |len: usize| {
            if start > end || end > len {
                Err(Error::argument(format!(
                    "slice {}..{} out of range for length {}",
                    start, end, len,
                )))
            } else {
                Ok(())
            }
        };
        match self {
            Value::Bytes(b) => {
                check(b.len())?;
                Ok(Value::Bytes(b[start..end].to_vec()))
            }
            Value::Str(s) => {
                check(s.chars().count())?;
                Ok(Value::Str(s.chars().skip(start).take(end - start).collect()))
            }
            Value::Array(a) => Ok(Value::Array(a.slice_rows(start, end)?)),
            Value::List(v) => {
                check(v.len())?;
                Ok(Value::List(v[start..end].to_vec()))
            }
            Value::Tuple(v) => {
                check(v.len())?;
                Ok(Value::Tuple(v[start..end].to_vec()))
            }
            other => Err(Error::argument(format!(
                "{} object is not sliceable",
                other.type_name(),
            ))),
        }
    }

    /// Convert a sequence into its list of items.
    pub fn into_items(self) -> Result<Vec<Value>> {
        match self {
            Value::List(v) | Value::Tuple(v) => Ok(v),
            Value::Bytes(b) => Ok(b.into_iter().map(|x| Value::Bytes(vec![x])).collect()),
            Value::Str(s) => Ok(s.chars().map(|c| Value::Str(c.to_string())).collect()),
            Value::Array(a) => a.items(),
            Value::Map(m) => Ok(m.into_iter().map(|(k, _)| k).collect()),
            other => Err(Error::argument(format!(
                "{} object is not a sequence",
                other.type_name(),
            ))),
        }
    }

    /// `self + other`: numeric addition or sequence concatenation.
    pub fn add(&self, other: &Value) -> Result<Value> {
        match (self, other) {
            (Value::Float(_), _) | (_, Value::Float(_)) => {
                numeric_pair(self, other, "+").map(|(a, b)| Value::Float(a + b))
            }
            (Value::Bytes(a), Value::Bytes(b)) => Ok(Value::Bytes([&a[..], &b[..]].concat())),
            (Value::Str(a), Value::Str(b)) => Ok(Value::Str(format!("{}{}", a, b))),
            (Value::List(a), Value::List(b)) => Ok(Value::List([&a[..], &b[..]].concat())),
            (Value::Tuple(a), Value::Tuple(b)) => Ok(Value::Tuple([&a[..], &b[..]].concat())),
            _ => {
                let (a, b) = int_pair(self, other, "+")?;
                a.checked_add(b)
                    .map(Value::Int)
                    .ok_or_else(|| Error::operator("integer overflow in +"))
            }
        }
    }

    /// `self * other`: numeric product or sequence repetition.
    pub fn mul(&self, other: &Value) -> Result<Value> {
        match (self, other) {
            (Value::Float(_), _) | (_, Value::Float(_)) => {
                numeric_pair(self, other, "*").map(|(a, b)| Value::Float(a * b))
            }
            (seq @ (Value::Bytes(_) | Value::Str(_) | Value::List(_) | Value::Tuple(_)), n)
            | (n, seq @ (Value::Bytes(_) | Value::Str(_) | Value::List(_) | Value::Tuple(_))) => {
                let n = n
                    .as_int()
                    .ok_or_else(|| unsupported("*", self, other))?;
                repeat(seq, n.max(0) as usize)
            }
            _ => {
                let (a, b) = int_pair(self, other, "*")?;
                a.checked_mul(b)
                    .map(Value::Int)
                    .ok_or_else(|| Error::operator("integer overflow in *"))
            }
        }
    }

    /// Total ordering between comparable values.
    pub fn compare(&self, other: &Value) -> Result<Ordering> {
        match (self, other) {
            (Value::Float(_), _) | (_, Value::Float(_)) => {
                let (a, b) = numeric_pair(self, other, "<")?;
                a.partial_cmp(&b)
                    .ok_or_else(|| Error::operator("cannot order NaN"))
            }
            (Value::Bytes(a), Value::Bytes(b)) => Ok(a.cmp(b)),
            (Value::Str(a), Value::Str(b)) => Ok(a.cmp(b)),
            (Value::List(a), Value::List(b)) | (Value::Tuple(a), Value::Tuple(b)) => {
                for (x, y) in a.iter().zip(b.iter()) {
                    match x.compare(y)? {
                        Ordering::Equal => continue,
                        ord => return Ok(ord),
                    }
                }
                Ok(a.len().cmp(&b.len()))
            }
            _ => {
                let (a, b) = int_pair(self, other, "<")?;
                Ok(a.cmp(&b))
            }
        }
    }
}

fn unsupported(op: &str, a: &Value, b: &Value) -> Error {
    Error::operator(format!(
        "unsupported operand types for {}: {} and {}",
        op,
        a.type_name(),
        b.type_name(),
    ))
}

fn int_pair(a: &Value, b: &Value, op: &str) -> Result<(i64, i64)> {
    match (a.as_int(), b.as_int()) {
        (Some(x), Some(y)) => Ok((x, y)),
        _ => Err(unsupported(op, a, b)),
    }
}

fn numeric_pair(a: &Value, b: &Value, op: &str) -> Result<(f64, f64)> {
    match (a.as_float(), b.as_float()) {
        (Some(x), Some(y)) => Ok((x, y)),
        _ => Err(unsupported(op, a, b)),
    }
}

/// Byte budget for the result of a sequence repetition.
const MAX_REPEAT_BYTES: usize = u32::MAX as usize;

/// Fail when `len` items of `item_size` bytes repeated `n` times exceed the budget.
fn check_repeat(len: usize, item_size: usize, n: usize) -> Result<()> {
    match len.checked_mul(n).and_then(|total| total.checked_mul(item_size)) {
        Some(bytes) if bytes <= MAX_REPEAT_BYTES => Ok(()),
        _ => Err(Error::operator("repeated sequence is too large")),
    }
}

fn repeat(seq: &Value, n: usize) -> Result<Value> {
    let value_size = std::mem::size_of::<Value>();
    Ok(match seq {
        Value::Bytes(b) => {
            check_repeat(b.len(), 1, n)?;
            Value::Bytes(b.repeat(n))
        }
        Value::Str(s) => {
            check_repeat(s.len(), 1, n)?;
            Value::Str(s.repeat(n))
        }
        Value::List(v) => {
            check_repeat(v.len(), value_size, n)?;
            Value::List(repeat_items(v, n))
        }
        Value::Tuple(v) => {
            check_repeat(v.len(), value_size, n)?;
            Value::Tuple(repeat_items(v, n))
        }
        other => return Err(Error::operator(format!("cannot repeat {}", other.type_name()))),
    })
}

fn repeat_items(items: &[Value], n: usize) -> Vec<Value> {
    if items.is_empty() {
        return vec![];
    }
    (0..n).flat_map(|_| items.iter().cloned()).collect()
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn join(f: &mut fmt::Formatter<'_>, items: &[Value]) -> fmt::Result {
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{}", item)?;
            }
            Ok(())
        }
        match self {
            Value::None => write!(f, "None"),
            Value::Bool(b) => write!(f, "{}", if *b { "True" } else { "False" }),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{:?}", x),
            Value::Bytes(b) => write!(f, "b{:?}", String::from_utf8_lossy(b)),
            Value::Str(s) => write!(f, "{:?}", s),
            Value::Array(a) => write!(f, "array({:?}, shape={:?})", a.dtype(), a.shape()),
            Value::List(v) => {
                write!(f, "[")?;
                join(f, v)?;
                write!(f, "]")
            }
            Value::Tuple(v) => {
                write!(f, "(")?;
                join(f, v)?;
                if v.len() == 1 {
                    write!(f, ",")?;
                }
                write!(f, ")")
            }
            Value::Map(m) => {
                write!(f, "{{")?;
                for (i, (k, v)) in m.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {}", k, v)?;
                }
                write!(f, "}}")
            }
        }
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Value {
        Value::Int(i)
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Value {
        Value::Float(x)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Value {
        Value::Str(s.to_string())
    }
}

impl From<NdArray> for Value {
    fn from(a: NdArray) -> Value {
        Value::Array(a)
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Value {
        Value::List(v)
    }
}
