use std::collections::BTreeMap;
use std::fmt;

/// Timestamp type (seconds since epoch).
pub type Timestamp = u64;

/// TagSet type (tag name -> tag value). Ordered so rendered results are deterministic.
pub type TagSet = BTreeMap<String, String>;

/// A data point value. Integer and floating point values are never mixed silently:
/// integer reductions stay integral, anything touching a float is widened to f64.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    Integer(i64),
    Float(f64),
}

impl Value {
    #[inline]
    pub fn is_integer(&self) -> bool {
        matches!(self, Value::Integer(_))
    }

    /// Returns the value as an `f64`, converting integers.
    #[inline]
    pub fn to_f64(&self) -> f64 {
        match *self {
            Value::Integer(v) => v as f64,
            Value::Float(v) => v,
        }
    }

    /// Returns the value as an `i64`, truncating floats.
    #[inline]
    pub fn to_i64(&self) -> i64 {
        match *self {
            Value::Integer(v) => v,
            Value::Float(v) => v as i64,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Integer(v) => write!(f, "{}", v),
            Value::Float(v) => write!(f, "{}", v),
        }
    }
}

/// Represents a single time-series data point produced by a span iterator.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DataPoint {
    pub timestamp: Timestamp,
    pub value: Value,
}

impl DataPoint {
    pub fn integer(timestamp: Timestamp, value: i64) -> Self {
        Self {
            timestamp,
            value: Value::Integer(value),
        }
    }

    pub fn float(timestamp: Timestamp, value: f64) -> Self {
        Self {
            timestamp,
            value: Value::Float(value),
        }
    }

    #[inline]
    pub fn is_integer(&self) -> bool {
        self.value.is_integer()
    }
}

/// Index-addressable access to a sequence of data points.
///
/// Implemented by row views, spans and synthesized spans. Indices must be `< size()`.
pub trait RandomAccessSeries {
    fn size(&self) -> usize;
    fn timestamp(&self, i: usize) -> Timestamp;
    fn is_integer(&self, i: usize) -> bool;
    fn long_value(&self, i: usize) -> i64;
    fn double_value(&self, i: usize) -> f64;

    /// The value at `i`, typed.
    fn value(&self, i: usize) -> Value {
        if self.is_integer(i) {
            Value::Integer(self.long_value(i))
        } else {
            Value::Float(self.double_value(i))
        }
    }

    fn point(&self, i: usize) -> DataPoint {
        DataPoint {
            timestamp: self.timestamp(i),
            value: self.value(i),
        }
    }
}

/// A forward iterator over data points that can be repositioned by time.
pub trait SeekableSeries: Iterator<Item = DataPoint> {
    /// Positions the iterator so the next point returned is the first one whose
    /// timestamp is `>= timestamp` (or the iterator is exhausted).
    fn seek(&mut self, timestamp: Timestamp);
}
