//! Wire codec for the line-delimited JSON telemetry protocol.
//!
//! Every protocol line is one JSON object. Nested objects denote nodes,
//! scalar members denote items:
//!
//! ```text
//! {"temp": 235, "pid": {"kp": 55, "on": true}}
//! ```
//!
//! [`decode_line`] turns such a line into a [`Delta`], a purely structural
//! list of assignments; scale factors are applied later, per item, by
//! [`decode_value`]. The encode side builds the minimal outbound object for
//! an edit ([`encode_edit`]) or a control message ([`encode_command`]).

pub mod decode;
pub mod encode;

pub use decode::{decode_line, decode_value};
pub use encode::{encode_command, encode_edit, encode_raw};

use jsonwatch_path::Path;
use serde_json::Value;
use thiserror::Error;

use crate::tree::ItemType;

// ── Error ─────────────────────────────────────────────────────────────────

#[derive(Debug, Error, Clone, PartialEq)]
pub enum CodecError {
    #[error("malformed delta: {0}")]
    MalformedDelta(String),
    #[error("cannot encode a {found} value for a {expected} item")]
    TypeMismatch { expected: ItemType, found: &'static str },
    #[error("value {0} cannot be encoded")]
    NotFinite(f64),
}

// ── Raw scalars ───────────────────────────────────────────────────────────

/// A scalar exactly as it appeared on the wire.
#[derive(Debug, Clone, PartialEq)]
pub enum RawScalar {
    Bool(bool),
    Int(i64),
    /// Integers above `i64::MAX`.
    UInt(u64),
    Float(f64),
    String(String),
}

impl RawScalar {
    /// Classify a JSON leaf. Anything that is not a bool, number or string
    /// (`null`, arrays) is carried as its JSON text.
    pub fn from_json(value: &Value) -> Self {
        match value {
            Value::Bool(b) => RawScalar::Bool(*b),
            Value::Number(n) => match (n.as_i64(), n.as_u64(), n.as_f64()) {
                (Some(i), _, _) => RawScalar::Int(i),
                (None, Some(u), _) => RawScalar::UInt(u),
                (None, None, Some(f)) => RawScalar::Float(f),
                (None, None, None) => RawScalar::String(n.to_string()),
            },
            Value::String(s) => RawScalar::String(s.clone()),
            other => RawScalar::String(other.to_string()),
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            RawScalar::Bool(b) => Value::Bool(*b),
            RawScalar::Int(i) => Value::from(*i),
            RawScalar::UInt(u) => Value::from(*u),
            RawScalar::Float(f) => serde_json::Number::from_f64(*f).map_or(Value::Null, Value::Number),
            RawScalar::String(s) => Value::String(s.clone()),
        }
    }

    /// Item type for an entry first seen with this scalar.
    pub fn inferred_type(&self) -> ItemType {
        match self {
            RawScalar::Bool(_) => ItemType::Bool,
            RawScalar::Int(_) | RawScalar::UInt(_) => ItemType::Int,
            RawScalar::Float(_) => ItemType::Float,
            RawScalar::String(_) => ItemType::String,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            RawScalar::Int(i) => Some(*i as f64),
            RawScalar::UInt(u) => Some(*u as f64),
            RawScalar::Float(f) => Some(*f),
            _ => None,
        }
    }
}

// ── Delta ─────────────────────────────────────────────────────────────────

/// One structural step of a decoded line.
#[derive(Debug, Clone, PartialEq)]
pub enum DeltaOp {
    /// A nested object: the node at this path is present in the line.
    Node(Path),
    /// A scalar member: assign the raw scalar to the item at this path.
    Leaf(Path, RawScalar),
}

impl DeltaOp {
    pub fn path(&self) -> &Path {
        match self {
            DeltaOp::Node(path) | DeltaOp::Leaf(path, _) => path,
        }
    }
}

/// The ordered assignments decoded from one protocol line.
///
/// Order follows the line: a nested object's `Node` op precedes the ops of
/// its members.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Delta {
    pub(crate) ops: Vec<DeltaOp>,
}

impl Delta {
    pub fn ops(&self) -> &[DeltaOp] {
        &self.ops
    }

    /// Only the leaf assignments, in order.
    pub fn leaves(&self) -> impl Iterator<Item = (&Path, &RawScalar)> {
        self.ops.iter().filter_map(|op| match op {
            DeltaOp::Leaf(path, raw) => Some((path, raw)),
            DeltaOp::Node(_) => None,
        })
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}
