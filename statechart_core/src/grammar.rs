//! Values and events exchanged between a state chart and its host.
//!
//! Events are ephemeral: the host builds one, hands it to
//! [`StateChart::send_event`](crate::state_chart::StateChart::send_event),
//! and the interpreter consumes it within that call. The payload is a flat
//! map of named [`Val`]s that condition expressions can read but not modify.

use std::collections::HashMap;

/// Scalar values carried by event payloads and produced by condition
/// expressions.
#[derive(Debug, Clone, PartialEq)]
pub enum Val {
    /// Boolean values.
    Boolean(bool),
    /// Integer numerical values.
    Integer(i32),
    /// Double-precision numerical values.
    Number(f64),
    /// String values.
    Text(String),
}

impl Val {
    /// Numerical reading of the value, if it has one.
    /// Integers widen to doubles so that mixed comparisons work the way
    /// script-language conditions expect.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Val::Integer(i) => Some(f64::from(*i)),
            Val::Number(n) => Some(*n),
            Val::Boolean(_) | Val::Text(_) => None,
        }
    }

    /// Loose equality: numerical values compare by value regardless of
    /// representation, everything else requires matching variants.
    pub fn loose_eq(&self, other: &Val) -> bool {
        match (self, other) {
            (Val::Boolean(a), Val::Boolean(b)) => a == b,
            (Val::Text(a), Val::Text(b)) => a == b,
            _ => match (self.as_number(), other.as_number()) {
                (Some(a), Some(b)) => a == b,
                _ => false,
            },
        }
    }

    /// Loose ordering over numerical values; `None` when either side has no
    /// numerical reading.
    pub fn loose_cmp(&self, other: &Val) -> Option<std::cmp::Ordering> {
        match (self.as_number(), other.as_number()) {
            (Some(a), Some(b)) => a.partial_cmp(&b),
            _ => None,
        }
    }
}

impl From<bool> for Val {
    fn from(value: bool) -> Self {
        Val::Boolean(value)
    }
}

impl From<i32> for Val {
    fn from(value: i32) -> Self {
        Val::Integer(value)
    }
}

impl From<f64> for Val {
    fn from(value: f64) -> Self {
        Val::Number(value)
    }
}

impl From<&str> for Val {
    fn from(value: &str) -> Self {
        Val::Text(value.to_owned())
    }
}

/// An event delivered to a state chart, either by the host (external) or by
/// a `<raise>` executed during a microstep (internal).
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    name: String,
    payload: Option<HashMap<String, Val>>,
}

impl Event {
    /// An event with no payload.
    pub fn new(name: impl Into<String>) -> Self {
        Event {
            name: name.into(),
            payload: None,
        }
    }

    /// An event carrying a payload map.
    pub fn with_payload(name: impl Into<String>, payload: HashMap<String, Val>) -> Self {
        Event {
            name: name.into(),
            payload: Some(payload),
        }
    }

    /// The event name matched against transition event descriptors.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// A named field of the payload, if present.
    pub fn data(&self, field: &str) -> Option<&Val> {
        self.payload.as_ref().and_then(|data| data.get(field))
    }

    /// The full payload map, if any.
    pub fn payload(&self) -> Option<&HashMap<String, Val>> {
        self.payload.as_ref()
    }
}
