//! Delivery and correlation identifiers, and the destination addressing type.

use std::fmt;

/// A delivery id (`D`): monotonically increasing, allocated by the
/// at-least-once delivery primitive across the entire orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
pub struct DeliveryId(pub u64);

impl fmt::Display for DeliveryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "D{}", self.0)
    }
}

/// A correlation id (`C`): the identifier visible on the wire, used to match
/// an incoming reply back to the task that is waiting on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
pub struct CorrelationId(pub u64);

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "C{}", self.0)
    }
}

/// Recipient identity for a task's outbound request.
///
/// Named `Destination` rather than `Path` (the term `spec.md` uses) to avoid
/// colliding with `std::path::Path` at every call site.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
pub struct Destination(pub String);

impl Destination {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Destination {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for Destination {
    fn from(value: String) -> Self {
        Self(value)
    }
}
