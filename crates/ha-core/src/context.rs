//! Context type linking a state change to the action that caused it

use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Origin marker carried by events, service calls and state writes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Context {
    /// Unique identifier for this context (ULID)
    pub id: String,
}

impl Context {
    /// Create a context with a fresh ULID
    pub fn new() -> Self {
        Self {
            id: Ulid::new().to_string(),
        }
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}
