//! Identifier types for live entities.
//!
//! Stores are addressed by their name; states get a sequential id derived
//! from their name (`Counter1`, `Counter2`, ...).

use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};

/// Wire identifier of a live entity instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstanceId(String);

impl InstanceId {
    /// Creates an instance id from any string.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The instance id of the session-singleton store called `name`.
    #[must_use]
    pub fn for_store(name: &str) -> Self {
        Self(name.to_string())
    }

    /// Returns the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for InstanceId {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.to_string()))
    }
}

impl From<&str> for InstanceId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for InstanceId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl Borrow<str> for InstanceId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Whether an entity is a scoped state or a session-singleton store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityKind {
    State,
    Store,
}

impl EntityKind {
    #[must_use]
    pub const fn is_store(self) -> bool {
        matches!(self, Self::Store)
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::State => f.write_str("state"),
            Self::Store => f.write_str("store"),
        }
    }
}

/// Hands out sequential state instance ids, `name + n` with `n` starting at 1.
///
/// The counter is shared across all names, so ids stay unique even when two
/// kinds have names that are prefixes of each other.
#[derive(Debug, Default)]
pub struct InstanceIdGenerator {
    counter: AtomicU64,
}

impl InstanceIdGenerator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the next id for a state called `name`.
    pub fn next_id(&self, name: &str) -> InstanceId {
        let n = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
        InstanceId(format!("{name}{n}"))
    }

    /// Number of ids issued so far.
    pub fn issued(&self) -> u64 {
        self.counter.load(Ordering::Relaxed)
    }
}
