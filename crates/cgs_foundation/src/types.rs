//! Strongly-typed identifiers used throughout the framework.
//!
//! Wrapper types prevent ID confusion (a `PlayerId` can never be passed
//! where a `SessionId` is expected). The zero value is reserved as the
//! invalid sentinel for both.

use serde::{Deserialize, Serialize};

/// Unique identifier for a player account.
///
/// A `u64` wrapper; `0` is the invalid sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
pub struct PlayerId(pub u64);

impl PlayerId {
    /// Creates a player ID from a raw value.
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Returns the raw value.
    pub const fn value(self) -> u64 {
        self.0
    }

    /// True when this ID refers to a real player (non-zero).
    pub const fn is_valid(self) -> bool {
        self.0 != 0
    }
}

impl std::fmt::Display for PlayerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "player:{}", self.0)
    }
}

/// Unique identifier for a client session at the gateway.
///
/// A `u64` wrapper; `0` is the invalid sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
pub struct SessionId(pub u64);

impl SessionId {
    /// Creates a session ID from a raw value.
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Returns the raw value.
    pub const fn value(self) -> u64 {
        self.0
    }

    /// True when this ID refers to a real session (non-zero).
    pub const fn is_valid(self) -> bool {
        self.0 != 0
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "session:{}", self.0)
    }
}
