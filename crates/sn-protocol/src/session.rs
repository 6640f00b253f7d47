//! Session identifier types

use std::fmt;

/// Server-allocated identifier for a reliable session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub u64);

impl SessionId {
    /// Create a new session ID
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Get the raw ID value
    pub fn as_u64(&self) -> u64 {
        self.0
    }

    /// Sent in a Hello by a peer that has no session yet
    pub const UNASSIGNED: SessionId = SessionId(0);

    /// Check if this is the unassigned placeholder
    pub fn is_unassigned(&self) -> bool {
        *self == Self::UNASSIGNED
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

impl From<u64> for SessionId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

/// Random 16-bit token used to reject stale reconnects to a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AuthId(pub u16);

impl AuthId {
    /// Create a new auth ID
    pub fn new(id: u16) -> Self {
        Self(id)
    }

    /// Get the raw value
    pub fn as_u16(&self) -> u16 {
        self.0
    }
}

impl fmt::Display for AuthId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04x}", self.0)
    }
}
