//! Core domain types

use std::fmt;

/// Lifecycle state of a reliable session
///
/// ```text
/// NotConnected -> Connected -> Established
///                     ^             |
///                     |             v
///                     +--------- Lost ------> Disconnected
/// ```
///
/// Attaching a transport moves any state back to `Connected`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionStatus {
    /// Session allocated, no transport attached yet
    NotConnected,
    /// A transport is attached
    Connected,
    /// The application confirmed the connection
    Established,
    /// The transport failed while the session was still owned
    Lost,
    /// Torn down explicitly
    Disconnected,
}

impl SessionStatus {
    /// Whether the session currently has a live transport
    pub fn is_connected(&self) -> bool {
        matches!(self, SessionStatus::Connected | SessionStatus::Established)
    }

    /// Whether this is the terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionStatus::Disconnected)
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionStatus::NotConnected => write!(f, "not-connected"),
            SessionStatus::Connected => write!(f, "connected"),
            SessionStatus::Established => write!(f, "established"),
            SessionStatus::Lost => write!(f, "lost"),
            SessionStatus::Disconnected => write!(f, "disconnected"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_status_display() {
        assert_eq!(format!("{}", SessionStatus::NotConnected), "not-connected");
        assert_eq!(format!("{}", SessionStatus::Established), "established");
    }

    #[test]
    fn test_session_status_predicates() {
        assert!(SessionStatus::Connected.is_connected());
        assert!(!SessionStatus::Lost.is_connected());
        assert!(SessionStatus::Disconnected.is_terminal());
    }
}
