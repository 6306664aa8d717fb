//! Lifecycle states for the transport, the peer connection, and the
//! user-facing monitoring session.
//!
//! Each enum is owned by exactly one component and only mutated there:
//! - [`TransportStatus`] by the signaling channel
//! - [`ConnectionState`] by the peer session controller
//! - [`SessionState`] by the monitoring session

use crate::error::DomainError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// Connection State
// ============================================================================

/// State of the media peer connection.
///
/// Mirrors the state reported by the underlying peer connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// No negotiation has happened yet.
    #[default]
    New,

    /// Offer/answer or ICE exchange in progress.
    Connecting,

    /// Media is flowing.
    Connected,

    /// Connectivity was lost, may recover on its own.
    Disconnected,

    /// Negotiation or connectivity failed permanently.
    Failed,

    /// Connection was closed locally.
    Closed,
}

impl ConnectionState {
    /// Returns a lowercase label matching the wire representation.
    pub fn label(&self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
            Self::Failed => "failed",
            Self::Closed => "closed",
        }
    }

    /// Returns true for states the connection never leaves on its own.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Failed | Self::Closed)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

impl FromStr for ConnectionState {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "new" => Ok(Self::New),
            "connecting" => Ok(Self::Connecting),
            "connected" => Ok(Self::Connected),
            "disconnected" => Ok(Self::Disconnected),
            "failed" => Ok(Self::Failed),
            "closed" => Ok(Self::Closed),
            other => Err(DomainError::invalid(
                "connection state",
                other,
                "new|connecting|connected|disconnected|failed|closed",
            )),
        }
    }
}

// ============================================================================
// Transport Status
// ============================================================================

/// Status of the signaling transport.
///
/// Transitions: connecting → open → closing → closed, or connecting → closed
/// when the transport fails before opening.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportStatus {
    Connecting,
    Open,
    Closing,
    #[default]
    Closed,
}

impl TransportStatus {
    /// Returns a lowercase label matching the wire representation.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::Closing => "closing",
            Self::Closed => "closed",
        }
    }

    /// Returns true if messages can be sent.
    pub fn is_open(&self) -> bool {
        *self == Self::Open
    }
}

impl fmt::Display for TransportStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

// ============================================================================
// Session State
// ============================================================================

/// User-facing state of a monitoring session.
///
/// Derived from, but distinct from, [`ConnectionState`]:
///
/// | From | Trigger | To |
/// |------|---------|----|
/// | idle | start | starting |
/// | starting | connection connected | active |
/// | active | stop | stopping |
/// | stopping | connection closed | idle |
/// | starting, active | connection failed | idle |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    #[default]
    Idle,
    Starting,
    Active,
    Stopping,
}

impl SessionState {
    /// Returns a lowercase label for display.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Starting => "starting",
            Self::Active => "active",
            Self::Stopping => "stopping",
        }
    }

    /// Returns true while a transition is in flight.
    pub fn is_transitioning(&self) -> bool {
        matches!(self, Self::Starting | Self::Stopping)
    }

    /// Computes the state reached when the connection reports `connection`.
    ///
    /// Returns `None` when the report does not trigger a transition.
    pub fn on_connection_state(&self, connection: ConnectionState) -> Option<SessionState> {
        match (self, connection) {
            (Self::Starting, ConnectionState::Connected) => Some(Self::Active),
            (Self::Stopping, ConnectionState::Closed) => Some(Self::Idle),
            (Self::Starting | Self::Active, ConnectionState::Failed) => Some(Self::Idle),
            _ => None,
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}
