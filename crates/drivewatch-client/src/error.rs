//! Error types for the drivewatch session runtime.
//!
//! The taxonomy follows how each failure is handled:
//! - `MediaUnavailable` blocks a start before any network action
//! - `Transport` and `Negotiation` are connection-fatal and surface as the
//!   session's error text
//! - `Protocol` is recoverable; callers log it and drop the offending message
//!
//! **Panic-Free Policy:** This module follows the project's panic-free guidelines.
//! No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, or `todo!()`.

use std::io;
use thiserror::Error;

use drivewatch_protocol::ProtocolError;

// ============================================================================
// Client Error Type
// ============================================================================

/// Session runtime errors.
#[derive(Error, Debug)]
pub enum ClientError {
    /// No local media source was available when starting.
    #[error("No media stream available")]
    MediaUnavailable,

    /// The signaling transport could not connect or send.
    #[error("Transport error: {0}")]
    Transport(String),

    /// A signaling or telemetry payload could not be decoded.
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// The peer connection rejected a negotiation step or failed.
    #[error("Negotiation failed: {0}")]
    Negotiation(String),

    /// The configuration file could not be read or parsed.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// I/O error passthrough.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON error passthrough.
    #[error("Failed to parse data: {0}")]
    ParseError(#[from] serde_json::Error),
}

impl ClientError {
    /// Returns true for errors that end the connection attempt.
    pub fn is_connection_fatal(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Negotiation(_))
    }
}

// ============================================================================
// Result Type Alias
// ============================================================================

/// Convenience Result type alias for session runtime operations.
pub type Result<T> = std::result::Result<T, ClientError>;

// ============================================================================
// Tests
// ============================================================================
