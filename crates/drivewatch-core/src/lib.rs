//! drivewatch Core - Shared types for driver monitoring sessions
//!
//! This crate provides the domain types shared between the wire
//! protocol (drivewatch-protocol) and the session runtime (drivewatch-client).
//!
//! All code follows the panic-free policy: no `.unwrap()`, `.expect()`,
//! `panic!()`, `unreachable!()`, `todo!()`, or direct indexing `[i]`.

pub mod alert;
pub mod error;
pub mod metrics;
pub mod state;
pub mod summary;

// Re-exports for convenience
pub use alert::{
    default_definitions, ActiveAlert, AlertDefinition, AlertEvaluator, AlertFiring, AlertId,
    AlertPriority,
};
pub use error::{DomainError, DomainResult};
pub use metrics::{
    EyeClosureMetrics, GazeMetrics, HeadPoseMetrics, MetricsFrame, PhoneUsageMetrics, YawnMetrics,
};
pub use state::{ConnectionState, SessionState, TransportStatus};
pub use summary::SessionSummary;
