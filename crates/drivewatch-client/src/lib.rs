//! drivewatch Client - Monitoring session runtime
//!
//! This crate connects a local camera to the remote inference service and
//! turns the telemetry it streams back into driver alerts:
//! - `signaling` - WebSocket transport to the signaling coordinator
//! - `peer` - Peer session controller driving the offer/answer/ICE exchange
//! - `session` - Monitoring session state machine and driver loop
//! - `store` - Local history of finished sessions
//!
//! # Architecture
//!
//! ```text
//!  SessionHandle ──commands──▶ MonitoringSession ──▶ AlertEvaluator
//!                                   │     ▲
//!                          start/   │     │ SessionInput (one queue)
//!                          cleanup  ▼     │
//!                          PeerSessionController
//!                             │            │
//!                             ▼            ▼
//!                     SignalingChannel   PeerConnection
//!                       (WebSocket)      (media engine)
//! ```
//!
//! The session and controller are only mutated on the task running
//! [`MonitoringSession::run`]. Socket readers and peer callbacks enqueue
//! inputs; they never touch session state.
//!
//! # Panic-Free Guarantees
//!
//! Production code contains no `.unwrap()`, `.expect()`, `panic!()`,
//! `unreachable!()` or `todo!()`. Tests may use them.

pub mod config;
pub mod error;
pub mod peer;
pub mod session;
pub mod signaling;
pub mod store;

// Re-export commonly used types
pub use config::{ClientConfig, IceServer, RtcConfiguration};
pub use error::{ClientError, Result};
pub use peer::{
    ControllerUpdate, MediaSource, MediaTrack, OfferOptions, PeerConnection,
    PeerConnectionFactory, PeerEvent, PeerEventSender, PeerSessionController, SessionDescription,
    SessionInput, TrackKind, CONNECTION_FAILED_MESSAGE, TRANSPORT_CLOSED_MESSAGE,
};
pub use session::{MonitoringSession, SessionCommand, SessionHandle, SessionSnapshot};
pub use signaling::{MessageHandler, SignalingChannel, SubscriberRegistry, SubscriptionId};
pub use store::{JsonlSummaryStore, MemorySummaryStore, SummaryStore};
