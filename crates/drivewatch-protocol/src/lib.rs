//! drivewatch Protocol - Signaling wire protocol
//!
//! This crate provides the JSON message types exchanged with the signaling
//! coordinator while negotiating a peer media connection, and lenient
//! parsing of the telemetry frames the inference service streams back.

pub mod message;
pub mod parse;

pub use message::{IceCandidatePayload, SdpType, SignalingMessage};
pub use parse::{decode_signaling, encode_signaling, parse_metrics_frame, ProtocolError};
