//! Signaling message types.
//!
//! Messages are JSON objects discriminated by a `type` field:
//!
//! ```text
//! { "type": "offer"|"answer", "sdp": "...", "sdpType": "offer"|"answer" }
//! { "type": "ice-candidate", "candidate": { "candidate": "...", "sdpMid": "0", "sdpMLineIndex": 0 } }
//! { "type": "welcome", "client_id": "...", "timestamp": "..." }
//! { "type": "error", "message": "..." }
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of a session description.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Answer,
}

impl fmt::Display for SdpType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Offer => write!(f, "offer"),
            Self::Answer => write!(f, "answer"),
        }
    }
}

/// An ICE candidate as carried on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidatePayload {
    /// The candidate attribute line
    pub candidate: String,

    /// Media stream identification tag
    #[serde(
        rename = "sdpMid",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub sdp_mid: Option<String>,

    /// Index of the m-line the candidate belongs to
    #[serde(
        rename = "sdpMLineIndex",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub sdp_m_line_index: Option<u16>,
}

impl IceCandidatePayload {
    pub fn new(
        candidate: impl Into<String>,
        sdp_mid: Option<String>,
        sdp_m_line_index: Option<u16>,
    ) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid,
            sdp_m_line_index,
        }
    }
}

/// Messages exchanged with the signaling coordinator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum SignalingMessage {
    /// Local session description offer
    Offer {
        sdp: String,
        #[serde(rename = "sdpType")]
        sdp_type: SdpType,
    },

    /// Remote session description answer
    Answer {
        sdp: String,
        #[serde(rename = "sdpType")]
        sdp_type: SdpType,
    },

    /// A single trickled ICE candidate
    IceCandidate { candidate: IceCandidatePayload },

    /// Greeting sent by the coordinator after the transport opens
    Welcome {
        /// Client id assigned by the coordinator
        client_id: String,
        /// ISO 8601 UTC timestamp
        timestamp: String,
    },

    /// Error reported by the coordinator
    Error { message: String },
}

impl SignalingMessage {
    /// Creates an offer message.
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self::Offer {
            sdp: sdp.into(),
            sdp_type: SdpType::Offer,
        }
    }

    /// Creates an answer message.
    pub fn answer(sdp: impl Into<String>) -> Self {
        Self::Answer {
            sdp: sdp.into(),
            sdp_type: SdpType::Answer,
        }
    }

    /// Creates an ICE candidate message.
    pub fn ice_candidate(candidate: IceCandidatePayload) -> Self {
        Self::IceCandidate { candidate }
    }

    /// Creates a welcome message.
    pub fn welcome(client_id: impl Into<String>, timestamp: impl Into<String>) -> Self {
        Self::Welcome {
            client_id: client_id.into(),
            timestamp: timestamp.into(),
        }
    }

    /// Creates an error message.
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    /// Returns the wire discriminant.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Offer { .. } => "offer",
            Self::Answer { .. } => "answer",
            Self::IceCandidate { .. } => "ice-candidate",
            Self::Welcome { .. } => "welcome",
            Self::Error { .. } => "error",
        }
    }
}
