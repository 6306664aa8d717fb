//! Decoding and encoding of wire payloads.
//!
//! Signaling messages are decoded strictly: an unknown `type` or a payload
//! missing a variant's fields is an error. Telemetry frames are decoded
//! leniently because the inference service omits or loosely types fields
//! it could not compute for a frame.

use crate::message::SignalingMessage;
use drivewatch_core::{
    EyeClosureMetrics, GazeMetrics, HeadPoseMetrics, MetricsFrame, PhoneUsageMetrics, YawnMetrics,
};
use serde_json::{Map, Value};
use thiserror::Error;

const KNOWN_TYPES: [&str; 5] = ["offer", "answer", "ice-candidate", "welcome", "error"];

/// Errors raised while decoding wire payloads.
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Failed to parse message: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Expected a JSON object")]
    NotAnObject,

    #[error("Message has no type field")]
    MissingType,

    #[error("Unknown message type: {0}")]
    UnknownType(String),
}

// ============================================================================
// Signaling
// ============================================================================

/// Decodes one signaling message from its JSON text.
pub fn decode_signaling(text: &str) -> Result<SignalingMessage, ProtocolError> {
    let value: Value = serde_json::from_str(text)?;
    let object = value.as_object().ok_or(ProtocolError::NotAnObject)?;

    let message_type = object
        .get("type")
        .and_then(Value::as_str)
        .ok_or(ProtocolError::MissingType)?;
    if !KNOWN_TYPES.contains(&message_type) {
        return Err(ProtocolError::UnknownType(message_type.to_string()));
    }

    Ok(serde_json::from_value(value)?)
}

/// Encodes one signaling message as JSON text.
pub fn encode_signaling(message: &SignalingMessage) -> Result<String, ProtocolError> {
    Ok(serde_json::to_string(message)?)
}

// ============================================================================
// Telemetry
// ============================================================================

/// Parses a telemetry frame from its JSON text.
pub fn parse_metrics_frame(text: &str) -> Result<MetricsFrame, ProtocolError> {
    let value: Value = serde_json::from_str(text)?;
    metrics_from_value(&value)
}

/// Converts a JSON object into a [`MetricsFrame`].
///
/// Flags use truthiness (`1` and `"yes"` are true, `0`, `""` and `null` are
/// false), counts must be non-negative integers and are otherwise dropped.
/// Sub-objects that are not JSON objects are ignored.
pub fn metrics_from_value(value: &Value) -> Result<MetricsFrame, ProtocolError> {
    let root = value.as_object().ok_or(ProtocolError::NotAnObject)?;

    Ok(MetricsFrame {
        face_detected: flag(root, "face_detected"),
        eye_closure: section(root, "eye_closure").map(|m| EyeClosureMetrics {
            ear: number(m, "ear"),
            ear_alert: flag(m, "ear_alert"),
            perclos: number(m, "perclos"),
            perclos_alert: flag(m, "perclos_alert"),
            eye_closed_sustained: flag(m, "eye_closed_sustained"),
        }),
        yawn: section(root, "yawn").map(|m| YawnMetrics {
            mar: number(m, "mar"),
            yawning: flag(m, "yawning"),
            yawn_sustained: number(m, "yawn_sustained"),
            yawn_count: count(m, "yawn_count"),
        }),
        head_pose: section(root, "head_pose").map(|m| HeadPoseMetrics {
            yaw: number(m, "yaw"),
            pitch: number(m, "pitch"),
            roll: number(m, "roll"),
            yaw_alert: flag(m, "yaw_alert"),
            pitch_alert: flag(m, "pitch_alert"),
            roll_alert: flag(m, "roll_alert"),
            yaw_sustained: number(m, "yaw_sustained"),
            pitch_sustained: number(m, "pitch_sustained"),
            roll_sustained: number(m, "roll_sustained"),
            head_pose_alert: flag(m, "head_pose_alert"),
        }),
        gaze: section(root, "gaze").map(|m| GazeMetrics {
            gaze_on_road: flag(m, "gaze_on_road"),
            gaze_alert: flag(m, "gaze_alert"),
        }),
        phone_usage: section(root, "phone_usage").map(|m| PhoneUsageMetrics {
            phone_usage: flag(m, "phone_usage"),
            phone_usage_rate: number(m, "phone_usage_rate"),
            phone_detected_frames: count(m, "phone_detected_frames"),
        }),
    })
}

fn section<'a>(root: &'a Map<String, Value>, key: &str) -> Option<&'a Map<String, Value>> {
    root.get(key).and_then(Value::as_object)
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0 && !f.is_nan()),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

fn flag(map: &Map<String, Value>, key: &str) -> Option<bool> {
    map.get(key).filter(|v| !v.is_null()).map(truthy)
}

fn number(map: &Map<String, Value>, key: &str) -> Option<f64> {
    map.get(key).and_then(Value::as_f64)
}

fn count(map: &Map<String, Value>, key: &str) -> Option<u32> {
    let n = map.get(key).and_then(Value::as_f64)?;
    if n >= 0.0 && n.fract() == 0.0 && n <= f64::from(u32::MAX) {
        Some(n as u32)
    } else {
        None
    }
}
