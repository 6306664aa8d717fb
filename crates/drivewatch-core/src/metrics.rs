//! Telemetry frames produced by the remote inference service.
//!
//! A frame is a snapshot of the latest per-metric results. Every field is
//! optional because the service omits metrics it could not compute for a
//! given video frame (e.g. no landmarks when the face is lost).

use serde::{Deserialize, Serialize};

/// Eye closure metrics (EAR and PERCLOS based).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EyeClosureMetrics {
    /// Eye aspect ratio of the current frame
    pub ear: Option<f64>,
    pub ear_alert: Option<bool>,
    /// Fraction of the recent window with eyes closed (0.0-1.0)
    pub perclos: Option<f64>,
    pub perclos_alert: Option<bool>,
    pub eye_closed_sustained: Option<bool>,
}

/// Yawn detection metrics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct YawnMetrics {
    /// Mouth aspect ratio of the current frame
    pub mar: Option<f64>,
    pub yawning: Option<bool>,
    pub yawn_sustained: Option<f64>,
    /// Cumulative number of yawn events in this stream
    pub yawn_count: Option<u32>,
}

/// Head pose metrics (degrees).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeadPoseMetrics {
    pub yaw: Option<f64>,
    pub pitch: Option<f64>,
    pub roll: Option<f64>,
    pub yaw_alert: Option<bool>,
    pub pitch_alert: Option<bool>,
    pub roll_alert: Option<bool>,
    pub yaw_sustained: Option<f64>,
    pub pitch_sustained: Option<f64>,
    pub roll_sustained: Option<f64>,
    pub head_pose_alert: Option<bool>,
}

/// Gaze direction metrics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GazeMetrics {
    pub gaze_on_road: Option<bool>,
    pub gaze_alert: Option<bool>,
}

/// Phone usage metrics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PhoneUsageMetrics {
    pub phone_usage: Option<bool>,
    pub phone_usage_rate: Option<f64>,
    pub phone_detected_frames: Option<u32>,
}

/// One telemetry frame from the inference service.
///
/// Only the most recent frame is retained by a session; frames are never
/// queued or replayed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsFrame {
    pub face_detected: Option<bool>,
    pub eye_closure: Option<EyeClosureMetrics>,
    pub yawn: Option<YawnMetrics>,
    pub head_pose: Option<HeadPoseMetrics>,
    pub gaze: Option<GazeMetrics>,
    pub phone_usage: Option<PhoneUsageMetrics>,
}

fn flag(value: Option<bool>) -> bool {
    value.unwrap_or(false)
}

impl MetricsFrame {
    /// Returns true unless the frame positively reports a detected face.
    ///
    /// A frame without the `face_detected` key counts as "no face".
    pub fn face_missing(&self) -> bool {
        !flag(self.face_detected)
    }

    /// PERCLOS over its configured threshold.
    pub fn perclos_over_threshold(&self) -> bool {
        self.eye_closure
            .as_ref()
            .is_some_and(|e| flag(e.perclos_alert))
    }

    /// Eyes have stayed closed longer than the sustained threshold.
    pub fn eyes_closed_sustained(&self) -> bool {
        self.eye_closure
            .as_ref()
            .is_some_and(|e| flag(e.eye_closed_sustained))
    }

    /// A yawn is in progress.
    pub fn is_yawning(&self) -> bool {
        self.yawn.as_ref().is_some_and(|y| flag(y.yawning))
    }

    /// Cumulative yawn count, if reported.
    pub fn yawn_count(&self) -> Option<u32> {
        self.yawn.as_ref().and_then(|y| y.yawn_count)
    }

    /// Any head pose axis has deviated for a sustained period.
    pub fn head_pose_deviated(&self) -> bool {
        self.head_pose.as_ref().is_some_and(|h| {
            flag(h.yaw_alert) || flag(h.pitch_alert) || flag(h.roll_alert)
        })
    }

    /// Gaze has left the road.
    pub fn gaze_off_road(&self) -> bool {
        self.gaze.as_ref().is_some_and(|g| flag(g.gaze_alert))
    }

    /// A phone is being used.
    pub fn phone_in_use(&self) -> bool {
        self.phone_usage
            .as_ref()
            .is_some_and(|p| flag(p.phone_usage))
    }
}
