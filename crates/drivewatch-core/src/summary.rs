//! Summary of a finished monitoring session, kept for local history.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Persisted record of one monitoring session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    /// Client id assigned by the signaling server, if one was received.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    /// Telemetry frames received while active.
    pub frames_received: u64,
    /// Number of firings per alert id.
    #[serde(default)]
    pub alert_counts: BTreeMap<String, u32>,
    /// Error text shown when the session ended, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SessionSummary {
    /// Starts a summary at `started_at` with no frames or alerts.
    pub fn begin(client_id: Option<String>, started_at: DateTime<Utc>) -> Self {
        Self {
            client_id,
            started_at,
            ended_at: started_at,
            frames_received: 0,
            alert_counts: BTreeMap::new(),
            error: None,
        }
    }

    /// Session length.
    pub fn duration(&self) -> chrono::Duration {
        self.ended_at.signed_duration_since(self.started_at)
    }

    /// Total alert firings across all ids.
    pub fn total_alerts(&self) -> u32 {
        self.alert_counts
            .values()
            .fold(0u32, |acc, n| acc.saturating_add(*n))
    }

    /// Formats the duration as "1h 2m", "3m 4s" or "5s".
    pub fn duration_display(&self) -> String {
        let secs = self.duration().num_seconds().max(0);
        let (hours, mins, rem) = (secs / 3600, (secs % 3600) / 60, secs % 60);
        if hours > 0 {
            format!("{hours}h {mins}m")
        } else if mins > 0 {
            format!("{mins}m {rem}s")
        } else {
            format!("{rem}s")
        }
    }
}
