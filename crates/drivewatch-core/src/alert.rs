//! Cooldown-gated alerts derived from telemetry frames.
//!
//! Each [`AlertDefinition`] pairs a predicate over a [`MetricsFrame`] with a
//! priority and a cooldown. The [`AlertEvaluator`] runs every definition
//! against each incoming frame and records a firing whenever the predicate
//! holds and the alert's own cooldown has elapsed.
//!
//! Firing records are never cleared when a predicate turns false. The last
//! firing of each alert stays visible until it fires again or the evaluator
//! is reset at the end of a session.

use crate::error::{DomainError, DomainResult};
use crate::metrics::MetricsFrame;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::time::Duration;
use tracing::debug;

// ============================================================================
// Identifiers and Priority
// ============================================================================

/// Stable identifier of an alert definition (e.g. "no_face").
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AlertId(String);

impl AlertId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AlertId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for AlertId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl Borrow<str> for AlertId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Display priority of an alert.
///
/// Ordering is `Low < Medium < High < Critical`. Priority only orders
/// alerts that are active at the same time; it never suppresses one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AlertPriority {
    Low,
    Medium,
    High,
    Critical,
}

impl AlertPriority {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Low => "LOW",
            Self::Medium => "MEDIUM",
            Self::High => "HIGH",
            Self::Critical => "CRITICAL",
        }
    }
}

impl fmt::Display for AlertPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

// ============================================================================
// Definitions
// ============================================================================

/// Predicate deciding whether an alert condition holds for a frame.
pub type AlertPredicate = fn(&MetricsFrame) -> bool;

/// Immutable description of one alert.
#[derive(Debug, Clone)]
pub struct AlertDefinition {
    id: AlertId,
    message: String,
    priority: AlertPriority,
    cooldown: Duration,
    predicate: AlertPredicate,
}

impl AlertDefinition {
    pub fn new(
        id: impl Into<String>,
        message: impl Into<String>,
        priority: AlertPriority,
        cooldown: Duration,
        predicate: AlertPredicate,
    ) -> Self {
        Self {
            id: AlertId::new(id),
            message: message.into(),
            priority,
            cooldown,
            predicate,
        }
    }

    pub fn id(&self) -> &AlertId {
        &self.id
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn priority(&self) -> AlertPriority {
        self.priority
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    /// Evaluates the predicate against a frame.
    pub fn matches(&self, frame: &MetricsFrame) -> bool {
        (self.predicate)(frame)
    }

    fn to_active(&self, fired_at: DateTime<Utc>) -> ActiveAlert {
        ActiveAlert {
            id: self.id.clone(),
            message: self.message.clone(),
            priority: self.priority,
            fired_at,
        }
    }
}

/// Yawn count alert condition.
///
/// Holds only when the cumulative count is a positive multiple of three,
/// so the alert samples every third yawn rather than every one.
pub fn yawn_count_is_multiple_of_three(frame: &MetricsFrame) -> bool {
    frame
        .yawn_count()
        .is_some_and(|count| count > 0 && count % 3 == 0)
}

/// The built-in alert set used by monitoring sessions.
pub fn default_definitions() -> Vec<AlertDefinition> {
    vec![
        AlertDefinition::new(
            "no_face",
            "No face detected",
            AlertPriority::Critical,
            Duration::from_secs(10),
            MetricsFrame::face_missing,
        ),
        AlertDefinition::new(
            "eye_closure_perclos",
            "Your eyes are closing frequently",
            AlertPriority::High,
            Duration::from_secs(15),
            MetricsFrame::perclos_over_threshold,
        ),
        AlertDefinition::new(
            "eye_closure",
            "Keep your eyes open",
            AlertPriority::High,
            Duration::from_secs(15),
            MetricsFrame::eyes_closed_sustained,
        ),
        AlertDefinition::new(
            "yawn",
            "Sleepy, huh?",
            AlertPriority::Low,
            Duration::from_secs(20),
            MetricsFrame::is_yawning,
        ),
        AlertDefinition::new(
            "yawn_count",
            "You yawned too much, maybe you need a break?",
            AlertPriority::Low,
            Duration::from_secs(20),
            yawn_count_is_multiple_of_three,
        ),
        AlertDefinition::new(
            "head_pose",
            "Keep your head facing forward",
            AlertPriority::Medium,
            Duration::from_secs(12),
            MetricsFrame::head_pose_deviated,
        ),
        AlertDefinition::new(
            "gaze_off_road",
            "Keep your eyes on the road",
            AlertPriority::Medium,
            Duration::from_secs(10),
            MetricsFrame::gaze_off_road,
        ),
        AlertDefinition::new(
            "phone_usage",
            "Put down your phone",
            AlertPriority::Critical,
            Duration::from_secs(10),
            MetricsFrame::phone_in_use,
        ),
    ]
}

// ============================================================================
// Firings
// ============================================================================

/// Per-alert firing record. Absent until the alert first fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertFiring {
    /// When the alert last fired.
    pub fired_at: DateTime<Utc>,
    /// Number of firings since the evaluator was last reset.
    pub count: u32,
}

/// An alert as shown to the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveAlert {
    pub id: AlertId,
    pub message: String,
    pub priority: AlertPriority,
    pub fired_at: DateTime<Utc>,
}

/// Returns true once at least `cooldown` has passed since `last`.
///
/// A clock that moved backwards counts as still cooling down.
fn cooldown_elapsed(last: DateTime<Utc>, now: DateTime<Utc>, cooldown: Duration) -> bool {
    now.signed_duration_since(last)
        .to_std()
        .map(|elapsed| elapsed >= cooldown)
        .unwrap_or(false)
}

fn sort_by_priority(alerts: &mut [ActiveAlert]) {
    // Stable: equal priorities keep definition order
    alerts.sort_by(|a, b| b.priority.cmp(&a.priority));
}

// ============================================================================
// Evaluator
// ============================================================================

/// Evaluates alert definitions against telemetry frames.
///
/// Holds the firing records of one monitoring session. Each alert's
/// cooldown clock is independent of all others.
#[derive(Debug, Clone)]
pub struct AlertEvaluator {
    definitions: Vec<AlertDefinition>,
    firings: HashMap<AlertId, AlertFiring>,
}

impl Default for AlertEvaluator {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl AlertEvaluator {
    /// Creates an evaluator over a custom definition set.
    pub fn new(definitions: Vec<AlertDefinition>) -> Self {
        Self {
            definitions,
            firings: HashMap::new(),
        }
    }

    /// Creates an evaluator over [`default_definitions`].
    pub fn with_defaults() -> Self {
        Self::new(default_definitions())
    }

    pub fn definitions(&self) -> &[AlertDefinition] {
        &self.definitions
    }

    /// Evaluates a frame at the current wall-clock time.
    pub fn evaluate(&mut self, frame: &MetricsFrame) -> Vec<ActiveAlert> {
        self.evaluate_at(frame, Utc::now())
    }

    /// Evaluates a frame at `now`.
    ///
    /// Returns the alerts that fired on this tick, highest priority first.
    /// Alerts whose predicate holds but are still inside their cooldown
    /// are suppressed and not returned.
    pub fn evaluate_at(&mut self, frame: &MetricsFrame, now: DateTime<Utc>) -> Vec<ActiveAlert> {
        let mut fired = Vec::new();

        for definition in &self.definitions {
            if !definition.matches(frame) {
                continue;
            }

            let due = match self.firings.get(definition.id()) {
                None => true,
                Some(previous) => cooldown_elapsed(previous.fired_at, now, definition.cooldown),
            };

            if !due {
                debug!(alert_id = %definition.id(), "Alert suppressed by cooldown");
                continue;
            }

            let count = self
                .firings
                .get(definition.id())
                .map_or(0, |f| f.count)
                .saturating_add(1);
            self.firings.insert(
                definition.id().clone(),
                AlertFiring {
                    fired_at: now,
                    count,
                },
            );

            debug!(
                alert_id = %definition.id(),
                priority = %definition.priority(),
                count,
                "Alert fired"
            );
            fired.push(definition.to_active(now));
        }

        sort_by_priority(&mut fired);
        fired
    }

    /// Returns every alert that has fired this session, highest priority first.
    ///
    /// This is the display set: an alert stays here after its condition
    /// clears, showing its most recent firing.
    pub fn active_alerts(&self) -> Vec<ActiveAlert> {
        let mut alerts: Vec<ActiveAlert> = self
            .definitions
            .iter()
            .filter_map(|d| self.firings.get(d.id()).map(|f| d.to_active(f.fired_at)))
            .collect();
        sort_by_priority(&mut alerts);
        alerts
    }

    /// Returns the firing record of an alert, if it has fired.
    pub fn firing(&self, alert_id: &str) -> Option<&AlertFiring> {
        self.firings.get(alert_id)
    }

    /// Looks up a definition by id.
    pub fn definition(&self, alert_id: &str) -> DomainResult<&AlertDefinition> {
        self.definitions
            .iter()
            .find(|d| d.id().as_str() == alert_id)
            .ok_or_else(|| DomainError::UnknownAlert {
                alert_id: alert_id.to_string(),
            })
    }

    /// Firing counts keyed by alert id.
    pub fn firing_counts(&self) -> BTreeMap<String, u32> {
        self.firings
            .iter()
            .map(|(id, firing)| (id.to_string(), firing.count))
            .collect()
    }

    /// Discards all firing records.
    pub fn reset(&mut self) {
        self.firings.clear();
    }
}
