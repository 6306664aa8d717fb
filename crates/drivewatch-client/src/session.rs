//! Monitoring session state machine.
//!
//! `MonitoringSession` couples the user's start/stop intent to the peer
//! controller's connection lifecycle:
//!
//! | From | Trigger | To |
//! |------|---------|----|
//! | idle | `start()` | starting |
//! | starting | connection `connected` | active |
//! | active | `stop()` | stopping |
//! | stopping | connection `closed` | idle |
//! | starting, active | connection `failed` | idle |
//!
//! Telemetry is only accepted while active. Every change is published as
//! a [`SessionSnapshot`] on a `watch` channel for the rendering layer.
//!
//! **Panic-Free Policy:** This module follows the project's panic-free guidelines.
//! No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, or `todo!()`.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use drivewatch_core::{
    ActiveAlert, AlertEvaluator, ConnectionState, MetricsFrame, SessionState, SessionSummary,
    TransportStatus,
};

use crate::error::{ClientError, Result};
use crate::peer::{ControllerUpdate, PeerSessionController, SessionInput};
use crate::store::SummaryStore;

// ============================================================================
// Snapshot
// ============================================================================

/// Everything the rendering layer needs to draw the session.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SessionSnapshot {
    pub session_state: SessionState,
    pub connection_state: ConnectionState,
    pub transport_status: TransportStatus,
    pub client_id: Option<String>,
    pub error: Option<String>,
    pub latest_frame: Option<MetricsFrame>,
    /// Alerts that have fired this session, highest priority first.
    pub alerts: Vec<ActiveAlert>,
}

/// User intent sent to a running session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionCommand {
    Start,
    Stop,
}

// ============================================================================
// Session Handle
// ============================================================================

/// Cheap-to-clone handle to a session driven by [`MonitoringSession::run`].
#[derive(Debug, Clone)]
pub struct SessionHandle {
    commands: mpsc::UnboundedSender<SessionCommand>,
    snapshots: watch::Receiver<SessionSnapshot>,
}

impl SessionHandle {
    /// Requests a start. Ignored by the session unless it is idle.
    ///
    /// # Errors
    ///
    /// `ClientError::Transport` if the session loop has exited.
    pub fn start(&self) -> Result<()> {
        self.send(SessionCommand::Start)
    }

    /// Requests a stop. Ignored by the session unless it is active.
    pub fn stop(&self) -> Result<()> {
        self.send(SessionCommand::Stop)
    }

    fn send(&self, command: SessionCommand) -> Result<()> {
        self.commands
            .send(command)
            .map_err(|_| ClientError::Transport("session loop has stopped".to_string()))
    }

    /// Latest published snapshot.
    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshots.borrow().clone()
    }

    /// Receiver notified on every published snapshot.
    pub fn watch(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshots.clone()
    }
}

// ============================================================================
// Monitoring Session
// ============================================================================

/// Coordinates start/stop intent with the peer connection lifecycle.
pub struct MonitoringSession {
    controller: PeerSessionController,
    state: SessionState,
    latest_frame: Option<MetricsFrame>,
    alerts: AlertEvaluator,

    /// Open while the session is (or was last) active.
    summary: Option<SessionSummary>,
    store: Option<Arc<dyn SummaryStore>>,

    snapshot_tx: watch::Sender<SessionSnapshot>,
}

impl MonitoringSession {
    pub fn new(controller: PeerSessionController) -> Self {
        Self::with_evaluator(controller, AlertEvaluator::with_defaults())
    }

    pub fn with_evaluator(controller: PeerSessionController, alerts: AlertEvaluator) -> Self {
        let (snapshot_tx, _) = watch::channel(SessionSnapshot {
            connection_state: controller.connection_state(),
            ..Default::default()
        });
        Self {
            controller,
            state: SessionState::Idle,
            latest_frame: None,
            alerts,
            summary: None,
            store: None,
            snapshot_tx,
        }
    }

    /// Persists a summary to `store` each time an active session ends.
    pub fn with_store(mut self, store: Arc<dyn SummaryStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn latest_frame(&self) -> Option<&MetricsFrame> {
        self.latest_frame.as_ref()
    }

    pub fn alerts(&self) -> &AlertEvaluator {
        &self.alerts
    }

    pub fn controller(&self) -> &PeerSessionController {
        &self.controller
    }

    pub fn controller_mut(&mut self) -> &mut PeerSessionController {
        &mut self.controller
    }

    /// Builds a snapshot of the current state.
    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            session_state: self.state,
            connection_state: self.controller.connection_state(),
            transport_status: self.controller.transport_status(),
            client_id: self.controller.client_id().map(str::to_string),
            error: self.controller.error().map(str::to_string),
            latest_frame: self.latest_frame.clone(),
            alerts: self.alerts.active_alerts(),
        }
    }

    /// Receiver notified on every published snapshot.
    pub fn watch(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshot_tx.subscribe()
    }

    fn publish(&self) {
        self.snapshot_tx.send_replace(self.snapshot());
    }

    // ------------------------------------------------------------------------
    // Intent
    // ------------------------------------------------------------------------

    /// Starts monitoring. Does nothing unless idle.
    ///
    /// # Errors
    ///
    /// Returns the controller's start error. The session is back to idle
    /// and the error text is populated.
    pub async fn start(&mut self) -> Result<()> {
        if self.state != SessionState::Idle {
            debug!(state = %self.state, "Ignoring start while not idle");
            return Ok(());
        }

        self.transition(SessionState::Starting);
        self.publish();

        let result = self.controller.start().await;
        if let Err(e) = &result {
            warn!(error = %e, "Monitoring session failed to start");
            self.enter_idle();
        }
        self.publish();
        result
    }

    /// Stops monitoring. Does nothing unless active.
    pub fn stop(&mut self) {
        if self.state != SessionState::Active {
            debug!(state = %self.state, "Ignoring stop while not active");
            return;
        }

        self.transition(SessionState::Stopping);
        self.sync_summary();
        self.controller.cleanup();
        self.apply_connection_state(self.controller.connection_state());
        self.publish();
    }

    // ------------------------------------------------------------------------
    // Inputs
    // ------------------------------------------------------------------------

    /// Applies one queued input from the controller.
    pub async fn handle_input(&mut self, input: SessionInput) {
        let Some(update) = self.controller.handle_input(input).await else {
            return;
        };

        match update {
            ControllerUpdate::ConnectionState(state) => self.apply_connection_state(state),
            ControllerUpdate::Telemetry(frame) => {
                self.on_frame(frame);
            }
            ControllerUpdate::Transport(status) => {
                debug!(status = %status, "Transport status update");
            }
            ControllerUpdate::Signaling => {}
        }
        self.sync_summary();
        self.publish();
    }

    /// Processes every input already queued, without waiting.
    pub async fn drain_inputs(&mut self) {
        while let Some(input) = self.controller.try_next_input() {
            self.handle_input(input).await;
        }
    }

    /// Accepts a telemetry frame, returning the alerts it fired.
    ///
    /// Frames are ignored unless the session is active.
    pub fn on_frame(&mut self, frame: MetricsFrame) -> Vec<ActiveAlert> {
        self.on_frame_at(frame, Utc::now())
    }

    /// Like [`on_frame`](Self::on_frame) with an explicit evaluation time.
    pub fn on_frame_at(&mut self, frame: MetricsFrame, now: DateTime<Utc>) -> Vec<ActiveAlert> {
        if self.state != SessionState::Active {
            debug!(state = %self.state, "Ignoring telemetry while not active");
            return Vec::new();
        }

        let fired = self.alerts.evaluate_at(&frame, now);
        for alert in &fired {
            info!(
                alert = %alert.id,
                priority = %alert.priority,
                message = %alert.message,
                "Alert fired"
            );
        }

        if let Some(summary) = self.summary.as_mut() {
            summary.frames_received = summary.frames_received.saturating_add(1);
        }
        self.latest_frame = Some(frame);
        fired
    }

    fn apply_connection_state(&mut self, connection: ConnectionState) {
        let Some(next) = self.state.on_connection_state(connection) else {
            return;
        };

        match next {
            SessionState::Active => {
                self.transition(SessionState::Active);
                self.summary = Some(SessionSummary::begin(
                    self.controller.client_id().map(str::to_string),
                    Utc::now(),
                ));
            }
            SessionState::Idle => self.enter_idle(),
            SessionState::Starting | SessionState::Stopping => self.transition(next),
        }
    }

    fn transition(&mut self, next: SessionState) {
        if self.state != next {
            info!(from = %self.state, to = %next, "Session state changed");
            self.state = next;
        }
    }

    /// Returns to idle, clearing the frame and closing out the summary.
    fn enter_idle(&mut self) {
        self.transition(SessionState::Idle);
        self.latest_frame = None;
        self.finish_summary();
        self.alerts.reset();
    }

    fn sync_summary(&mut self) {
        let Some(summary) = self.summary.as_mut() else {
            return;
        };
        if summary.client_id.is_none() {
            summary.client_id = self.controller.client_id().map(str::to_string);
        }
    }

    fn finish_summary(&mut self) {
        let Some(mut summary) = self.summary.take() else {
            return;
        };
        summary.ended_at = Utc::now();
        summary.alert_counts = self.alerts.firing_counts();
        summary.error = self.controller.error().map(str::to_string);

        info!(
            client_id = ?summary.client_id,
            frames = summary.frames_received,
            alerts = summary.total_alerts(),
            duration = %summary.duration_display(),
            "Monitoring session ended"
        );

        if let Some(store) = &self.store {
            if let Err(e) = store.save(&summary) {
                warn!(error = %e, "Failed to save session summary");
            }
        }
    }

    // ------------------------------------------------------------------------
    // Driver
    // ------------------------------------------------------------------------

    /// Spawns [`run`](Self::run) and returns a handle to it.
    pub fn spawn(self, cancel_token: CancellationToken) -> SessionHandle {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let handle = SessionHandle {
            commands: commands_tx,
            snapshots: self.watch(),
        };
        tokio::spawn(self.run(commands_rx, cancel_token));
        handle
    }

    /// Drives the session until cancelled or the command channel closes.
    ///
    /// Commands and controller inputs are handled one at a time, so each
    /// input's peer operations complete before the next input is taken.
    pub async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<SessionCommand>,
        cancel_token: CancellationToken,
    ) {
        info!("Monitoring session loop starting");
        self.publish();

        loop {
            tokio::select! {
                biased;

                _ = cancel_token.cancelled() => {
                    info!("Monitoring session loop shutting down (cancelled)");
                    break;
                }

                command = commands.recv() => match command {
                    Some(SessionCommand::Start) => {
                        if let Err(e) = self.start().await {
                            warn!(error = %e, "Start request failed");
                        }
                    }
                    Some(SessionCommand::Stop) => self.stop(),
                    None => {
                        debug!("Command channel closed");
                        break;
                    }
                },

                input = self.controller.next_input() => match input {
                    Some(input) => self.handle_input(input).await,
                    None => break,
                },
            }
        }

        self.shutdown();
        info!("Monitoring session loop stopped");
    }

    /// Tears everything down regardless of state.
    pub fn shutdown(&mut self) {
        if self.state == SessionState::Idle {
            self.controller.cleanup();
            self.publish();
            return;
        }

        self.sync_summary();
        self.controller.cleanup();
        self.enter_idle();
        self.publish();
    }
}

impl std::fmt::Debug for MonitoringSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MonitoringSession")
            .field("state", &self.state)
            .field("controller", &self.controller)
            .finish()
    }
}
