//! Peer session controller.
//!
//! The controller owns one peer connection and one signaling channel per
//! session and drives the offer/answer/ICE exchange between them. The media
//! engine itself is opaque: it is reached through the [`PeerConnection`],
//! [`PeerConnectionFactory`] and [`MediaSource`] traits.
//!
//! Network completions never touch controller state directly. Socket
//! readers and peer callbacks enqueue [`SessionInput`]s onto one queue, and
//! the owner feeds them back through [`PeerSessionController::handle_input`]
//! one at a time. Each input is tagged with the epoch it was produced in;
//! [`cleanup`](PeerSessionController::cleanup) advances the epoch so that
//! completions from a torn-down session are dropped.
//!
//! **Panic-Free Policy:** This module follows the project's panic-free guidelines.
//! No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, or `todo!()`.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use drivewatch_core::{ConnectionState, MetricsFrame, TransportStatus};
use drivewatch_protocol::{parse_metrics_frame, IceCandidatePayload, SdpType, SignalingMessage};

use crate::config::{ClientConfig, RtcConfiguration};
use crate::error::{ClientError, Result};
use crate::signaling::{MessageHandler, SignalingChannel, SubscriberRegistry, SubscriptionId};

/// Error text shown when the peer connection reports `failed`.
pub const CONNECTION_FAILED_MESSAGE: &str = "WebRTC connection failed";

/// Error text shown when the signaling server drops the transport.
pub const TRANSPORT_CLOSED_MESSAGE: &str = "Transport error: WebSocket closed";

// ============================================================================
// Media
// ============================================================================

/// Kind of a media track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackKind {
    Audio,
    Video,
}

/// One track of a local media source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaTrack {
    pub id: String,
    pub kind: TrackKind,
}

impl MediaTrack {
    pub fn new(id: impl Into<String>, kind: TrackKind) -> Self {
        Self {
            id: id.into(),
            kind,
        }
    }
}

/// A local capture source (typically the driver-facing camera).
pub trait MediaSource: Send + Sync {
    /// Stream id the tracks are grouped under.
    fn id(&self) -> &str;

    /// Tracks to attach to the peer connection.
    fn tracks(&self) -> Vec<MediaTrack>;
}

// ============================================================================
// Peer Connection
// ============================================================================

/// A session description produced or consumed by the peer connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionDescription {
    pub sdp_type: SdpType,
    pub sdp: String,
}

/// Options for creating an offer.
///
/// The default requests neither inbound audio nor inbound video: the
/// client only sends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OfferOptions {
    pub offer_to_receive_audio: bool,
    pub offer_to_receive_video: bool,
}

/// Events reported by the peer connection.
#[derive(Debug, Clone, PartialEq)]
pub enum PeerEvent {
    /// A local ICE candidate. `None` marks the end of gathering.
    IceCandidate(Option<IceCandidatePayload>),

    /// The connection moved to a new state.
    ConnectionStateChanged(ConnectionState),

    /// A telemetry payload arrived on the data path.
    DataMessage(String),
}

/// The opaque media engine connection.
#[async_trait]
pub trait PeerConnection: Send + Sync {
    async fn add_track(&self, track: &MediaTrack, stream_id: &str) -> Result<()>;

    async fn create_offer(&self, options: OfferOptions) -> Result<SessionDescription>;

    async fn set_local_description(&self, description: SessionDescription) -> Result<()>;

    async fn set_remote_description(&self, description: SessionDescription) -> Result<()>;

    async fn add_ice_candidate(&self, candidate: IceCandidatePayload) -> Result<()>;

    /// Closes the connection. Must be safe to call more than once.
    fn close(&self);
}

/// Creates peer connections.
pub trait PeerConnectionFactory: Send + Sync {
    /// Builds a connection that reports its events through `events`.
    fn create(
        &self,
        config: &RtcConfiguration,
        events: PeerEventSender,
    ) -> Result<Arc<dyn PeerConnection>>;
}

// ============================================================================
// Session Inputs
// ============================================================================

/// Work queued for the controller's owner.
#[derive(Debug, Clone)]
pub enum SessionInput {
    /// A message from the signaling channel.
    Signaling {
        epoch: u64,
        message: SignalingMessage,
    },

    /// An event from the peer connection.
    Peer { epoch: u64, event: PeerEvent },

    /// The signaling transport changed status.
    Transport { epoch: u64, status: TransportStatus },
}

impl SessionInput {
    pub fn epoch(&self) -> u64 {
        match self {
            Self::Signaling { epoch, .. } | Self::Peer { epoch, .. } | Self::Transport { epoch, .. } => {
                *epoch
            }
        }
    }
}

/// Handed to a [`PeerConnectionFactory`] so the connection can report events.
#[derive(Debug, Clone)]
pub struct PeerEventSender {
    epoch: u64,
    tx: mpsc::UnboundedSender<SessionInput>,
}

impl PeerEventSender {
    pub fn new(epoch: u64, tx: mpsc::UnboundedSender<SessionInput>) -> Self {
        Self { epoch, tx }
    }

    /// Queues an event. Returns false once the controller is gone.
    pub fn send(&self, event: PeerEvent) -> bool {
        self.tx
            .send(SessionInput::Peer {
                epoch: self.epoch,
                event,
            })
            .is_ok()
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }
}

/// What changed after handling an input.
#[derive(Debug, Clone, PartialEq)]
pub enum ControllerUpdate {
    ConnectionState(ConnectionState),
    Transport(TransportStatus),
    Telemetry(MetricsFrame),
    /// Controller fields (client id, error) may have changed.
    Signaling,
}

// ============================================================================
// Controller
// ============================================================================

/// Owns one peer connection and its signaling channel.
pub struct PeerSessionController {
    config: ClientConfig,
    factory: Arc<dyn PeerConnectionFactory>,
    media: Option<Arc<dyn MediaSource>>,

    channel: Option<SignalingChannel>,
    peer: Option<Arc<dyn PeerConnection>>,

    connection_state: ConnectionState,
    client_id: Option<String>,
    error: Option<String>,

    epoch: u64,
    input_tx: mpsc::UnboundedSender<SessionInput>,
    input_rx: mpsc::UnboundedReceiver<SessionInput>,

    /// External observers of inbound signaling messages.
    observers: SubscriberRegistry,
}

impl PeerSessionController {
    pub fn new(config: ClientConfig, factory: Arc<dyn PeerConnectionFactory>) -> Self {
        let (input_tx, input_rx) = mpsc::unbounded_channel();
        Self {
            config,
            factory,
            media: None,
            channel: None,
            peer: None,
            connection_state: ConnectionState::New,
            client_id: None,
            error: None,
            epoch: 0,
            input_tx,
            input_rx,
            observers: SubscriberRegistry::new(),
        }
    }

    /// Sets (or clears) the local media source used by the next start.
    pub fn set_media_source(&mut self, media: Option<Arc<dyn MediaSource>>) {
        self.media = media;
    }

    pub fn has_media_source(&self) -> bool {
        self.media.is_some()
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection_state
    }

    pub fn transport_status(&self) -> TransportStatus {
        self.channel
            .as_ref()
            .map(SignalingChannel::status)
            .unwrap_or(TransportStatus::Closed)
    }

    pub fn client_id(&self) -> Option<&str> {
        self.client_id.as_deref()
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Registers an observer for every inbound signaling message.
    ///
    /// Observers run after the controller has handled the message.
    pub fn subscribe(&mut self, handler: MessageHandler) -> SubscriptionId {
        self.observers.subscribe(handler)
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        self.observers.unsubscribe(id)
    }

    // ------------------------------------------------------------------------
    // Start
    // ------------------------------------------------------------------------

    /// Opens signaling, creates the peer connection and sends the offer.
    ///
    /// Any previous channel and peer connection are torn down first.
    ///
    /// # Errors
    ///
    /// - `ClientError::MediaUnavailable` if no media source is set. Nothing
    ///   touches the network in that case.
    /// - Any transport or negotiation failure. The error text becomes
    ///   `Connection error: ...` and the connection state `failed`.
    pub async fn start(&mut self) -> Result<()> {
        let Some(media) = self.media.clone() else {
            warn!("Cannot start monitoring without a media source");
            self.error = Some(ClientError::MediaUnavailable.to_string());
            return Err(ClientError::MediaUnavailable);
        };

        self.cleanup();
        info!(
            url = %self.config.signaling_url,
            epoch = self.epoch,
            "Starting peer session"
        );

        if let Err(e) = self.negotiate(media).await {
            error!(error = %e, "Failed to start peer session");
            self.teardown();
            self.connection_state = ConnectionState::Failed;
            self.error = Some(format!("Connection error: {e}"));
            return Err(e);
        }
        Ok(())
    }

    async fn negotiate(&mut self, media: Arc<dyn MediaSource>) -> Result<()> {
        let epoch = self.epoch;

        let mut channel = SignalingChannel::new(self.config.signaling_url.clone());
        let tx = self.input_tx.clone();
        channel.on_message(Arc::new(move |message: &SignalingMessage| {
            let _ = tx.send(SessionInput::Signaling {
                epoch,
                message: message.clone(),
            });
        }));
        self.forward_transport_status(&channel, epoch);

        channel.connect().await?;
        self.channel = Some(channel);

        let peer = self.factory.create(
            &self.config.rtc,
            PeerEventSender::new(epoch, self.input_tx.clone()),
        )?;
        self.peer = Some(Arc::clone(&peer));
        self.connection_state = ConnectionState::New;

        for track in media.tracks() {
            debug!(track = %track.id, kind = ?track.kind, "Attaching track");
            peer.add_track(&track, media.id()).await?;
        }

        let offer = peer.create_offer(OfferOptions::default()).await?;
        peer.set_local_description(offer.clone()).await?;
        self.send(&SignalingMessage::offer(offer.sdp))?;

        info!("Offer sent");
        Ok(())
    }

    fn forward_transport_status(&self, channel: &SignalingChannel, epoch: u64) {
        let mut status_rx = channel.watch_status();
        let tx = self.input_tx.clone();
        tokio::spawn(async move {
            while status_rx.changed().await.is_ok() {
                let status = *status_rx.borrow_and_update();
                if tx.send(SessionInput::Transport { epoch, status }).is_err() {
                    break;
                }
            }
        });
    }

    fn send(&self, message: &SignalingMessage) -> Result<()> {
        match &self.channel {
            Some(channel) => channel.send(message),
            None => Err(ClientError::Transport("WebSocket is not open".to_string())),
        }
    }

    // ------------------------------------------------------------------------
    // Inputs
    // ------------------------------------------------------------------------

    /// Waits for the next queued input.
    ///
    /// Cancel safe.
    pub async fn next_input(&mut self) -> Option<SessionInput> {
        self.input_rx.recv().await
    }

    /// Takes a queued input without waiting.
    pub fn try_next_input(&mut self) -> Option<SessionInput> {
        self.input_rx.try_recv().ok()
    }

    /// Applies one input. Inputs from an earlier epoch are ignored.
    pub async fn handle_input(&mut self, input: SessionInput) -> Option<ControllerUpdate> {
        if input.epoch() != self.epoch {
            debug!(
                input_epoch = input.epoch(),
                epoch = self.epoch,
                "Dropping input from a previous session"
            );
            return None;
        }

        match input {
            SessionInput::Signaling { message, .. } => {
                self.handle_signaling(&message).await;
                self.observers.dispatch(&message);
                Some(ControllerUpdate::Signaling)
            }
            SessionInput::Peer { event, .. } => self.handle_peer_event(event),
            SessionInput::Transport { status, .. } => Some(self.handle_transport_status(status)),
        }
    }

    /// A close of the current channel that `teardown` did not start ends the
    /// session as failed.
    fn handle_transport_status(&mut self, status: TransportStatus) -> ControllerUpdate {
        if status != TransportStatus::Closed || self.channel.is_none() {
            return ControllerUpdate::Transport(status);
        }

        warn!(from = %self.connection_state, "Signaling transport closed by the server");
        self.teardown();
        self.connection_state = ConnectionState::Failed;
        self.error = Some(TRANSPORT_CLOSED_MESSAGE.to_string());
        ControllerUpdate::ConnectionState(ConnectionState::Failed)
    }

    async fn handle_signaling(&mut self, message: &SignalingMessage) {
        match message {
            SignalingMessage::Welcome { client_id, .. } => {
                info!(client_id = %client_id, "Welcome received");
                self.client_id = Some(client_id.clone());
            }
            SignalingMessage::Answer { sdp, sdp_type } => {
                let Some(peer) = self.peer.clone() else {
                    warn!("Answer received without a peer connection");
                    return;
                };
                let description = SessionDescription {
                    sdp_type: *sdp_type,
                    sdp: sdp.clone(),
                };
                match peer.set_remote_description(description).await {
                    Ok(()) => debug!("Remote description set"),
                    Err(e) => {
                        warn!(error = %e, "Failed to apply answer");
                        self.error = Some(format!("Signaling error: {e}"));
                    }
                }
            }
            SignalingMessage::IceCandidate { candidate } => {
                let Some(peer) = self.peer.clone() else {
                    warn!("ICE candidate received without a peer connection");
                    return;
                };
                if let Err(e) = peer.add_ice_candidate(candidate.clone()).await {
                    warn!(error = %e, "Failed to add remote ICE candidate");
                    self.error = Some(format!("Signaling error: {e}"));
                }
            }
            SignalingMessage::Error { message } => {
                warn!(message = %message, "Signaling server reported an error");
                self.error = Some(message.clone());
            }
            SignalingMessage::Offer { .. } => {
                warn!("Unexpected offer from signaling server, dropping");
            }
        }
    }

    fn handle_peer_event(&mut self, event: PeerEvent) -> Option<ControllerUpdate> {
        match event {
            PeerEvent::IceCandidate(Some(candidate)) => {
                match self.send(&SignalingMessage::ice_candidate(candidate)) {
                    Ok(()) => None,
                    Err(e) => {
                        warn!(error = %e, "Failed to send local ICE candidate");
                        self.error = Some(e.to_string());
                        Some(ControllerUpdate::Signaling)
                    }
                }
            }
            PeerEvent::IceCandidate(None) => {
                debug!("ICE gathering complete");
                None
            }
            PeerEvent::ConnectionStateChanged(state) => {
                info!(from = %self.connection_state, to = %state, "Connection state changed");
                self.connection_state = state;
                if state == ConnectionState::Failed {
                    self.error = Some(CONNECTION_FAILED_MESSAGE.to_string());
                    self.teardown();
                }
                Some(ControllerUpdate::ConnectionState(state))
            }
            PeerEvent::DataMessage(text) => match parse_metrics_frame(&text) {
                Ok(frame) => Some(ControllerUpdate::Telemetry(frame)),
                Err(e) => {
                    warn!(error = %e, "Dropping malformed telemetry frame");
                    None
                }
            },
        }
    }

    // ------------------------------------------------------------------------
    // Cleanup
    // ------------------------------------------------------------------------

    /// Disconnects signaling, closes the peer connection and resets state.
    ///
    /// Idempotent. Completions still in flight from the torn-down session
    /// are ignored once this returns.
    pub fn cleanup(&mut self) {
        self.teardown();
        self.client_id = None;
        self.error = None;
        self.connection_state = ConnectionState::Closed;
    }

    /// Releases the channel and peer connection without touching the error.
    fn teardown(&mut self) {
        self.epoch = self.epoch.wrapping_add(1);

        if let Some(mut channel) = self.channel.take() {
            channel.disconnect();
        }
        if let Some(peer) = self.peer.take() {
            peer.close();
            debug!("Peer connection closed");
        }
    }
}

impl std::fmt::Debug for PeerSessionController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerSessionController")
            .field("connection_state", &self.connection_state)
            .field("client_id", &self.client_id)
            .field("error", &self.error)
            .field("epoch", &self.epoch)
            .finish()
    }
}
