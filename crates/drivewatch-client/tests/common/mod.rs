//! Shared helpers for integration tests.
//!
//! Tests CAN use `.unwrap()` and `.expect()`.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::{accept_async, tungstenite::Message};

use drivewatch_client::{
    ClientError, MediaSource, MediaTrack, OfferOptions, PeerConnection, PeerConnectionFactory,
    PeerEventSender, Result, RtcConfiguration, SessionDescription, TrackKind,
};
use drivewatch_protocol::{decode_signaling, encode_signaling, IceCandidatePayload, SdpType, SignalingMessage};

/// Upper bound for any single wait in a test.
pub const WAIT_TIMEOUT: Duration = Duration::from_secs(2);

// ============================================================================
// Test Coordinator
// ============================================================================

/// A single-connection WebSocket server standing in for the coordinator.
pub struct TestCoordinator {
    pub url: String,
    inbound: mpsc::UnboundedReceiver<String>,
    outbound: mpsc::UnboundedSender<Message>,
}

impl TestCoordinator {
    /// Binds to an ephemeral port and accepts one client in the background.
    pub async fn spawn() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind listener");
        let addr = listener.local_addr().expect("local addr");
        let (inbound_tx, inbound) = mpsc::unbounded_channel();
        let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<Message>();

        tokio::spawn(async move {
            let Ok((stream, _)) = listener.accept().await else {
                return;
            };
            let Ok(ws) = accept_async(stream).await else {
                return;
            };
            let (mut sink, mut source) = ws.split();

            loop {
                tokio::select! {
                    frame = source.next() => match frame {
                        Some(Ok(Message::Text(text))) => {
                            if inbound_tx.send(text).is_err() {
                                break;
                            }
                        }
                        Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                        Some(Ok(_)) => {}
                    },
                    next = outbound_rx.recv() => match next {
                        Some(message) => {
                            let closing = matches!(message, Message::Close(_));
                            if sink.send(message).await.is_err() || closing {
                                break;
                            }
                        }
                        None => break,
                    },
                }
            }
        });

        Self {
            url: format!("ws://{addr}/ws/driver-monitoring"),
            inbound,
            outbound,
        }
    }

    /// Next message from the client, or `None` once it disconnected.
    pub async fn recv(&mut self) -> Option<SignalingMessage> {
        let text = timeout(WAIT_TIMEOUT, self.inbound.recv())
            .await
            .expect("timed out waiting for client message")?;
        Some(decode_signaling(&text).expect("client sent a valid message"))
    }

    /// Waits until the client's connection is gone.
    pub async fn wait_closed(&mut self) {
        loop {
            let next = timeout(WAIT_TIMEOUT, self.inbound.recv())
                .await
                .expect("timed out waiting for client to disconnect");
            if next.is_none() {
                return;
            }
        }
    }

    pub fn send(&self, message: &SignalingMessage) {
        let text = encode_signaling(message).expect("encode");
        self.send_text(&text);
    }

    pub fn send_text(&self, text: &str) {
        self.outbound
            .send(Message::Text(text.to_string()))
            .expect("coordinator task alive");
    }

    /// Closes the connection from the server side.
    pub fn close(&self) {
        let _ = self.outbound.send(Message::Close(None));
    }
}

/// Returns a ws:// URL nothing is listening on.
pub async fn unreachable_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind listener");
    let addr = listener.local_addr().expect("local addr");
    drop(listener);
    format!("ws://{addr}/ws/driver-monitoring")
}

// ============================================================================
// Fake Media Engine
// ============================================================================

/// A camera with one video track.
pub struct FakeCamera;

impl MediaSource for FakeCamera {
    fn id(&self) -> &str {
        "camera-0"
    }

    fn tracks(&self) -> Vec<MediaTrack> {
        vec![MediaTrack::new("video-0", TrackKind::Video)]
    }
}

/// Peer connection that records every call.
#[derive(Default)]
pub struct FakePeer {
    calls: Mutex<Vec<String>>,
    pub offer_options: Mutex<Option<OfferOptions>>,
}

impl FakePeer {
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: impl Into<String>) {
        self.calls.lock().unwrap().push(call.into());
    }
}

#[async_trait]
impl PeerConnection for FakePeer {
    async fn add_track(&self, track: &MediaTrack, stream_id: &str) -> Result<()> {
        self.record(format!("add_track:{}:{stream_id}", track.id));
        Ok(())
    }

    async fn create_offer(&self, options: OfferOptions) -> Result<SessionDescription> {
        self.record("create_offer");
        *self.offer_options.lock().unwrap() = Some(options);
        Ok(SessionDescription {
            sdp_type: SdpType::Offer,
            sdp: "v=0 fake-offer".to_string(),
        })
    }

    async fn set_local_description(&self, description: SessionDescription) -> Result<()> {
        self.record(format!("set_local:{}", description.sdp_type));
        Ok(())
    }

    async fn set_remote_description(&self, description: SessionDescription) -> Result<()> {
        self.record(format!("set_remote:{}", description.sdp));
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidatePayload) -> Result<()> {
        self.record(format!("add_ice:{}", candidate.candidate));
        Ok(())
    }

    fn close(&self) {
        self.record("close");
    }
}

/// Factory handing out one shared [`FakePeer`] and keeping its event sender.
#[derive(Default)]
pub struct FakeFactory {
    pub peer: Arc<FakePeer>,
    events: Mutex<Option<PeerEventSender>>,
    pub configs: Mutex<Vec<RtcConfiguration>>,
    pub fail: bool,
}

impl FakeFactory {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    /// Event sender of the most recently created peer connection.
    pub fn events(&self) -> PeerEventSender {
        self.events
            .lock()
            .unwrap()
            .clone()
            .expect("peer connection was created")
    }
}

impl PeerConnectionFactory for FakeFactory {
    fn create(
        &self,
        config: &RtcConfiguration,
        events: PeerEventSender,
    ) -> Result<Arc<dyn PeerConnection>> {
        if self.fail {
            return Err(ClientError::Negotiation("media engine unavailable".to_string()));
        }
        self.configs.lock().unwrap().push(config.clone());
        *self.events.lock().unwrap() = Some(events);
        let peer: Arc<dyn PeerConnection> = self.peer.clone();
        Ok(peer)
    }
}
