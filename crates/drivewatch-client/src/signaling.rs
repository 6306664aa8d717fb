//! WebSocket transport to the signaling coordinator.
//!
//! The `SignalingChannel` carries [`SignalingMessage`]s and nothing else: it
//! has no knowledge of sessions or peer connections. Inbound messages are
//! fanned out to a [`SubscriberRegistry`] in registration order.
//!
//! Transport status moves `closed → connecting → open → closing → closed`,
//! or `connecting → closed` when the handshake fails. A close initiated by
//! the server moves `open → closed` directly.
//!
//! **Panic-Free Policy:** This module follows the project's panic-free guidelines.
//! No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, or `todo!()`.

use std::sync::{Arc, Mutex, PoisonError};

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use drivewatch_core::TransportStatus;
use drivewatch_protocol::{decode_signaling, encode_signaling, SignalingMessage};

use crate::error::{ClientError, Result};

/// Callback invoked for every inbound signaling message.
pub type MessageHandler = Arc<dyn Fn(&SignalingMessage) + Send + Sync>;

// ============================================================================
// Subscriber Registry
// ============================================================================

/// Identifies a registered handler so it can be removed later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Ordered set of message handlers.
#[derive(Default)]
pub struct SubscriberRegistry {
    next_id: u64,
    handlers: Vec<(SubscriptionId, MessageHandler)>,
}

impl SubscriberRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler. Handlers run in the order they were added.
    pub fn subscribe(&mut self, handler: MessageHandler) -> SubscriptionId {
        let id = SubscriptionId(self.next_id);
        self.next_id = self.next_id.wrapping_add(1);
        self.handlers.push((id, handler));
        id
    }

    /// Removes a handler. Returns false if it was not registered.
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.handlers.len();
        self.handlers.retain(|(existing, _)| *existing != id);
        self.handlers.len() != before
    }

    /// Snapshot of the current handlers, in registration order.
    pub fn handlers(&self) -> Vec<MessageHandler> {
        self.handlers
            .iter()
            .map(|(_, handler)| Arc::clone(handler))
            .collect()
    }

    /// Invokes every handler with `message`.
    pub fn dispatch(&self, message: &SignalingMessage) {
        for (_, handler) in &self.handlers {
            handler(message);
        }
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    pub fn clear(&mut self) {
        self.handlers.clear();
    }
}

impl std::fmt::Debug for SubscriberRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriberRegistry")
            .field("handlers", &self.handlers.len())
            .finish()
    }
}

/// Dispatches outside the registry lock so handlers may subscribe or
/// unsubscribe without deadlocking.
fn dispatch_shared(subscribers: &Mutex<SubscriberRegistry>, message: &SignalingMessage) {
    let handlers = subscribers
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .handlers();
    for handler in handlers {
        handler(message);
    }
}

/// Decodes one inbound text frame and hands it to the subscribers.
///
/// Returns true if the message was dispatched. Malformed frames and frames
/// read after the channel was cancelled are dropped.
fn deliver_text(
    cancel_token: &CancellationToken,
    subscribers: &Mutex<SubscriberRegistry>,
    text: &str,
) -> bool {
    let message = match decode_signaling(text) {
        Ok(message) => message,
        Err(e) => {
            warn!(error = %e, "Dropping malformed signaling message");
            return false;
        }
    };

    if cancel_token.is_cancelled() {
        debug!(message_type = message.type_name(), "Dropping message after disconnect");
        return false;
    }
    debug!(message_type = message.type_name(), "Signaling message received");
    dispatch_shared(subscribers, &message);
    true
}

// ============================================================================
// Signaling Channel
// ============================================================================

/// Bidirectional message transport to the signaling coordinator.
///
/// # Example
///
/// ```rust,ignore
/// use std::sync::Arc;
/// use drivewatch_client::signaling::SignalingChannel;
/// use drivewatch_protocol::SignalingMessage;
///
/// let mut channel = SignalingChannel::new("ws://localhost:8000/ws/driver-monitoring");
/// channel.on_message(Arc::new(|msg| println!("received {}", msg.type_name())));
/// channel.connect().await?;
/// channel.send(&SignalingMessage::offer(sdp))?;
/// channel.disconnect();
/// ```
pub struct SignalingChannel {
    url: String,
    status: Arc<watch::Sender<TransportStatus>>,
    subscribers: Arc<Mutex<SubscriberRegistry>>,

    /// Feeds the writer task. Present only while connected.
    outbound: Option<mpsc::UnboundedSender<Message>>,

    /// Stops the reader and writer tasks of the current connection.
    cancel_token: Option<CancellationToken>,
}

impl SignalingChannel {
    /// Creates a closed channel for `url`.
    pub fn new(url: impl Into<String>) -> Self {
        let (status, _) = watch::channel(TransportStatus::Closed);
        Self {
            url: url.into(),
            status: Arc::new(status),
            subscribers: Arc::new(Mutex::new(SubscriberRegistry::new())),
            outbound: None,
            cancel_token: None,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Current transport status.
    pub fn status(&self) -> TransportStatus {
        *self.status.borrow()
    }

    /// Receiver that observes every status change.
    pub fn watch_status(&self) -> watch::Receiver<TransportStatus> {
        self.status.subscribe()
    }

    fn set_status(&self, status: TransportStatus) {
        let previous = self.status.send_replace(status);
        if previous != status {
            debug!(from = %previous, to = %status, "Transport status changed");
        }
    }

    /// Opens the WebSocket.
    ///
    /// Resolves once the transport is open. Calling this while connecting or
    /// open does nothing.
    ///
    /// # Errors
    ///
    /// `ClientError::Transport` if the handshake fails; the status is then
    /// `closed`.
    pub async fn connect(&mut self) -> Result<()> {
        match self.status() {
            TransportStatus::Open | TransportStatus::Connecting => {
                debug!(url = %self.url, "Signaling channel already connected");
                return Ok(());
            }
            TransportStatus::Closing | TransportStatus::Closed => {}
        }

        self.set_status(TransportStatus::Connecting);
        info!(url = %self.url, "Connecting to signaling server");

        let (stream, _) = match connect_async(self.url.as_str()).await {
            Ok(connected) => connected,
            Err(e) => {
                self.set_status(TransportStatus::Closed);
                warn!(url = %self.url, error = %e, "Signaling connection failed");
                return Err(ClientError::Transport(format!("WebSocket error: {e}")));
            }
        };

        let (mut sink, mut source) = stream.split();
        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Message>();
        let cancel_token = CancellationToken::new();

        // Writer task
        let writer_token = cancel_token.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;

                    _ = writer_token.cancelled() => {
                        let _ = sink.send(Message::Close(None)).await;
                        let _ = sink.close().await;
                        break;
                    }

                    next = outbound_rx.recv() => {
                        let Some(message) = next else {
                            let _ = sink.close().await;
                            break;
                        };
                        if let Err(e) = sink.send(message).await {
                            warn!(error = %e, "Failed to write signaling message");
                            break;
                        }
                    }
                }
            }
            debug!("Signaling writer stopped");
        });

        // Reader task
        let reader_token = cancel_token.clone();
        let status = Arc::clone(&self.status);
        let subscribers = Arc::clone(&self.subscribers);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;

                    _ = reader_token.cancelled() => break,

                    frame = source.next() => match frame {
                        Some(Ok(Message::Text(text))) => {
                            deliver_text(&reader_token, &subscribers, &text);
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            if !reader_token.is_cancelled() {
                                info!("Signaling server closed the connection");
                                status.send_replace(TransportStatus::Closed);
                            }
                            break;
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            if !reader_token.is_cancelled() {
                                warn!(error = %e, "Signaling connection error");
                                status.send_replace(TransportStatus::Closed);
                            }
                            break;
                        }
                    }
                }
            }
            debug!("Signaling reader stopped");
        });

        self.outbound = Some(outbound_tx);
        self.cancel_token = Some(cancel_token);
        self.set_status(TransportStatus::Open);
        info!(url = %self.url, "Signaling channel open");
        Ok(())
    }

    /// Serializes and transmits one message.
    ///
    /// # Errors
    ///
    /// `ClientError::Transport` if the transport is not open. The transport
    /// status is left untouched.
    pub fn send(&self, message: &SignalingMessage) -> Result<()> {
        if !self.status().is_open() {
            return Err(ClientError::Transport("WebSocket is not open".to_string()));
        }
        let outbound = self
            .outbound
            .as_ref()
            .ok_or_else(|| ClientError::Transport("WebSocket is not open".to_string()))?;

        let text = encode_signaling(message)?;
        outbound
            .send(Message::Text(text))
            .map_err(|_| ClientError::Transport("WebSocket is not open".to_string()))?;

        debug!(message_type = message.type_name(), "Signaling message sent");
        Ok(())
    }

    /// Registers a handler for inbound messages.
    pub fn on_message(&self, handler: MessageHandler) -> SubscriptionId {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .subscribe(handler)
    }

    /// Removes a handler registered with [`on_message`](Self::on_message).
    pub fn remove_handler(&self, id: SubscriptionId) -> bool {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .unsubscribe(id)
    }

    /// Closes the transport. Safe to call any number of times.
    ///
    /// Inbound dispatch is detached before the socket is closed: no new
    /// dispatch starts once this returns, though a handler already running
    /// on another worker thread may still finish.
    pub fn disconnect(&mut self) {
        let Some(cancel_token) = self.cancel_token.take() else {
            self.outbound = None;
            self.set_status(TransportStatus::Closed);
            return;
        };

        self.set_status(TransportStatus::Closing);
        cancel_token.cancel();
        self.outbound = None;
        self.set_status(TransportStatus::Closed);
        info!(url = %self.url, "Signaling channel closed");
    }
}

impl Drop for SignalingChannel {
    fn drop(&mut self) {
        if let Some(cancel_token) = self.cancel_token.take() {
            cancel_token.cancel();
        }
    }
}

impl std::fmt::Debug for SignalingChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignalingChannel")
            .field("url", &self.url)
            .field("status", &self.status())
            .finish()
    }
}
