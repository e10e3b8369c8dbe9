//! Duplex signaling channel
//!
//! A channel is created by a [`SignalingDialer`] and starts in `Connecting`.
//! Connection progress, frames and failures arrive as [`ChannelEvent`]s on a
//! single queue the negotiator drains in order. Sending is only allowed once
//! the channel has reported `Open`.

use super::protocol::{DecodeError, SignalingMessage};
use crate::{Error, Result};
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};
use url::Url;

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Everything the remote end (or the connection itself) can tell us
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    /// Connection established; sending is now allowed
    Open,
    /// Decoded text frame
    Message(SignalingMessage),
    /// Text frame that failed to decode
    Malformed(DecodeError),
    /// Transport error; the channel is unusable afterwards
    Error(String),
    /// Remote closed the connection
    Closed,
}

/// Channel connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    /// Dialing
    Connecting,
    /// Ready to send
    Open,
    /// Closed locally, closed remotely, or failed
    Closed,
}

impl std::fmt::Display for ChannelState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChannelState::Connecting => write!(f, "connecting"),
            ChannelState::Open => write!(f, "open"),
            ChannelState::Closed => write!(f, "closed"),
        }
    }
}

/// Cloneable handle that closes a channel from outside the negotiation task
///
/// Closing is synchronous and idempotent: the flag flips once and every
/// background I/O task is aborted.
#[derive(Clone, Default)]
pub struct ChannelCloser {
    inner: Arc<CloserInner>,
}

#[derive(Default)]
struct CloserInner {
    closed: AtomicBool,
    tasks: Mutex<Vec<AbortHandle>>,
}

impl ChannelCloser {
    /// Close the channel; returns false if it was already closed
    pub fn close(&self) -> bool {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return false;
        }

        for task in self.inner.tasks.lock().drain(..) {
            task.abort();
        }
        true
    }

    /// Whether close() has been called
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Register a background task; aborted immediately if already closed
    fn track(&self, task: AbortHandle) {
        let mut tasks = self.inner.tasks.lock();
        if self.is_closed() {
            task.abort();
        } else {
            tasks.push(task);
        }
    }
}

/// One duplex signaling connection
pub struct SignalingChannel {
    /// Remote address
    address: Url,

    /// Last state observed through next_event()
    state: ChannelState,

    /// Outgoing text frames
    outgoing: mpsc::UnboundedSender<String>,

    /// Incoming events, in arrival order
    events: mpsc::UnboundedReceiver<ChannelEvent>,

    closer: ChannelCloser,
}

impl SignalingChannel {
    /// Open a WebSocket channel to `address`
    ///
    /// Returns immediately in `Connecting`; the outcome is reported as
    /// [`ChannelEvent::Open`] or [`ChannelEvent::Error`].
    pub fn open(address: &Url) -> Self {
        let (outgoing_tx, outgoing_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let channel = Self::from_parts(address.clone(), outgoing_tx, events_rx);
        let closer = channel.closer();

        let task = tokio::spawn(Self::connect_task(
            address.clone(),
            outgoing_rx,
            events_tx,
            closer.clone(),
        ));
        closer.track(task.abort_handle());

        channel
    }

    /// Assemble a channel from raw queues
    ///
    /// Used by alternative dialers: frames the negotiator sends appear on the
    /// receiving half of `outgoing`; events pushed into `events` are delivered
    /// to the negotiator.
    pub fn from_parts(
        address: Url,
        outgoing: mpsc::UnboundedSender<String>,
        events: mpsc::UnboundedReceiver<ChannelEvent>,
    ) -> Self {
        Self {
            address,
            state: ChannelState::Connecting,
            outgoing,
            events,
            closer: ChannelCloser::default(),
        }
    }

    /// Remote address
    pub fn address(&self) -> &Url {
        &self.address
    }

    /// Current state
    pub fn state(&self) -> ChannelState {
        if self.closer.is_closed() {
            ChannelState::Closed
        } else {
            self.state
        }
    }

    /// Handle for closing this channel from elsewhere
    pub fn closer(&self) -> ChannelCloser {
        self.closer.clone()
    }

    /// Wait for the next event
    ///
    /// Returns `None` once the channel is closed and no events remain.
    pub async fn next_event(&mut self) -> Option<ChannelEvent> {
        if self.closer.is_closed() {
            return None;
        }

        let event = self.events.recv().await;
        match &event {
            Some(ChannelEvent::Open) => self.state = ChannelState::Open,
            Some(ChannelEvent::Error(_)) | Some(ChannelEvent::Closed) | None => {
                self.state = ChannelState::Closed
            }
            _ => {}
        }
        event
    }

    /// Send a frame
    ///
    /// # Errors
    ///
    /// [`Error::ChannelNotOpen`] unless the channel has reported `Open`.
    pub fn send(&self, message: &SignalingMessage) -> Result<()> {
        let state = self.state();
        if state != ChannelState::Open {
            return Err(Error::ChannelNotOpen(state.to_string()));
        }

        let frame = message.to_json()?;
        debug!("Sending {} frame to {}", message.name(), self.address);

        self.outgoing
            .send(frame)
            .map_err(|_| Error::WebSocketError("connection task terminated".to_string()))
    }

    /// Close the channel (idempotent)
    pub fn close(&self) {
        if self.closer.close() {
            debug!("Closed signaling channel to {}", self.address);
        }
    }

    /// Connect, then run the sender and receiver tasks
    async fn connect_task(
        address: Url,
        outgoing: mpsc::UnboundedReceiver<String>,
        events: mpsc::UnboundedSender<ChannelEvent>,
        closer: ChannelCloser,
    ) {
        info!("Connecting to signaling endpoint: {}", address);

        let ws_stream = match connect_async(address.as_str()).await {
            Ok((ws_stream, _)) => ws_stream,
            Err(e) => {
                error!("Failed to connect to {}: {}", address, e);
                let _ = events.send(ChannelEvent::Error(e.to_string()));
                return;
            }
        };

        info!("Connected to signaling endpoint");

        let (write, read) = ws_stream.split();

        let sender = tokio::spawn(Self::sender_task(write, outgoing, events.clone()));
        closer.track(sender.abort_handle());

        let receiver = tokio::spawn(Self::receiver_task(read, events.clone()));
        closer.track(receiver.abort_handle());

        let _ = events.send(ChannelEvent::Open);
    }

    /// Sender task: forwards queued frames to the WebSocket
    async fn sender_task(
        mut write: futures::stream::SplitSink<WsStream, Message>,
        mut rx: mpsc::UnboundedReceiver<String>,
        events: mpsc::UnboundedSender<ChannelEvent>,
    ) {
        while let Some(frame) = rx.recv().await {
            if let Err(e) = write.send(Message::Text(frame)).await {
                error!("Failed to send WebSocket message: {}", e);
                let _ = events.send(ChannelEvent::Error(e.to_string()));
                break;
            }
        }

        let _ = write.close().await;
        debug!("Sender task terminated");
    }

    /// Receiver task: decodes text frames into events
    async fn receiver_task(
        mut read: futures::stream::SplitStream<WsStream>,
        events: mpsc::UnboundedSender<ChannelEvent>,
    ) {
        while let Some(msg_result) = read.next().await {
            let event = match msg_result {
                Ok(Message::Text(text)) => match SignalingMessage::decode(&text) {
                    Ok(message) => ChannelEvent::Message(message),
                    Err(e) => {
                        warn!("Failed to decode signaling frame: {}", e);
                        ChannelEvent::Malformed(e)
                    }
                },
                Ok(Message::Close(_)) => {
                    info!("WebSocket connection closed");
                    let _ = events.send(ChannelEvent::Closed);
                    return;
                }
                Err(e) => {
                    error!("WebSocket error: {}", e);
                    let _ = events.send(ChannelEvent::Error(e.to_string()));
                    return;
                }
                _ => continue,
            };

            if events.send(event).is_err() {
                break;
            }
        }

        let _ = events.send(ChannelEvent::Closed);
        debug!("Receiver task terminated");
    }
}

impl Drop for SignalingChannel {
    fn drop(&mut self) {
        self.close();
    }
}

/// Creates signaling channels for a stream endpoint address
pub trait SignalingDialer: Send + Sync {
    /// Start connecting to `address`; the returned channel is `Connecting`
    fn dial(&self, address: &Url) -> SignalingChannel;
}

/// [`SignalingDialer`] over WebSocket (ws:// and wss://)
#[derive(Debug, Default, Clone, Copy)]
pub struct WebSocketDialer;

impl SignalingDialer for WebSocketDialer {
    fn dial(&self, address: &Url) -> SignalingChannel {
        SignalingChannel::open(address)
    }
}
