//! Session / negotiation test harness
//!
//! Replaces every network collaborator with an in-memory double the test
//! drives directly:
//!
//! - [`ScriptedApi`]: session API with recorded calls and injectable failures
//! - [`InMemoryDialer`]: signaling channels whose remote end the test holds
//! - [`FakeConnector`]: peer connections whose events the test pushes
//! - [`RecordingSurface`]: render surface that records every call
//! - [`InMemoryFetcher`]: direct-fetch retriever serving a fixed body
//!
//! Basic usage pattern:
//!
//! 1. Create a `TestHarness` (optionally from a `ClientConfig`)
//! 2. Spawn `harness.lifecycle.start()`
//! 3. Accept the remote signaling end / peer with `harness.dialer.accept()` and
//!    `harness.connector.accept()` and play the server's part
//! 4. Assert on recorded calls, surface state and lifecycle events

#![allow(dead_code)]

use async_trait::async_trait;
use avatar_webrtc::api::{CreateSessionRequest, CreateSessionResponse, SpeakRequest};
use avatar_webrtc::media::{
    MediaTrack, Presentation, RenderSurface, RenderTarget, ResourceFetcher, TrackKind,
};
use avatar_webrtc::negotiation::NegotiationCoordinator;
use avatar_webrtc::peer::{PeerConnector, PeerEvent, PeerLink, PeerSession};
use avatar_webrtc::session::Collaborators;
use avatar_webrtc::signaling::{
    ChannelCloser, ChannelEvent, SessionDescription, SignalingChannel, SignalingDialer,
    SignalingMessage,
};
use avatar_webrtc::{
    ApiResponse, ClientConfig, Error, MediaTransport, Result, SessionApi, SessionEvent,
    SessionLifecycle, TaskType,
};
use bytes::Bytes;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Notify};
use url::Url;

/// SDP every fake peer offers
pub const FAKE_OFFER_SDP: &str = "v=0\r\no=- 0 0 IN IP4 127.0.0.1\r\ns=-\r\nm=video 9 UDP/TLS/RTP/SAVPF 96\r\na=recvonly\r\n";

/// SDP tests answer with
pub const FAKE_ANSWER_SDP: &str = "v=0\r\no=- 1 1 IN IP4 127.0.0.1\r\ns=-\r\nm=video 9 UDP/TLS/RTP/SAVPF 96\r\na=sendonly\r\n";

/// How long harness waits block before giving up
pub const WAIT: Duration = Duration::from_secs(5);

/// Result type for test harness operations
pub type HarnessResult<T> = std::result::Result<T, HarnessError>;

/// Error type for test harness operations
#[derive(Debug, thiserror::Error)]
pub enum HarnessError {
    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Channel error: {0}")]
    ChannelError(String),

    #[error("Decode error: {0}")]
    DecodeError(#[from] serde_json::Error),
}

/// Initialize test logging (call once per test)
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("info,avatar_webrtc=debug")
        .with_test_writer()
        .try_init();
}

/// Poll `condition` until it holds or [`WAIT`] elapses
pub async fn eventually(what: &str, mut condition: impl FnMut() -> bool) -> HarnessResult<()> {
    let deadline = tokio::time::Instant::now() + WAIT;
    while !condition() {
        if tokio::time::Instant::now() >= deadline {
            return Err(HarnessError::Timeout(what.to_string()));
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    Ok(())
}

// ============================================================================
// Session API
// ============================================================================

/// A call the lifecycle made against the session API
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiCall {
    CreateSession,
    Speak(String, TaskType),
    Stop(String),
    Status(String),
    ListAvatars,
}

/// Session API double
pub struct ScriptedApi {
    session_id: Mutex<String>,
    streaming_url: Mutex<String>,
    create_failure: Mutex<Option<String>>,
    fail_stop: AtomicBool,
    create_gate: Mutex<Option<Arc<Notify>>>,
    calls: Mutex<Vec<ApiCall>>,
}

impl Default for ScriptedApi {
    fn default() -> Self {
        Self {
            session_id: Mutex::new("abc123".to_string()),
            streaming_url: Mutex::new("wss://sig.example/room1".to_string()),
            create_failure: Mutex::new(None),
            fail_stop: AtomicBool::new(false),
            create_gate: Mutex::new(None),
            calls: Mutex::new(Vec::new()),
        }
    }
}

impl ScriptedApi {
    /// Session id returned by the next create-session call
    pub fn set_session_id(&self, id: &str) {
        *self.session_id.lock() = id.to_string();
    }

    /// Streaming URL returned by create-session
    pub fn set_streaming_url(&self, url: &str) {
        *self.streaming_url.lock() = url.to_string();
    }

    /// Make create-session fail with `reason`
    pub fn fail_create(&self, reason: &str) {
        *self.create_failure.lock() = Some(reason.to_string());
    }

    /// Make stop-session fail
    pub fn fail_stop(&self) {
        self.fail_stop.store(true, Ordering::SeqCst);
    }

    /// Hold create-session until the returned gate is notified
    pub fn hold_create(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.create_gate.lock() = Some(Arc::clone(&gate));
        gate
    }

    /// Every call so far, in order
    pub fn calls(&self) -> Vec<ApiCall> {
        self.calls.lock().clone()
    }

    /// Number of create-session calls
    pub fn create_count(&self) -> usize {
        self.count(|c| matches!(c, ApiCall::CreateSession))
    }

    /// Session ids passed to stop-session
    pub fn stopped_sessions(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                ApiCall::Stop(id) => Some(id),
                _ => None,
            })
            .collect()
    }

    fn count(&self, predicate: impl Fn(&ApiCall) -> bool) -> usize {
        self.calls.lock().iter().filter(|c| predicate(c)).count()
    }

    fn record(&self, call: ApiCall) {
        self.calls.lock().push(call);
    }

    fn ok(message: &str) -> ApiResponse {
        ApiResponse {
            success: true,
            message: message.to_string(),
            data: None,
        }
    }
}

#[async_trait]
impl SessionApi for ScriptedApi {
    async fn create_session(&self, _request: &CreateSessionRequest) -> Result<CreateSessionResponse> {
        self.record(ApiCall::CreateSession);

        let gate = self.create_gate.lock().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }

        if let Some(reason) = self.create_failure.lock().clone() {
            return Err(Error::Acquisition(reason));
        }

        Ok(CreateSessionResponse {
            session_id: self.session_id.lock().clone(),
            url: "https://avatar.example/s".to_string(),
            streaming_url: self.streaming_url.lock().clone(),
        })
    }

    async fn speak(&self, request: &SpeakRequest) -> Result<ApiResponse> {
        self.record(ApiCall::Speak(request.text.clone(), request.task_type));
        Ok(Self::ok("Speaking"))
    }

    async fn stop_session(&self, session_id: &str) -> Result<ApiResponse> {
        self.record(ApiCall::Stop(session_id.to_string()));
        if self.fail_stop.load(Ordering::SeqCst) {
            return Err(Error::Teardown("HTTP 500: backend unavailable".to_string()));
        }
        Ok(Self::ok("Session stopped"))
    }

    async fn session_status(&self, session_id: &str) -> Result<ApiResponse> {
        self.record(ApiCall::Status(session_id.to_string()));
        Ok(ApiResponse {
            success: true,
            message: "Session active".to_string(),
            data: Some(json!({"session_id": session_id, "status": "active"})),
        })
    }

    async fn list_avatars(&self) -> Result<Value> {
        self.record(ApiCall::ListAvatars);
        Ok(json!({"avatars": [{"id": "anna"}], "voices": [{"id": "warm"}]}))
    }
}

// ============================================================================
// Signaling
// ============================================================================

/// Server side of an in-memory signaling channel
pub struct RemoteEnd {
    pub address: Url,
    frames: mpsc::UnboundedReceiver<String>,
    events: mpsc::UnboundedSender<ChannelEvent>,
    closer: ChannelCloser,
}

impl RemoteEnd {
    /// Report the channel as open
    pub fn open(&self) {
        self.push(ChannelEvent::Open);
    }

    /// Deliver a text frame as the server would send it
    pub fn reply(&self, frame: &str) {
        let event = match SignalingMessage::decode(frame) {
            Ok(message) => ChannelEvent::Message(message),
            Err(e) => ChannelEvent::Malformed(e),
        };
        self.push(event);
    }

    /// Answer with [`FAKE_ANSWER_SDP`]
    pub fn answer(&self) {
        self.reply(
            &json!({
                "type": "webrtc_answer",
                "sdp": {"type": "answer", "sdp": FAKE_ANSWER_SDP}
            })
            .to_string(),
        );
    }

    /// Deliver a raw channel event
    pub fn push(&self, event: ChannelEvent) {
        let _ = self.events.send(event);
    }

    /// Next frame the client sent
    pub async fn next_frame(&mut self) -> HarnessResult<Value> {
        let frame = tokio::time::timeout(WAIT, self.frames.recv())
            .await
            .map_err(|_| HarnessError::Timeout("waiting for client frame".to_string()))?
            .ok_or_else(|| HarnessError::ChannelError("client side dropped".to_string()))?;
        Ok(serde_json::from_str(&frame)?)
    }

    /// Frame already sent by the client, if any
    pub fn try_frame(&mut self) -> Option<String> {
        self.frames.try_recv().ok()
    }

    /// Whether the client closed the channel
    pub fn is_closed(&self) -> bool {
        self.closer.is_closed()
    }
}

/// Dialer producing in-memory channels
pub struct InMemoryDialer {
    dials: AtomicUsize,
    remote_tx: mpsc::UnboundedSender<RemoteEnd>,
    remote_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<RemoteEnd>>,
}

impl Default for InMemoryDialer {
    fn default() -> Self {
        let (remote_tx, remote_rx) = mpsc::unbounded_channel();
        Self {
            dials: AtomicUsize::new(0),
            remote_tx,
            remote_rx: tokio::sync::Mutex::new(remote_rx),
        }
    }
}

impl InMemoryDialer {
    /// Number of channels opened so far
    pub fn dial_count(&self) -> usize {
        self.dials.load(Ordering::SeqCst)
    }

    /// Wait for the next channel the client opens
    pub async fn accept(&self) -> HarnessResult<RemoteEnd> {
        let mut remotes = self.remote_rx.lock().await;
        tokio::time::timeout(WAIT, remotes.recv())
            .await
            .map_err(|_| HarnessError::Timeout("waiting for dial".to_string()))?
            .ok_or_else(|| HarnessError::ChannelError("dialer dropped".to_string()))
    }
}

impl SignalingDialer for InMemoryDialer {
    fn dial(&self, address: &Url) -> SignalingChannel {
        self.dials.fetch_add(1, Ordering::SeqCst);

        let (frames_tx, frames_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let channel = SignalingChannel::from_parts(address.clone(), frames_tx, events_rx);

        let _ = self.remote_tx.send(RemoteEnd {
            address: address.clone(),
            frames: frames_rx,
            events: events_tx,
            closer: channel.closer(),
        });
        channel
    }
}

// ============================================================================
// Peer connections
// ============================================================================

/// Peer connection double
#[derive(Default)]
pub struct FakePeer {
    answers: Mutex<Vec<SessionDescription>>,
    closed: AtomicBool,
    reject_answers: AtomicBool,
}

impl FakePeer {
    /// Answers applied so far
    pub fn answers(&self) -> Vec<SessionDescription> {
        self.answers.lock().clone()
    }

    /// Whether close() ran
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PeerLink for FakePeer {
    async fn create_offer(&self) -> Result<SessionDescription> {
        Ok(SessionDescription::offer(FAKE_OFFER_SDP))
    }

    async fn apply_answer(&self, answer: SessionDescription) -> Result<()> {
        if self.reject_answers.load(Ordering::SeqCst) {
            return Err(Error::WebRtcError("Failed to set remote description".to_string()));
        }
        self.answers.lock().push(answer);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Test-side control of a fake peer
pub struct PeerControl {
    pub peer: Arc<FakePeer>,
    events: mpsc::UnboundedSender<PeerEvent>,
}

impl PeerControl {
    /// Deliver a remote track; returns the track so tests can watch its liveness
    pub fn push_track(&self, id: &str, stream_id: &str, kind: TrackKind) -> MediaTrack {
        let track = MediaTrack::new(id, stream_id, kind);
        let _ = self.events.send(PeerEvent::Track(track.clone()));
        track
    }

    /// Report an ICE/DTLS failure
    pub fn fail(&self, reason: &str) {
        let _ = self.events.send(PeerEvent::Failed(reason.to_string()));
    }

    /// Make apply_answer fail
    pub fn reject_answers(&self) {
        self.peer.reject_answers.store(true, Ordering::SeqCst);
    }
}

/// Connector producing [`FakePeer`]s
pub struct FakeConnector {
    connects: AtomicUsize,
    fail: AtomicBool,
    peer_tx: mpsc::UnboundedSender<PeerControl>,
    peer_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<PeerControl>>,
}

impl Default for FakeConnector {
    fn default() -> Self {
        let (peer_tx, peer_rx) = mpsc::unbounded_channel();
        Self {
            connects: AtomicUsize::new(0),
            fail: AtomicBool::new(false),
            peer_tx,
            peer_rx: tokio::sync::Mutex::new(peer_rx),
        }
    }
}

impl FakeConnector {
    /// Make connect() fail
    pub fn fail_connect(&self) {
        self.fail.store(true, Ordering::SeqCst);
    }

    /// Number of peer connections created
    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// Wait for the next peer connection the client creates
    pub async fn accept(&self) -> HarnessResult<PeerControl> {
        let mut peers = self.peer_rx.lock().await;
        tokio::time::timeout(WAIT, peers.recv())
            .await
            .map_err(|_| HarnessError::Timeout("waiting for peer connection".to_string()))?
            .ok_or_else(|| HarnessError::ChannelError("connector dropped".to_string()))
    }
}

#[async_trait]
impl PeerConnector for FakeConnector {
    async fn connect(&self) -> Result<PeerSession> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::WebRtcError("no ICE servers reachable".to_string()));
        }

        let peer = Arc::new(FakePeer::default());
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let _ = self.peer_tx.send(PeerControl {
            peer: Arc::clone(&peer),
            events: events_tx,
        });

        Ok(PeerSession {
            link: peer,
            events: events_rx,
        })
    }
}

// ============================================================================
// Render surface / direct fetch
// ============================================================================

/// A call the transport made on the surface
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SurfaceCall {
    Attach(RenderTarget),
    Detach,
    Present(Presentation),
}

/// Surface recording every call
#[derive(Default)]
pub struct RecordingSurface {
    calls: Mutex<Vec<SurfaceCall>>,
    target: Mutex<Option<RenderTarget>>,
    load_failure: Mutex<Option<String>>,
}

impl RecordingSurface {
    /// Make wait_loaded fail with `reason`
    pub fn fail_loading(&self, reason: &str) {
        *self.load_failure.lock() = Some(reason.to_string());
    }

    /// Currently attached target
    pub fn target(&self) -> Option<RenderTarget> {
        self.target.lock().clone()
    }

    /// Number of attach calls so far
    pub fn attach_count(&self) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|c| matches!(c, SurfaceCall::Attach(_)))
            .count()
    }

    /// Most recent overlay
    pub fn presentation(&self) -> Option<Presentation> {
        self.calls.lock().iter().rev().find_map(|c| match c {
            SurfaceCall::Present(p) => Some(p.clone()),
            _ => None,
        })
    }

    /// Every call so far, in order
    pub fn calls(&self) -> Vec<SurfaceCall> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl RenderSurface for RecordingSurface {
    fn attach(&self, target: &RenderTarget) {
        *self.target.lock() = Some(target.clone());
        self.calls.lock().push(SurfaceCall::Attach(target.clone()));
    }

    fn detach(&self) {
        *self.target.lock() = None;
        self.calls.lock().push(SurfaceCall::Detach);
    }

    fn set_presentation(&self, presentation: Presentation) {
        self.calls.lock().push(SurfaceCall::Present(presentation));
    }

    async fn wait_loaded(&self) -> Result<()> {
        match self.load_failure.lock().clone() {
            Some(reason) => Err(Error::Transport(reason)),
            None => Ok(()),
        }
    }
}

/// Fetcher serving a fixed body
pub struct InMemoryFetcher {
    body: Bytes,
    failure: Mutex<Option<String>>,
    fetches: Mutex<Vec<Url>>,
}

impl Default for InMemoryFetcher {
    fn default() -> Self {
        Self {
            body: Bytes::from_static(b"\x00\x00\x00\x18ftypmp42"),
            failure: Mutex::new(None),
            fetches: Mutex::new(Vec::new()),
        }
    }
}

impl InMemoryFetcher {
    /// Make fetch fail with `reason`
    pub fn fail(&self, reason: &str) {
        *self.failure.lock() = Some(reason.to_string());
    }

    /// Addresses fetched so far
    pub fn fetches(&self) -> Vec<Url> {
        self.fetches.lock().clone()
    }
}

#[async_trait]
impl ResourceFetcher for InMemoryFetcher {
    async fn fetch(&self, address: &Url) -> Result<Bytes> {
        self.fetches.lock().push(address.clone());
        match self.failure.lock().clone() {
            Some(reason) => Err(Error::Transport(reason)),
            None => Ok(self.body.clone()),
        }
    }
}

// ============================================================================
// Harness
// ============================================================================

/// Lifecycle wired to in-memory collaborators
pub struct TestHarness {
    pub api: Arc<ScriptedApi>,
    pub dialer: Arc<InMemoryDialer>,
    pub connector: Arc<FakeConnector>,
    pub fetcher: Arc<InMemoryFetcher>,
    pub surface: Arc<RecordingSurface>,
    pub lifecycle: SessionLifecycle,
    pub events: mpsc::UnboundedReceiver<SessionEvent>,
}

impl TestHarness {
    /// Harness with the default configuration
    pub fn new() -> Self {
        Self::with_config(ClientConfig::default())
    }

    /// Harness with `config`
    pub fn with_config(config: ClientConfig) -> Self {
        let api = Arc::new(ScriptedApi::default());
        let dialer = Arc::new(InMemoryDialer::default());
        let connector = Arc::new(FakeConnector::default());
        let fetcher = Arc::new(InMemoryFetcher::default());
        let surface = Arc::new(RecordingSurface::default());

        let lifecycle = SessionLifecycle::with_collaborators(
            &config,
            Collaborators {
                api: api.clone(),
                dialer: dialer.clone(),
                connector: connector.clone(),
                fetcher: fetcher.clone(),
                surface: surface.clone(),
            },
        );
        let events = lifecycle.subscribe();

        Self {
            api,
            dialer,
            connector,
            fetcher,
            surface,
            lifecycle,
            events,
        }
    }

    /// Standalone coordinator over the same doubles, with its own transport
    pub fn coordinator(&self, timeout: Duration) -> NegotiationCoordinator {
        NegotiationCoordinator::new(
            self.dialer.clone(),
            self.connector.clone(),
            self.fetcher.clone(),
            MediaTransport::shared(self.surface.clone()),
            timeout,
        )
    }

    /// Spawn `start()` on the runtime
    pub fn spawn_start(&self) -> tokio::task::JoinHandle<Result<avatar_webrtc::Session>> {
        let lifecycle = self.lifecycle.clone();
        tokio::spawn(async move { lifecycle.start().await })
    }

    /// Play the server through a successful p2p negotiation
    ///
    /// Returns the remote end, the peer and the first (video) track.
    pub async fn complete_p2p(&self) -> HarnessResult<(RemoteEnd, PeerControl, MediaTrack)> {
        let peer = self.connector.accept().await?;
        let mut remote = self.dialer.accept().await?;

        remote.open();
        remote.next_frame().await?;
        remote.answer();

        let track = peer.push_track("v0", "avatar-stream", TrackKind::Video);
        Ok((remote, peer, track))
    }

    /// Events received so far
    pub fn drain_events(&mut self) -> Vec<SessionEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }
}
