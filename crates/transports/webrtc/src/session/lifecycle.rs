//! SessionLifecycle: the one-session-at-a-time outer state machine
//!
//! ```text
//! Idle → Starting → Active → Stopping → Idle
//!          │          │
//!          └──────────┴──→ Error → Idle
//! ```
//!
//! Local resources (bound media, signaling channel, peer connection) are
//! released synchronously on every exit path. The remote session is
//! terminated afterwards on a best-effort basis.

use super::events::SessionEvent;
use crate::api::{
    ApiResponse, CreateSessionRequest, HttpSessionApi, SessionApi, SpeakRequest, TaskType,
};
use crate::config::ClientConfig;
use crate::media::{
    HttpFetcher, MediaTransport, Presentation, RenderSurface, RenderTarget, ResourceFetcher,
    SharedTransport,
};
use crate::negotiation::{
    Attempt, Generation, NegotiatedStream, NegotiationCoordinator, NegotiationState,
    StreamEndpointDescriptor,
};
use crate::peer::{PeerConnector, PeerEvent, WebRtcConnector};
use crate::signaling::{SignalingChannel, SignalingDialer, WebSocketDialer};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde_json::Value;
use std::fmt;
use std::sync::{Arc, Weak};
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

/// Outer lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// No session
    Idle,
    /// Creating the session and negotiating its stream
    Starting,
    /// Stream is rendering
    Active,
    /// Releasing resources and terminating the remote session
    Stopping,
    /// Failed; resets to Idle once cleanup has run
    Error,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Outward-facing view of the current session
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    /// Server-issued session id
    pub session_id: String,
    /// What the surface renders (None until the stream is ready)
    pub render_target: Option<RenderTarget>,
    /// Lifecycle state at snapshot time
    pub lifecycle_state: LifecycleState,
    /// When the session was created
    pub started_at: DateTime<Utc>,
}

impl Session {
    /// First eight characters of the session id, for display
    pub fn short_id(&self) -> &str {
        self.session_id
            .char_indices()
            .nth(8)
            .map_or(self.session_id.as_str(), |(end, _)| &self.session_id[..end])
    }
}

/// External collaborators the lifecycle drives
pub struct Collaborators {
    /// Remote session API
    pub api: Arc<dyn SessionApi>,
    /// Signaling channel factory
    pub dialer: Arc<dyn SignalingDialer>,
    /// Peer connection factory
    pub connector: Arc<dyn PeerConnector>,
    /// Direct-fetch retriever
    pub fetcher: Arc<dyn ResourceFetcher>,
    /// Where media is rendered
    pub surface: Arc<dyn RenderSurface>,
}

impl Collaborators {
    /// Network-backed collaborators built from `config`
    pub fn from_config(config: &ClientConfig, surface: Arc<dyn RenderSurface>) -> Result<Self> {
        Ok(Self {
            api: Arc::new(HttpSessionApi::new(config)?),
            dialer: Arc::new(WebSocketDialer),
            connector: Arc::new(WebRtcConnector::new(config)),
            fetcher: Arc::new(HttpFetcher::new(config.request_timeout())?),
            surface,
        })
    }
}

/// Drives one avatar session at a time
///
/// Cheap to clone; clones control the same lifecycle. Dropping the last
/// clone releases all local resources.
#[derive(Clone)]
pub struct SessionLifecycle {
    inner: Arc<Inner>,
}

struct Inner {
    api: Arc<dyn SessionApi>,
    coordinator: NegotiationCoordinator,
    generation: Generation,
    request: CreateSessionRequest,
    state: Mutex<LifecycleInner>,
    events: Mutex<Option<mpsc::UnboundedSender<SessionEvent>>>,
}

struct LifecycleInner {
    state: LifecycleState,
    session: Option<ActiveSession>,
    last_attempt: Option<Attempt>,
    last_error: Option<String>,
}

/// Resources owned by the current session
struct ActiveSession {
    session_id: String,
    started_at: DateTime<Utc>,
    attempt: Attempt,
    render_target: Option<RenderTarget>,
    channel: Option<SignalingChannel>,
}

impl ActiveSession {
    fn release(&self) {
        if let Some(channel) = &self.channel {
            channel.close();
        }
        self.attempt.scope().release();
    }
}

impl SessionLifecycle {
    /// Lifecycle over the HTTP session API, WebSocket signaling and webrtc-rs
    pub fn new(config: &ClientConfig, surface: Arc<dyn RenderSurface>) -> Result<Self> {
        config.validate()?;
        Ok(Self::with_collaborators(
            config,
            Collaborators::from_config(config, surface)?,
        ))
    }

    /// Lifecycle over explicit collaborators
    pub fn with_collaborators(config: &ClientConfig, collaborators: Collaborators) -> Self {
        let transport = MediaTransport::shared(collaborators.surface);
        let coordinator = NegotiationCoordinator::new(
            collaborators.dialer,
            collaborators.connector,
            collaborators.fetcher,
            transport,
            config.negotiation_timeout(),
        );

        Self {
            inner: Arc::new(Inner {
                api: collaborators.api,
                coordinator,
                generation: Generation::new(),
                request: CreateSessionRequest {
                    avatar_id: config.avatar_id.clone(),
                    voice_id: config.voice_id.clone(),
                    quality: config.quality,
                },
                state: Mutex::new(LifecycleInner {
                    state: LifecycleState::Idle,
                    session: None,
                    last_attempt: None,
                    last_error: None,
                }),
                events: Mutex::new(None),
            }),
        }
    }

    /// Receive lifecycle events from now on (replaces any earlier subscriber)
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<SessionEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        *self.inner.events.lock() = Some(tx);
        rx
    }

    /// Current lifecycle state
    pub fn state(&self) -> LifecycleState {
        self.inner.state.lock().state
    }

    /// Snapshot of the current session, if one exists
    pub fn session(&self) -> Option<Session> {
        let inner = self.inner.state.lock();
        inner.session.as_ref().map(|s| Session {
            session_id: s.session_id.clone(),
            render_target: s.render_target.clone(),
            lifecycle_state: inner.state,
            started_at: s.started_at,
        })
    }

    /// User-visible message of the most recent failure
    pub fn last_error(&self) -> Option<String> {
        self.inner.state.lock().last_error.clone()
    }

    /// Negotiation state of the most recent attempt
    pub fn negotiation_state(&self) -> Option<NegotiationState> {
        self.inner
            .state
            .lock()
            .last_attempt
            .as_ref()
            .map(|a| a.tracker().state())
    }

    /// Media transport the stream is bound into
    pub fn transport(&self) -> &SharedTransport {
        self.inner.coordinator.transport()
    }

    /// Create a session and negotiate its stream
    ///
    /// Valid only from `Idle`; otherwise rejected without side effects. On
    /// failure the lifecycle passes through `Error` back to `Idle` and the
    /// error is returned.
    #[instrument(skip(self))]
    pub async fn start(&self) -> Result<Session> {
        let attempt = {
            let mut inner = self.inner.state.lock();
            if inner.state != LifecycleState::Idle {
                return Err(Error::InvalidState {
                    operation: "start",
                    state: inner.state.to_string(),
                });
            }

            let attempt = Attempt::new(self.inner.generation.advance());
            inner.last_attempt = Some(attempt.clone());
            inner.last_error = None;
            self.set_state(&mut inner, LifecycleState::Starting);
            attempt
        };
        self.transport().lock().set_presentation(Presentation::Loading);

        let response = match self.inner.api.create_session(&self.inner.request).await {
            Ok(response) => response,
            Err(e) => return Err(self.fail(&attempt, e).await),
        };

        {
            let mut inner = self.inner.state.lock();
            if attempt.token().is_current() {
                inner.session = Some(ActiveSession {
                    session_id: response.session_id.clone(),
                    started_at: Utc::now(),
                    attempt: attempt.clone(),
                    render_target: None,
                    channel: None,
                });
            }
        }

        if !attempt.token().is_current() {
            // stop() ran before the session existed locally
            warn!("Session {} created after stop, terminating", response.session_id);
            self.terminate_remote(&response.session_id).await;
            return Err(Error::Cancelled(attempt.id()));
        }

        info!("Session created: {}", response.session_id);

        let descriptor = match StreamEndpointDescriptor::from_response(&response) {
            Ok(descriptor) => descriptor,
            Err(e) => {
                attempt.tracker().fail();
                return Err(self.fail(&attempt, e).await);
            }
        };

        match self.inner.coordinator.negotiate(&descriptor, &attempt).await {
            Ok(stream) => self.activate(&attempt, stream),
            Err(Error::Cancelled(id)) => Err(Error::Cancelled(id)),
            Err(e) => Err(self.fail(&attempt, e).await),
        }
    }

    /// Stop the current session
    ///
    /// Safe from any state and idempotent. Local resources are released
    /// before this awaits anything; a failing remote termination is logged.
    #[instrument(skip(self))]
    pub async fn stop(&self) {
        let session = {
            let mut inner = self.inner.state.lock();
            if inner.state != LifecycleState::Idle {
                self.set_state(&mut inner, LifecycleState::Stopping);
            }
            self.release_local(&mut inner)
        };
        self.transport().lock().set_presentation(Presentation::Idle);

        let session_id = session.map(|s| s.session_id);
        if let Some(session_id) = &session_id {
            info!("Stopping session {}", session_id);
            self.terminate_remote(session_id).await;
        }

        {
            let mut inner = self.inner.state.lock();
            if inner.state == LifecycleState::Stopping {
                self.set_state(&mut inner, LifecycleState::Idle);
            }
        }

        self.emit(SessionEvent::stopped(session_id));
    }

    /// Host disposal: release local resources now, terminate remotely in the background
    pub fn dispose(&self) {
        let session = {
            let mut inner = self.inner.state.lock();
            if inner.state != LifecycleState::Idle {
                self.set_state(&mut inner, LifecycleState::Stopping);
            }
            let session = self.release_local(&mut inner);
            if inner.state == LifecycleState::Stopping {
                self.set_state(&mut inner, LifecycleState::Idle);
            }
            session
        };
        self.transport().lock().set_presentation(Presentation::Idle);

        let Some(session) = session else {
            return;
        };
        info!("Disposing session {}", session.session_id);

        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                let lifecycle = self.clone();
                let session_id = session.session_id.clone();
                runtime.spawn(async move { lifecycle.terminate_remote(&session_id).await });
            }
            Err(_) => warn!(
                "No runtime available, remote session {} left to expire",
                session.session_id
            ),
        }
        self.emit(SessionEvent::stopped(Some(session.session_id)));
    }

    /// Make the avatar speak; valid only while `Active`
    #[instrument(skip(self, text))]
    pub async fn speak(&self, text: &str, task_type: TaskType) -> Result<ApiResponse> {
        let session_id = self.require_session("speak", &[LifecycleState::Active])?;

        let request = SpeakRequest {
            session_id,
            text: text.to_string(),
            task_type,
        };
        self.inner.api.speak(&request).await
    }

    /// Remote status of the current session
    pub async fn status(&self) -> Result<ApiResponse> {
        let session_id = self.require_session(
            "query status",
            &[LifecycleState::Starting, LifecycleState::Active],
        )?;
        self.inner.api.session_status(&session_id).await
    }

    /// Avatar / voice catalog
    pub async fn list_avatars(&self) -> Result<Value> {
        self.inner.api.list_avatars().await
    }

    /// Report that the host could not render the active stream
    ///
    /// Runs the failure path: `Active → Error → Idle` with full cleanup.
    pub async fn report_stream_error(&self, message: &str) -> Result<()> {
        let attempt = {
            let inner = self.inner.state.lock();
            match (&inner.state, &inner.session) {
                (LifecycleState::Active, Some(session)) => session.attempt.clone(),
                (state, _) => {
                    return Err(Error::InvalidState {
                        operation: "report a stream error",
                        state: state.to_string(),
                    })
                }
            }
        };

        self.fail(&attempt, Error::Transport(format!("Stream error: {}", message)))
            .await;
        Ok(())
    }

    /// Failure of the peer connection owned by `attempt`
    ///
    /// Ignored once `attempt` is superseded, so a late report cannot tear
    /// down a newer session.
    async fn peer_failed(&self, attempt: &Attempt, reason: &str) {
        if !attempt.token().is_current() {
            debug!("Ignoring peer failure of superseded attempt {}", attempt.id());
            return;
        }
        self.fail(attempt, Error::Transport(format!("Stream error: {}", reason)))
            .await;
    }

    fn require_session(&self, operation: &'static str, allowed: &[LifecycleState]) -> Result<String> {
        let inner = self.inner.state.lock();
        match &inner.session {
            Some(session) if allowed.contains(&inner.state) => Ok(session.session_id.clone()),
            _ => Err(Error::InvalidState {
                operation,
                state: inner.state.to_string(),
            }),
        }
    }

    /// Commit a successful negotiation unless the attempt was superseded
    fn activate(&self, attempt: &Attempt, stream: NegotiatedStream) -> Result<Session> {
        let NegotiatedStream {
            render_target,
            channel,
            peer_events,
            ..
        } = stream;

        let mut inner = self.inner.state.lock();
        if !attempt.token().is_current() || inner.state != LifecycleState::Starting {
            debug!("Attempt {} finished after being superseded", attempt.id());
            return Err(Error::Cancelled(attempt.id()));
        }
        let Some(session) = inner.session.as_mut() else {
            return Err(Error::Cancelled(attempt.id()));
        };

        session.render_target = Some(render_target.clone());
        session.channel = channel;
        let session_id = session.session_id.clone();
        let started_at = session.started_at;

        if let Some(events) = peer_events {
            let follower = self.spawn_track_follower(attempt.clone(), events);
            attempt
                .scope()
                .defer("track follower", move || follower.abort());
        }

        self.set_state(&mut inner, LifecycleState::Active);
        info!("Session {} active", session_id);
        self.emit(SessionEvent::stream_ready(
            session_id.clone(),
            render_target.clone(),
        ));

        Ok(Session {
            session_id,
            render_target: Some(render_target),
            lifecycle_state: LifecycleState::Active,
            started_at,
        })
    }

    /// Failure path shared by start() and report_stream_error()
    async fn fail(&self, attempt: &Attempt, error: Error) -> Error {
        let message = error.user_message();
        let session = {
            let mut inner = self.inner.state.lock();
            if !attempt.token().is_current() {
                debug!("Ignoring failure of superseded attempt {}: {}", attempt.id(), error);
                return error;
            }

            inner.last_error = Some(message.clone());
            self.set_state(&mut inner, LifecycleState::Error);
            self.release_local(&mut inner)
        };

        self.transport()
            .lock()
            .set_presentation(Presentation::Error(message));
        self.emit(SessionEvent::failed(&error));

        if let Some(session) = session {
            self.terminate_remote(&session.session_id).await;
        }

        {
            let mut inner = self.inner.state.lock();
            if inner.state == LifecycleState::Error {
                self.set_state(&mut inner, LifecycleState::Idle);
            }
        }
        error
    }

    /// Invalidate in-flight attempts and release every local resource
    fn release_local(&self, inner: &mut LifecycleInner) -> Option<ActiveSession> {
        {
            let mut transport = self.transport().lock();
            self.inner.generation.advance();
            transport.release();
        }

        let session = inner.session.take();
        if let Some(session) = &session {
            session.release();
        }
        if let Some(attempt) = &inner.last_attempt {
            attempt.scope().release();
        }
        session
    }

    async fn terminate_remote(&self, session_id: &str) {
        match self.inner.api.stop_session(session_id).await {
            Ok(_) => info!("Remote session {} terminated", session_id),
            Err(e) => warn!("Failed to terminate remote session {}: {}", session_id, e),
        }
    }

    /// Route tracks arriving after the first to the bound stream
    fn spawn_track_follower(
        &self,
        attempt: Attempt,
        mut events: mpsc::UnboundedReceiver<PeerEvent>,
    ) -> tokio::task::AbortHandle {
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);

        let task = tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                let lifecycle = SessionLifecycle { inner };

                match event {
                    PeerEvent::Track(track) => {
                        let joined = {
                            let mut transport = lifecycle.transport().lock();
                            if !attempt.token().is_current() {
                                track.stop();
                                break;
                            }
                            transport.join_track(track.clone())
                        };

                        match joined {
                            Some(target) => {
                                if let Some(session) =
                                    lifecycle.inner.state.lock().session.as_mut()
                                {
                                    session.render_target = Some(target);
                                }
                            }
                            None => {
                                debug!(
                                    "Ignoring track {} of stream {}: stream already bound",
                                    track.id(),
                                    track.stream_id()
                                );
                                track.stop();
                            }
                        }
                    }
                    PeerEvent::Failed(reason) => {
                        warn!("Peer connection failed while active: {}", reason);
                        // The failure path aborts this task; run it elsewhere
                        let attempt = attempt.clone();
                        tokio::spawn(async move {
                            lifecycle.peer_failed(&attempt, &reason).await;
                        });
                        break;
                    }
                }
            }
        });
        task.abort_handle()
    }

    fn set_state(&self, inner: &mut LifecycleInner, next: LifecycleState) {
        let from = std::mem::replace(&mut inner.state, next);
        if from != next {
            debug!("Session state transition: {} -> {}", from, next);
            self.emit(SessionEvent::state_changed(from, next));
        }
    }

    fn emit(&self, event: SessionEvent) {
        let mut events = self.inner.events.lock();
        if let Some(tx) = events.as_ref() {
            if tx.send(event).is_err() {
                *events = None;
            }
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        let inner = self.state.get_mut();
        if let Some(session) = inner.session.take() {
            debug!("Lifecycle dropped with session {}, releasing", session.session_id);
            session.release();
        }
        if let Some(attempt) = inner.last_attempt.take() {
            attempt.scope().release();
        }
        self.generation.advance();
        self.coordinator.transport().lock().release();
    }
}
