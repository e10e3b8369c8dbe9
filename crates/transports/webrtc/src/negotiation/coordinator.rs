//! NegotiationCoordinator: descriptor in, bound media handle out

use super::descriptor::{StreamEndpointDescriptor, TransportKind};
use super::scope::{AttemptToken, ResourceScope};
use super::state::{NegotiationState, NegotiationTracker};
use crate::error::NegotiationFailure;
use crate::media::{
    LiveStream, LocalResource, MediaHandle, RenderTarget, ResourceFetcher, SharedTransport,
};
use crate::peer::{close_in_background, PeerConnector, PeerEvent, PeerLink, PeerSession};
use crate::signaling::{ChannelEvent, SignalingChannel, SignalingDialer, SignalingMessage};
use crate::{Error, Result};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

/// One negotiation attempt: its generation token, resources and state
///
/// Clones refer to the same attempt.
#[derive(Clone)]
pub struct Attempt {
    token: AttemptToken,
    scope: Arc<ResourceScope>,
    tracker: NegotiationTracker,
}

impl Attempt {
    /// Fresh attempt for `token`
    pub fn new(token: AttemptToken) -> Self {
        Self {
            tracker: NegotiationTracker::new(token.id()),
            scope: ResourceScope::new(),
            token,
        }
    }

    /// Attempt number
    pub fn id(&self) -> u64 {
        self.token.id()
    }

    /// Generation token
    pub fn token(&self) -> &AttemptToken {
        &self.token
    }

    /// Resources acquired by this attempt
    pub fn scope(&self) -> &Arc<ResourceScope> {
        &self.scope
    }

    /// Negotiation state of this attempt
    pub fn tracker(&self) -> &NegotiationTracker {
        &self.tracker
    }
}

/// Outcome of a successful negotiation
pub struct NegotiatedStream {
    /// Handle now bound to the transport
    pub handle_id: Uuid,
    /// What the surface renders
    pub render_target: RenderTarget,
    /// Signaling channel (p2p path only); stays open until teardown
    pub channel: Option<SignalingChannel>,
    /// Peer connection (p2p path only)
    pub peer: Option<Arc<dyn PeerLink>>,
    /// Peer events after the first track (p2p path only)
    pub peer_events: Option<mpsc::UnboundedReceiver<PeerEvent>>,
}

impl fmt::Debug for NegotiatedStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NegotiatedStream")
            .field("handle_id", &self.handle_id)
            .field("render_target", &self.render_target)
            .field("channel", &self.channel.as_ref().map(SignalingChannel::state))
            .field("peer", &self.peer.is_some())
            .finish()
    }
}

/// Drives one descriptor to a bound stream or a terminal failure
pub struct NegotiationCoordinator {
    dialer: Arc<dyn SignalingDialer>,
    connector: Arc<dyn PeerConnector>,
    fetcher: Arc<dyn ResourceFetcher>,
    transport: SharedTransport,
    timeout: Duration,
}

impl NegotiationCoordinator {
    /// Create a coordinator binding into `transport`
    pub fn new(
        dialer: Arc<dyn SignalingDialer>,
        connector: Arc<dyn PeerConnector>,
        fetcher: Arc<dyn ResourceFetcher>,
        transport: SharedTransport,
        timeout: Duration,
    ) -> Self {
        Self {
            dialer,
            connector,
            fetcher,
            transport,
            timeout,
        }
    }

    /// Transport streams are bound into
    pub fn transport(&self) -> &SharedTransport {
        &self.transport
    }

    /// Negotiate `descriptor` within `attempt`
    ///
    /// Resolves once a stream is bound and the attempt is `Ready`. On failure
    /// the attempt is moved to `Failed` and its scope released. If the scope
    /// is released from outside (stop, host disposal) the attempt is abandoned
    /// with [`Error::Cancelled`].
    #[instrument(
        skip(self, descriptor, attempt),
        fields(attempt = attempt.id(), kind = %descriptor.transport_kind())
    )]
    pub async fn negotiate(
        &self,
        descriptor: &StreamEndpointDescriptor,
        attempt: &Attempt,
    ) -> Result<NegotiatedStream> {
        let run = async {
            match descriptor.transport_kind() {
                TransportKind::P2pSignaling => self.negotiate_p2p(descriptor, attempt).await,
                TransportKind::DirectFetch => self.negotiate_direct(descriptor, attempt).await,
                TransportKind::Other(kind) => Err(Error::UnsupportedTransport(kind.clone())),
            }
        };

        let result = tokio::select! {
            biased;
            _ = attempt.scope().cancelled() => Err(Error::Cancelled(attempt.id())),
            outcome = tokio::time::timeout(self.timeout, run) => outcome
                .unwrap_or_else(|_| Err(Error::negotiation(NegotiationFailure::Timeout))),
        };

        match &result {
            Ok(stream) => info!("Stream ready: {}", stream.render_target),
            Err(Error::Cancelled(id)) => warn!("Negotiation attempt {} abandoned", id),
            Err(e) => {
                attempt.tracker().fail();
                error!("Negotiation failed: {}", e);
            }
        }

        if result.is_err() {
            attempt.scope().release();
        }
        result
    }

    async fn negotiate_p2p(
        &self,
        descriptor: &StreamEndpointDescriptor,
        attempt: &Attempt,
    ) -> Result<NegotiatedStream> {
        let tracker = attempt.tracker();
        tracker.advance(NegotiationState::AwaitingLocalDescription)?;

        let PeerSession { link, mut events } = self
            .connector
            .connect()
            .await
            .map_err(|e| Error::negotiation(NegotiationFailure::Peer(e.to_string())))?;
        {
            let link = Arc::clone(&link);
            attempt
                .scope()
                .defer("peer connection", move || close_in_background(link));
        }

        let offer = link
            .create_offer()
            .await
            .map_err(|e| Error::negotiation(NegotiationFailure::Sdp(e.to_string())))?;
        tracker.advance(NegotiationState::AwaitingRemoteAnswer)?;

        let mut channel = self.dialer.dial(descriptor.address());
        let closer = channel.closer();
        attempt.scope().defer("signaling channel", move || {
            closer.close();
        });

        let mut pending_offer = Some(offer);
        let mut answered = false;
        let mut channel_done = false;

        loop {
            tokio::select! {
                event = channel.next_event(), if !channel_done => match event {
                    Some(ChannelEvent::Open) => {
                        info!("Signaling channel open: {}", descriptor.address());
                        if let Some(offer) = pending_offer.take() {
                            channel
                                .send(&SignalingMessage::offer(offer, descriptor.session_id()))
                                .map_err(|e| {
                                    Error::negotiation(NegotiationFailure::ConnectionFailed(
                                        e.to_string(),
                                    ))
                                })?;
                        }
                    }
                    Some(ChannelEvent::Message(SignalingMessage::Answer { sdp })) => {
                        if answered {
                            warn!("Ignoring duplicate answer");
                            continue;
                        }

                        let answer = sdp.into_answer().map_err(|reason| {
                            Error::negotiation(NegotiationFailure::MalformedAnswer(reason))
                        })?;
                        self.ensure_current(attempt.token())?;

                        link.apply_answer(answer).await.map_err(|e| {
                            Error::negotiation(NegotiationFailure::MalformedAnswer(e.to_string()))
                        })?;
                        answered = true;

                        info!("Remote answer applied");
                        tracker.advance(NegotiationState::IceExchanging)?;
                    }
                    Some(ChannelEvent::Message(SignalingMessage::Error { message })) => {
                        return Err(Error::negotiation(NegotiationFailure::Rejected(
                            message.unwrap_or_else(|| "no reason given".to_string()),
                        )));
                    }
                    Some(ChannelEvent::Message(other)) => {
                        debug!("Ignoring {} frame", other.name());
                    }
                    Some(ChannelEvent::Malformed(e)) => {
                        if !answered && e.message_type.as_deref() == Some("webrtc_answer") {
                            return Err(Error::negotiation(NegotiationFailure::MalformedAnswer(
                                e.reason,
                            )));
                        }
                        warn!("Ignoring undecodable signaling frame: {}", e);
                    }
                    Some(ChannelEvent::Error(reason)) => {
                        return Err(Error::negotiation(NegotiationFailure::ConnectionFailed(reason)));
                    }
                    Some(ChannelEvent::Closed) | None => {
                        if !answered {
                            return Err(Error::negotiation(NegotiationFailure::ChannelClosed));
                        }
                        debug!("Signaling channel closed after answer");
                        channel_done = true;
                    }
                },

                event = events.recv() => match event {
                    Some(PeerEvent::Track(track)) => {
                        // First arrival wins; later tracks are handed back to the caller
                        let handle = MediaHandle::live(LiveStream::new(track));
                        let handle_id = handle.id();
                        let render_target = self.bind_current(attempt.token(), handle)?;
                        tracker.advance(NegotiationState::Ready)?;

                        return Ok(NegotiatedStream {
                            handle_id,
                            render_target,
                            channel: Some(channel),
                            peer: Some(link),
                            peer_events: Some(events),
                        });
                    }
                    Some(PeerEvent::Failed(reason)) => {
                        return Err(Error::negotiation(NegotiationFailure::Peer(reason)));
                    }
                    None => {
                        return Err(Error::negotiation(NegotiationFailure::Peer(
                            "peer connection dropped".to_string(),
                        )));
                    }
                },
            }
        }
    }

    async fn negotiate_direct(
        &self,
        descriptor: &StreamEndpointDescriptor,
        attempt: &Attempt,
    ) -> Result<NegotiatedStream> {
        let body = self.fetcher.fetch(descriptor.address()).await?;
        self.ensure_current(attempt.token())?;

        let resource = LocalResource::store(descriptor.address().clone(), body).await?;
        let handle = MediaHandle::resource(resource);
        let handle_id = handle.id();
        let render_target = self.bind_current(attempt.token(), handle)?;

        let surface = Arc::clone(self.transport.lock().surface());
        if let Err(e) = surface.wait_loaded().await {
            self.transport.lock().release_if(handle_id);
            return Err(Error::Transport(format!("Stream failed to load: {}", e)));
        }

        attempt.tracker().advance(NegotiationState::Ready)?;

        Ok(NegotiatedStream {
            handle_id,
            render_target,
            channel: None,
            peer: None,
            peer_events: None,
        })
    }

    fn ensure_current(&self, token: &AttemptToken) -> Result<()> {
        if token.is_current() {
            Ok(())
        } else {
            Err(Error::Cancelled(token.id()))
        }
    }

    /// Bind under the transport lock, refusing stale attempts
    fn bind_current(&self, token: &AttemptToken, mut handle: MediaHandle) -> Result<RenderTarget> {
        let mut transport = self.transport.lock();
        if !token.is_current() {
            warn!("Discarding media from stale attempt {}", token.id());
            handle.release();
            return Err(Error::Cancelled(token.id()));
        }
        Ok(transport.bind(handle))
    }
}
