//! webrtc-rs peer connection

use super::{PeerConnector, PeerEvent, PeerLink, PeerSession};
use crate::config::ClientConfig;
use crate::media::{MediaTrack, TrackKind};
use crate::signaling::SessionDescription;
use crate::{Error, Result};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::rtp_transceiver::rtp_transceiver_direction::RTCRtpTransceiverDirection;
use webrtc::rtp_transceiver::RTCRtpTransceiverInit;
use webrtc::track::track_remote::TrackRemote;

/// Peer connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Created, no offer yet
    New,
    /// Local offer set, ICE candidates being gathered
    GatheringIce,
    /// Remote answer applied
    Connecting,
    /// Media flowing
    Connected,
    /// ICE/DTLS failure
    Failed,
    /// Closed
    Closed,
}

/// Receive-only webrtc-rs peer connection
pub struct WebRtcPeer {
    /// Unique identifier for this connection instance
    connection_id: String,

    /// Current connection state
    state: Arc<RwLock<ConnectionState>>,

    /// Actual WebRTC peer connection
    peer_connection: Arc<RTCPeerConnection>,

    /// Wait for ICE gathering before returning the offer
    wait_for_ice_gathering: bool,
}

impl WebRtcPeer {
    /// Create a peer connection with recvonly audio and video transceivers
    ///
    /// # Arguments
    ///
    /// * `ice_servers` - STUN/TURN servers for NAT traversal
    /// * `wait_for_ice_gathering` - Embed gathered candidates in the offer
    #[instrument(skip(ice_servers))]
    pub async fn new(
        ice_servers: Vec<RTCIceServer>,
        wait_for_ice_gathering: bool,
    ) -> Result<(Self, mpsc::UnboundedReceiver<PeerEvent>)> {
        let connection_id = uuid::Uuid::new_v4().to_string();
        info!("Creating peer connection: connection_id={}", connection_id);

        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| Error::WebRtcError(format!("Failed to register codecs: {}", e)))?;

        let interceptor_registry =
            register_default_interceptors(Default::default(), &mut media_engine).map_err(|e| {
                Error::WebRtcError(format!("Failed to register interceptors: {}", e))
            })?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(interceptor_registry)
            .build();

        let rtc_config = RTCConfiguration {
            ice_servers,
            ..Default::default()
        };

        let peer_connection =
            Arc::new(api.new_peer_connection(rtc_config).await.map_err(|e| {
                Error::WebRtcError(format!("Failed to create peer connection: {}", e))
            })?);

        // The avatar only sends; we only receive
        for kind in [RTPCodecType::Audio, RTPCodecType::Video] {
            peer_connection
                .add_transceiver_from_kind(
                    kind,
                    Some(RTCRtpTransceiverInit {
                        direction: RTCRtpTransceiverDirection::Recvonly,
                        send_encodings: vec![],
                    }),
                )
                .await
                .map_err(|e| {
                    Error::WebRtcError(format!("Failed to add {} transceiver: {}", kind, e))
                })?;
        }

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let state = Arc::new(RwLock::new(ConnectionState::New));

        let state_clone = Arc::clone(&state);
        let failed_tx = events_tx.clone();
        let id_clone = connection_id.clone();
        peer_connection.on_peer_connection_state_change(Box::new(
            move |s: RTCPeerConnectionState| {
                let new_state = match s {
                    RTCPeerConnectionState::Connecting => Some(ConnectionState::Connecting),
                    RTCPeerConnectionState::Connected => Some(ConnectionState::Connected),
                    RTCPeerConnectionState::Failed => Some(ConnectionState::Failed),
                    RTCPeerConnectionState::Disconnected | RTCPeerConnectionState::Closed => {
                        Some(ConnectionState::Closed)
                    }
                    _ => None,
                };

                if let Some(new_state) = new_state {
                    let old_state = std::mem::replace(&mut *state_clone.write(), new_state);
                    if old_state != new_state {
                        debug!(
                            "Peer {} state transition: {:?} -> {:?}",
                            id_clone, old_state, new_state
                        );
                    }
                    if new_state == ConnectionState::Failed {
                        let _ = failed_tx.send(PeerEvent::Failed(
                            "peer connection state is failed".to_string(),
                        ));
                    }
                }

                Box::pin(async {})
            },
        ));

        let track_tx = events_tx;
        peer_connection.on_track(Box::new(move |track, receiver, _transceiver| {
            let track_tx = track_tx.clone();
            Box::pin(async move {
                let media_track = Self::adopt_track(track, receiver);
                info!(
                    "Remote {:?} track {} arrived (stream {})",
                    media_track.kind(),
                    media_track.id(),
                    media_track.stream_id()
                );
                if track_tx.send(PeerEvent::Track(media_track.clone())).is_err() {
                    debug!("No listener for track {}, stopping it", media_track.id());
                    media_track.stop();
                }
            })
        }));

        Ok((
            Self {
                connection_id,
                state,
                peer_connection,
                wait_for_ice_gathering,
            },
            events_rx,
        ))
    }

    /// Get the connection ID
    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }

    /// Get the current connection state
    pub fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    fn set_state(&self, new_state: ConnectionState) {
        let old_state = std::mem::replace(&mut *self.state.write(), new_state);
        if old_state != new_state {
            debug!(
                "Peer {} state transition: {:?} -> {:?}",
                self.connection_id, old_state, new_state
            );
        }
    }

    /// Wrap a remote track and keep its RTP flowing until stopped
    fn adopt_track(track: Arc<TrackRemote>, receiver: Arc<RTCRtpReceiver>) -> MediaTrack {
        let kind = match track.kind() {
            RTPCodecType::Audio => TrackKind::Audio,
            _ => TrackKind::Video,
        };

        // Drain RTP so the interceptors never back up; rendering is the surface's job
        let reader_track = Arc::clone(&track);
        let reader = tokio::spawn(async move {
            let mut packets: u64 = 0;
            while reader_track.read_rtp().await.is_ok() {
                packets += 1;
            }
            debug!("Track {} ended after {} packets", reader_track.id(), packets);
        });

        MediaTrack::new(track.id(), track.stream_id(), kind).with_stop_hook(move || {
            reader.abort();
            if let Ok(runtime) = tokio::runtime::Handle::try_current() {
                runtime.spawn(async move {
                    if let Err(e) = receiver.stop().await {
                        warn!("Failed to stop RTP receiver: {}", e);
                    }
                });
            }
        })
    }
}

#[async_trait]
impl PeerLink for WebRtcPeer {
    async fn create_offer(&self) -> Result<SessionDescription> {
        self.set_state(ConnectionState::GatheringIce);

        let offer = self
            .peer_connection
            .create_offer(None)
            .await
            .map_err(|e| Error::WebRtcError(format!("Failed to create offer: {}", e)))?;

        let mut gathering_complete = self.peer_connection.gathering_complete_promise().await;

        self.peer_connection
            .set_local_description(offer)
            .await
            .map_err(|e| Error::WebRtcError(format!("Failed to set local description: {}", e)))?;

        if self.wait_for_ice_gathering {
            let _ = gathering_complete.recv().await;
            debug!("ICE gathering complete for peer {}", self.connection_id);
        }

        let local_desc = self
            .peer_connection
            .local_description()
            .await
            .ok_or_else(|| {
                Error::WebRtcError("No local description after setting offer".to_string())
            })?;

        debug!("Created SDP offer for peer {}", self.connection_id);
        Ok(SessionDescription::offer(local_desc.sdp))
    }

    async fn apply_answer(&self, answer: SessionDescription) -> Result<()> {
        debug!("Setting remote description for peer {}", self.connection_id);

        let answer = RTCSessionDescription::answer(answer.sdp)
            .map_err(|e| Error::WebRtcError(format!("Failed to parse answer: {}", e)))?;

        self.peer_connection
            .set_remote_description(answer)
            .await
            .map_err(|e| Error::WebRtcError(format!("Failed to set remote description: {}", e)))?;

        self.set_state(ConnectionState::Connecting);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        if self.state() == ConnectionState::Closed {
            return Ok(());
        }

        info!("Closing peer connection {}", self.connection_id);
        self.set_state(ConnectionState::Closed);

        self.peer_connection
            .close()
            .await
            .map_err(|e| Error::WebRtcError(format!("Failed to close connection: {}", e)))
    }
}

/// [`PeerConnector`] producing [`WebRtcPeer`]s from client configuration
#[derive(Debug, Clone)]
pub struct WebRtcConnector {
    ice_servers: Vec<RTCIceServer>,
    wait_for_ice_gathering: bool,
}

impl WebRtcConnector {
    /// Create a connector from the STUN/TURN settings in `config`
    pub fn new(config: &ClientConfig) -> Self {
        Self {
            ice_servers: config.ice_servers(),
            wait_for_ice_gathering: config.wait_for_ice_gathering,
        }
    }
}

#[async_trait]
impl PeerConnector for WebRtcConnector {
    async fn connect(&self) -> Result<PeerSession> {
        let (peer, events) =
            WebRtcPeer::new(self.ice_servers.clone(), self.wait_for_ice_gathering).await?;

        Ok(PeerSession {
            link: Arc::new(peer),
            events,
        })
    }
}
