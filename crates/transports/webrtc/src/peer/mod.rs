//! Receive-only peer connection used by the p2p negotiation path
//!
//! The negotiator only needs three things from a peer connection: a local
//! offer, a place to apply the remote answer, and a stream of inbound tracks.
//! [`PeerLink`] / [`PeerConnector`] capture exactly that so the coordinator can
//! be driven without a network in tests.

mod connection;

pub use connection::{ConnectionState, WebRtcConnector, WebRtcPeer};

use crate::media::MediaTrack;
use crate::signaling::SessionDescription;
use crate::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::warn;

/// Something the peer connection reports after creation
#[derive(Debug, Clone)]
pub enum PeerEvent {
    /// Remote track arrived
    Track(MediaTrack),
    /// Connection failed at the ICE/DTLS level
    Failed(String),
}

/// Local half of a peer connection
#[async_trait]
pub trait PeerLink: Send + Sync {
    /// Create an offer, set it as the local description and return it
    async fn create_offer(&self) -> Result<SessionDescription>;

    /// Apply the remote answer
    async fn apply_answer(&self, answer: SessionDescription) -> Result<()>;

    /// Close the connection (idempotent)
    async fn close(&self) -> Result<()>;
}

/// A freshly created peer connection and its event queue
pub struct PeerSession {
    /// Connection handle
    pub link: Arc<dyn PeerLink>,
    /// Track arrivals and failures, in order
    pub events: mpsc::UnboundedReceiver<PeerEvent>,
}

/// Creates peer connections
#[async_trait]
pub trait PeerConnector: Send + Sync {
    /// Create a new peer connection configured for NAT traversal
    async fn connect(&self) -> Result<PeerSession>;
}

/// Close `link` on the current runtime without waiting for it
///
/// Used from synchronous cleanup paths.
pub fn close_in_background(link: Arc<dyn PeerLink>) {
    match tokio::runtime::Handle::try_current() {
        Ok(runtime) => {
            runtime.spawn(async move {
                if let Err(e) = link.close().await {
                    warn!("Failed to close peer connection: {}", e);
                }
            });
        }
        Err(_) => warn!("No runtime available to close peer connection"),
    }
}
