//! Stream negotiation and session lifecycle engine for live avatar sessions
//!
//! This crate turns a session created on a remote talking-avatar service into
//! a rendered live stream, and tears it down again without leaking anything.
//!
//! # Features
//!
//! - **Session lifecycle**: one session at a time, `Idle → Starting → Active →
//!   Stopping → Idle` with an `Error` side path
//! - **p2p negotiation**: WebRTC offer/answer over a WebSocket signaling channel
//! - **Direct fetch**: single retrieval of an `https://` media resource
//! - **Guaranteed cleanup**: tracks, channels and peer connections are released
//!   synchronously on stop, failure and host disposal
//! - **Stale-attempt guard**: every attempt carries a generation token; media
//!   from a superseded attempt is never bound
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────┐
//! │  SessionLifecycle                                     │
//! │  ├─ SessionApi (create / speak / stop / status)       │
//! │  └─ NegotiationCoordinator                            │
//! │      ├─ SignalingChannel (webrtc_offer / _answer)     │
//! │      ├─ PeerLink (recvonly webrtc-rs connection)      │
//! │      ├─ ResourceFetcher (direct-fetch path)           │
//! │      └─ MediaTransport → RenderSurface                │
//! └───────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```
//! use avatar_webrtc::ClientConfig;
//!
//! let config = ClientConfig {
//!     api_base_url: "https://avatar.example".to_string(),
//!     ..Default::default()
//! };
//! assert!(config.validate().is_ok());
//! ```
//!
//! ## Async Usage
//!
//! ```no_run
//! use avatar_webrtc::{ClientConfig, HeadlessSurface, SessionLifecycle, TaskType};
//! use std::sync::Arc;
//!
//! # async fn example() -> avatar_webrtc::Result<()> {
//! let lifecycle = SessionLifecycle::new(&ClientConfig::default(), Arc::new(HeadlessSurface::new()))?;
//!
//! let session = lifecycle.start().await?;
//! println!("Session {} active", session.short_id());
//!
//! lifecycle.speak("Hello!", TaskType::Talk).await?;
//! lifecycle.stop().await;
//! # Ok(())
//! # }
//! ```

#![warn(clippy::all)]

pub mod api;
pub mod config;
pub mod error;
pub mod media;
pub mod negotiation;
pub mod peer;
pub mod session;
pub mod signaling;

// Re-exports for public API
pub use api::{ApiResponse, HttpSessionApi, SessionApi, TaskType};
pub use config::{ClientConfig, Quality, TurnServerConfig};
pub use error::{Error, ErrorCategory, NegotiationFailure, Result};
pub use media::{HeadlessSurface, MediaTransport, Presentation, RenderSurface, RenderTarget};
pub use negotiation::{NegotiationCoordinator, NegotiationState, StreamEndpointDescriptor, TransportKind};
pub use session::{LifecycleState, Session, SessionEvent, SessionLifecycle};

/// Get the version of this crate
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        let ver = version();
        assert!(!ver.is_empty());
    }
}
