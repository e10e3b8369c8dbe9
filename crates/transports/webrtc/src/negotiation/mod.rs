//! Stream negotiation
//!
//! Turns a [`StreamEndpointDescriptor`] into a media handle bound to the
//! [`MediaTransport`](crate::media::MediaTransport):
//!
//! ```text
//! p2p-signaling:  Idle → AwaitingLocalDescription → AwaitingRemoteAnswer
//!                      → IceExchanging → Ready
//! direct-fetch:   Idle → Ready
//! any state       → Failed (once, terminal)
//! ```
//!
//! Each attempt carries a generation token; media produced by an attempt
//! that is no longer current is released instead of bound.

mod coordinator;
mod descriptor;
mod scope;
mod state;

pub use coordinator::{Attempt, NegotiatedStream, NegotiationCoordinator};
pub use descriptor::{StreamEndpointDescriptor, TransportKind};
pub use scope::{AttemptToken, Generation, ResourceScope};
pub use state::{NegotiationState, NegotiationTracker};
