//! Signaling channel and wire protocol for SDP exchange
//!
//! The client sends one `webrtc_offer` over a duplex WebSocket channel and
//! waits for the matching `webrtc_answer`. ICE candidates travel inside the
//! descriptions (non-trickle).

mod channel;
mod protocol;

pub use channel::{
    ChannelCloser, ChannelEvent, ChannelState, SignalingChannel, SignalingDialer, WebSocketDialer,
};
pub use protocol::{DescriptionPayload, DecodeError, SdpType, SessionDescription, SignalingMessage};
