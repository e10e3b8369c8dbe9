//! Signaling wire protocol
//!
//! JSON text frames over the duplex channel:
//!
//! - client → server: `{"type": "webrtc_offer", "sdp": {..}, "session_id": ".."}`
//! - server → client: `{"type": "webrtc_answer", "sdp": {..}}`
//!
//! `error` frames are accepted from the server. Any other `type` decodes to
//! [`SignalingMessage::Unknown`] and is ignored by the negotiator.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Session description kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    /// Local or remote offer
    Offer,
    /// Provisional answer
    Pranswer,
    /// Final answer
    Answer,
    /// Rollback
    Rollback,
}

/// `{type, sdp}` object as produced by a peer connection's local description
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    /// Description kind
    #[serde(rename = "type")]
    pub kind: SdpType,
    /// Raw SDP text
    pub sdp: String,
}

impl SessionDescription {
    /// Offer description
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpType::Offer,
            sdp: sdp.into(),
        }
    }

    /// Answer description
    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpType::Answer,
            sdp: sdp.into(),
        }
    }
}

/// Answer payload: a description object, or bare SDP text from lenient servers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DescriptionPayload {
    /// `{type, sdp}` object
    Description(SessionDescription),
    /// Bare SDP string
    Raw(String),
}

impl DescriptionPayload {
    /// Interpret the payload as a remote answer
    pub fn into_answer(self) -> std::result::Result<SessionDescription, String> {
        match self {
            DescriptionPayload::Description(desc) if desc.kind == SdpType::Answer => Ok(desc),
            DescriptionPayload::Description(desc) => {
                Err(format!("expected answer description, got {:?}", desc.kind))
            }
            DescriptionPayload::Raw(sdp) if sdp.trim().is_empty() => {
                Err("answer sdp is empty".to_string())
            }
            DescriptionPayload::Raw(sdp) => Ok(SessionDescription::answer(sdp)),
        }
    }
}

/// Closed set of signaling frames
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SignalingMessage {
    /// Local offer sent once the channel is open
    #[serde(rename = "webrtc_offer")]
    Offer {
        /// Local description
        sdp: SessionDescription,
        /// Server-issued session id
        session_id: String,
    },

    /// Remote answer
    #[serde(rename = "webrtc_answer")]
    Answer {
        /// Remote description
        sdp: DescriptionPayload,
    },

    /// Remote refused the negotiation
    #[serde(rename = "error")]
    Error {
        /// Optional reason
        #[serde(default)]
        message: Option<String>,
    },

    /// Any frame type this client does not understand
    #[serde(other)]
    Unknown,
}

/// A text frame that could not be decoded into a [`SignalingMessage`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodeError {
    /// The frame's `type` field, if the frame was a JSON object with one
    pub message_type: Option<String>,
    /// Decoder error
    pub reason: String,
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.message_type {
            Some(t) => write!(f, "malformed '{}' frame: {}", t, self.reason),
            None => write!(f, "malformed frame: {}", self.reason),
        }
    }
}

impl std::error::Error for DecodeError {}

impl SignalingMessage {
    /// Build the offer frame
    pub fn offer(sdp: SessionDescription, session_id: impl Into<String>) -> Self {
        SignalingMessage::Offer {
            sdp,
            session_id: session_id.into(),
        }
    }

    /// Encode as a JSON text frame
    pub fn to_json(&self) -> crate::Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decode a JSON text frame
    pub fn decode(text: &str) -> std::result::Result<Self, DecodeError> {
        serde_json::from_str(text).map_err(|e| DecodeError {
            message_type: serde_json::from_str::<Value>(text)
                .ok()
                .and_then(|v| v.get("type").and_then(Value::as_str).map(str::to_string)),
            reason: e.to_string(),
        })
    }

    /// Wire name of this frame type
    pub fn name(&self) -> &'static str {
        match self {
            Self::Offer { .. } => "webrtc_offer",
            Self::Answer { .. } => "webrtc_answer",
            Self::Error { .. } => "error",
            Self::Unknown => "unknown",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offer_wire_format() {
        let msg = SignalingMessage::offer(SessionDescription::offer("v=0\r\n"), "abc123");
        let value: Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();

        assert_eq!(value["type"], "webrtc_offer");
        assert_eq!(value["session_id"], "abc123");
        assert_eq!(value["sdp"]["type"], "offer");
        assert_eq!(value["sdp"]["sdp"], "v=0\r\n");
    }

    #[test]
    fn test_answer_object_decodes() {
        let msg = SignalingMessage::decode(
            r#"{"type": "webrtc_answer", "sdp": {"type": "answer", "sdp": "v=0"}}"#,
        )
        .unwrap();

        match msg {
            SignalingMessage::Answer { sdp } => {
                assert_eq!(sdp.into_answer().unwrap(), SessionDescription::answer("v=0"));
            }
            other => panic!("Expected Answer, got {:?}", other),
        }
    }

    #[test]
    fn test_answer_raw_string_decodes() {
        let msg = SignalingMessage::decode(r#"{"type": "webrtc_answer", "sdp": "v=0"}"#).unwrap();
        let SignalingMessage::Answer { sdp } = msg else {
            panic!("Expected Answer");
        };
        assert_eq!(sdp.into_answer().unwrap().sdp, "v=0");
    }

    #[test]
    fn test_answer_with_offer_kind_rejected() {
        let payload = DescriptionPayload::Description(SessionDescription::offer("v=0"));
        assert!(payload.into_answer().is_err());
        assert!(DescriptionPayload::Raw("  ".to_string()).into_answer().is_err());
    }

    #[test]
    fn test_unknown_type_is_ignored_not_rejected() {
        let msg = SignalingMessage::decode(r#"{"type": "ice_candidate", "candidate": "x"}"#).unwrap();
        assert_eq!(msg, SignalingMessage::Unknown);
        assert_eq!(msg.name(), "unknown");
    }

    #[test]
    fn test_missing_sdp_reports_message_type() {
        let err = SignalingMessage::decode(r#"{"type": "webrtc_answer"}"#).unwrap_err();
        assert_eq!(err.message_type.as_deref(), Some("webrtc_answer"));

        let err = SignalingMessage::decode("not json").unwrap_err();
        assert_eq!(err.message_type, None);
    }

    #[test]
    fn test_error_frame_message_optional() {
        let msg = SignalingMessage::decode(r#"{"type": "error"}"#).unwrap();
        assert_eq!(msg, SignalingMessage::Error { message: None });
    }
}
