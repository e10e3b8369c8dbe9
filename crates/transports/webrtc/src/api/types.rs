//! Request / response bodies of the remote session API

use crate::config::Quality;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Body of POST /api/avatar/create-session
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CreateSessionRequest {
    /// Avatar selector (server default if None)
    pub avatar_id: Option<String>,
    /// Voice selector (server default if None)
    pub voice_id: Option<String>,
    /// Stream quality
    pub quality: Quality,
}

impl Default for CreateSessionRequest {
    fn default() -> Self {
        Self {
            avatar_id: None,
            voice_id: None,
            quality: Quality::High,
        }
    }
}

/// Response of POST /api/avatar/create-session
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CreateSessionResponse {
    /// Server-issued session identifier
    pub session_id: String,
    /// Avatar page URL
    pub url: String,
    /// Stream endpoint (ws/wss signaling or https media)
    pub streaming_url: String,
}

/// What the avatar should do with a speak request
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskType {
    /// Speak the text
    #[default]
    Talk,
    /// Pause current speech
    Pause,
    /// Stop current speech
    Stop,
}

/// Body of POST /api/avatar/speak
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SpeakRequest {
    /// Target session
    pub session_id: String,
    /// Text to speak
    pub text: String,
    /// Task kind (default: talk)
    #[serde(default)]
    pub task_type: TaskType,
}

/// Generic `{success, message, data}` envelope used by speak/stop/status
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApiResponse {
    /// Whether the call succeeded
    pub success: bool,
    /// Human-readable status
    pub message: String,
    /// Optional payload
    #[serde(default)]
    pub data: Option<Value>,
}

impl ApiResponse {
    /// Status string from a session-status payload, if present
    pub fn status(&self) -> Option<&str> {
        self.data
            .as_ref()
            .and_then(|d| d.get("status"))
            .and_then(Value::as_str)
    }
}
