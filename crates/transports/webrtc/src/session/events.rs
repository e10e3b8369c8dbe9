//! Lifecycle events delivered to the host

use super::lifecycle::LifecycleState;
use crate::error::ErrorCategory;
use crate::media::RenderTarget;

/// Something the host may want to react to
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// Lifecycle state changed
    StateChanged {
        /// Previous state
        from: LifecycleState,
        /// New state
        to: LifecycleState,
    },

    /// Stream is bound and rendering
    StreamReady {
        /// Server-issued session id
        session_id: String,
        /// What the surface renders
        render_target: RenderTarget,
    },

    /// Session failed; the lifecycle resets to Idle
    Failed {
        /// Error category
        category: ErrorCategory,
        /// User-visible message
        message: String,
    },

    /// Session stopped and local resources released
    Stopped {
        /// Session that was stopped, if one had been created
        session_id: Option<String>,
    },
}

impl SessionEvent {
    /// Create a state change event
    pub fn state_changed(from: LifecycleState, to: LifecycleState) -> Self {
        Self::StateChanged { from, to }
    }

    /// Create a stream ready event
    pub fn stream_ready(session_id: String, render_target: RenderTarget) -> Self {
        Self::StreamReady {
            session_id,
            render_target,
        }
    }

    /// Create a failure event
    pub fn failed(error: &crate::Error) -> Self {
        Self::Failed {
            category: error.category(),
            message: error.user_message(),
        }
    }

    /// Create a stopped event
    pub fn stopped(session_id: Option<String>) -> Self {
        Self::Stopped { session_id }
    }

    /// Get the event name for logging/debugging
    pub fn name(&self) -> &'static str {
        match self {
            Self::StateChanged { .. } => "state_changed",
            Self::StreamReady { .. } => "stream_ready",
            Self::Failed { .. } => "failed",
            Self::Stopped { .. } => "stopped",
        }
    }
}
