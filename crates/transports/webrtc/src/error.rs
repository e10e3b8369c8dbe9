//! Error types for avatar stream negotiation and session lifecycle

use std::fmt;

/// Result type alias using the crate Error
pub type Result<T> = std::result::Result<T, Error>;

/// Why a negotiation attempt ended in `Failed`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NegotiationFailure {
    /// Signaling channel reported a transport error
    ConnectionFailed(String),
    /// Signaling channel closed before an answer arrived
    ChannelClosed,
    /// Answer frame could not be decoded or applied
    MalformedAnswer(String),
    /// Remote end sent an explicit error frame
    Rejected(String),
    /// Local offer could not be produced
    Sdp(String),
    /// Peer connection could not be created or failed
    Peer(String),
    /// No stream became ready within the negotiation timeout
    Timeout,
    /// Stream address issued by the session API could not be parsed
    InvalidDescriptor(String),
}

impl fmt::Display for NegotiationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConnectionFailed(reason) => write!(f, "connection failed: {}", reason),
            Self::ChannelClosed => write!(f, "signaling channel closed before answer"),
            Self::MalformedAnswer(reason) => write!(f, "malformed answer: {}", reason),
            Self::Rejected(reason) => write!(f, "rejected by remote: {}", reason),
            Self::Sdp(reason) => write!(f, "local description failed: {}", reason),
            Self::Peer(reason) => write!(f, "peer connection failed: {}", reason),
            Self::Timeout => write!(f, "timed out waiting for stream"),
            Self::InvalidDescriptor(reason) => write!(f, "invalid stream address: {}", reason),
        }
    }
}

/// Coarse error categories surfaced to the host
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Session API call failed before negotiation
    Acquisition,
    /// Signaling / SDP / unsupported transport
    Negotiation,
    /// Direct media fetch failed
    Transport,
    /// Remote termination failed during stop
    Teardown,
    /// Caller misuse (bad state, bad config)
    Usage,
}

/// Errors that can occur while acquiring, negotiating or tearing down a session
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid configuration parameter
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Session API call to create a session failed
    #[error("Session acquisition failed: {0}")]
    Acquisition(String),

    /// Session API call other than create failed
    #[error("Session API error: {0}")]
    Api(String),

    /// Negotiation ended in `Failed`
    #[error("Negotiation failed: {0}")]
    Negotiation(NegotiationFailure),

    /// Direct media fetch failed
    #[error("Media transport error: {0}")]
    Transport(String),

    /// Remote session termination failed during stop
    #[error("Teardown error: {0}")]
    Teardown(String),

    /// Descriptor carries a transport kind this client cannot drive
    #[error("Unsupported transport: {0}")]
    UnsupportedTransport(String),

    /// Operation not valid in the current lifecycle state
    #[error("Cannot {operation} while {state}")]
    InvalidState {
        /// Rejected operation
        operation: &'static str,
        /// State at the time of the call
        state: String,
    },

    /// Negotiation state machine refused a transition
    #[error("Invalid negotiation transition: {from} -> {to}")]
    InvalidTransition {
        /// Current state
        from: String,
        /// Requested state
        to: String,
    },

    /// Signaling send attempted before the channel opened
    #[error("Signaling channel is not open ({0})")]
    ChannelNotOpen(String),

    /// Attempt was superseded by stop() or a newer start()
    #[error("Negotiation attempt {0} was cancelled")]
    Cancelled(u64),

    /// WebSocket error
    #[error("WebSocket error: {0}")]
    WebSocketError(String),

    /// WebRTC library error
    #[error("WebRTC error: {0}")]
    WebRtcError(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// Malformed URL
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Any other error
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Map this error onto the host-facing taxonomy
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::Acquisition(_) | Error::Api(_) => ErrorCategory::Acquisition,
            Error::Negotiation(_)
            | Error::UnsupportedTransport(_)
            | Error::ChannelNotOpen(_)
            | Error::WebSocketError(_)
            | Error::WebRtcError(_)
            | Error::SerializationError(_) => ErrorCategory::Negotiation,
            Error::Transport(_) | Error::IoError(_) => ErrorCategory::Transport,
            Error::Teardown(_) => ErrorCategory::Teardown,
            Error::InvalidConfig(_)
            | Error::InvalidState { .. }
            | Error::InvalidTransition { .. }
            | Error::Cancelled(_)
            | Error::InvalidUrl(_)
            | Error::Other(_) => ErrorCategory::Usage,
        }
    }

    /// Single user-visible message for this error
    pub fn user_message(&self) -> String {
        match self.category() {
            ErrorCategory::Acquisition => format!("Failed to start session: {}", self),
            ErrorCategory::Negotiation => match self {
                Error::Negotiation(NegotiationFailure::ConnectionFailed(_)) => {
                    "Connection failed".to_string()
                }
                other => format!("Failed to initialize stream: {}", other),
            },
            ErrorCategory::Transport => format!("Failed to load stream: {}", self),
            ErrorCategory::Teardown => format!("Failed to stop session: {}", self),
            ErrorCategory::Usage => self.to_string(),
        }
    }

    /// Check if the user may retry `start()` after this error
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::Acquisition | ErrorCategory::Negotiation | ErrorCategory::Transport
        )
    }

    /// Shorthand for a negotiation failure
    pub fn negotiation(failure: NegotiationFailure) -> Self {
        Error::Negotiation(failure)
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Api(e.to_string())
    }
}
