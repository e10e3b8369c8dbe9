//! Stream endpoint descriptors

use crate::api::CreateSessionResponse;
use crate::error::NegotiationFailure;
use crate::{Error, Result};
use std::fmt;
use url::Url;

/// How the stream at an address is obtained
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportKind {
    /// Offer/answer over a signaling channel, media over a peer connection
    P2pSignaling,
    /// Single retrieval of a media resource
    DirectFetch,
    /// Anything else; negotiation refuses it
    Other(String),
}

impl TransportKind {
    /// Derive the kind from a URI scheme
    pub fn from_scheme(scheme: &str) -> Self {
        match scheme {
            "ws" | "wss" => TransportKind::P2pSignaling,
            "https" => TransportKind::DirectFetch,
            other => TransportKind::Other(other.to_string()),
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportKind::P2pSignaling => write!(f, "p2p-signaling"),
            TransportKind::DirectFetch => write!(f, "direct-fetch"),
            TransportKind::Other(scheme) => write!(f, "{}", scheme),
        }
    }
}

/// Where and how to obtain the live stream for one session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamEndpointDescriptor {
    transport_kind: TransportKind,
    address: Url,
    session_id: String,
}

impl StreamEndpointDescriptor {
    /// Build a descriptor; the transport kind follows the address scheme
    pub fn new(address: Url, session_id: impl Into<String>) -> Self {
        Self {
            transport_kind: TransportKind::from_scheme(address.scheme()),
            address,
            session_id: session_id.into(),
        }
    }

    /// Parse `address` and build a descriptor
    pub fn parse(address: &str, session_id: impl Into<String>) -> Result<Self> {
        Ok(Self::new(Url::parse(address)?, session_id))
    }

    /// Descriptor for a freshly created session
    ///
    /// An unparsable address is a negotiation failure, not a usage error.
    pub fn from_response(response: &CreateSessionResponse) -> Result<Self> {
        let address = Url::parse(&response.streaming_url).map_err(|e| {
            Error::negotiation(NegotiationFailure::InvalidDescriptor(format!(
                "'{}': {}",
                response.streaming_url, e
            )))
        })?;
        Ok(Self::new(address, response.session_id.clone()))
    }

    /// Transport kind
    pub fn transport_kind(&self) -> &TransportKind {
        &self.transport_kind
    }

    /// Stream address
    pub fn address(&self) -> &Url {
        &self.address
    }

    /// Server-issued session id
    pub fn session_id(&self) -> &str {
        &self.session_id
    }
}
