//! Configuration types for the avatar client

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use webrtc::ice_transport::ice_server::RTCIceServer;

/// Main configuration for the session lifecycle and negotiation engine
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Base URL of the remote session API (http:// or https://)
    pub api_base_url: String,

    /// STUN server URLs
    pub stun_servers: Vec<String>,

    /// TURN server configurations (optional)
    pub turn_servers: Vec<TurnServerConfig>,

    /// Avatar selector forwarded to create-session (server default if None)
    pub avatar_id: Option<String>,

    /// Voice selector forwarded to create-session (server default if None)
    pub voice_id: Option<String>,

    /// Requested stream quality (default: High)
    pub quality: Quality,

    /// Upper bound for one negotiation attempt in seconds (default: 30)
    pub negotiation_timeout_secs: u32,

    /// HTTP request timeout in seconds (default: 30)
    pub request_timeout_secs: u32,

    /// Send the offer only after ICE gathering completes (default: true)
    pub wait_for_ice_gathering: bool,
}

/// TURN server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnServerConfig {
    /// TURN server URL (turn: or turns:)
    pub url: String,

    /// Username for TURN authentication
    pub username: String,

    /// Credential for TURN authentication
    pub credential: String,
}

/// Stream quality requested from the session API
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Quality {
    /// Lowest bandwidth
    Low,
    /// Balanced
    Medium,
    /// Best picture (default)
    High,
}

impl std::str::FromStr for Quality {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "low" => Ok(Quality::Low),
            "medium" => Ok(Quality::Medium),
            "high" => Ok(Quality::High),
            other => Err(crate::Error::InvalidConfig(format!(
                "quality must be low, medium or high, got {}",
                other
            ))),
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:8000".to_string(),
            stun_servers: vec!["stun:stun.l.google.com:19302".to_string()],
            turn_servers: Vec::new(),
            avatar_id: None,
            voice_id: None,
            quality: Quality::High,
            negotiation_timeout_secs: 30,
            request_timeout_secs: 30,
            wait_for_ice_gathering: true,
        }
    }
}

impl ClientConfig {
    /// Load a configuration from a JSON file; missing fields take defaults
    pub fn from_file(path: impl AsRef<Path>) -> crate::Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration parameters
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - `api_base_url` is not an http(s) URL
    /// - no STUN or TURN server is configured
    /// - a TURN url does not start with `turn:` or `turns:`
    /// - `negotiation_timeout_secs` or `request_timeout_secs` is not in range 1-300
    pub fn validate(&self) -> crate::Result<()> {
        use crate::Error;

        if !self.api_base_url.starts_with("http://") && !self.api_base_url.starts_with("https://") {
            return Err(Error::InvalidConfig(format!(
                "api_base_url must start with http:// or https://, got {}",
                self.api_base_url
            )));
        }

        // NAT traversal needs at least one reflection or relay server
        if self.stun_servers.is_empty() && self.turn_servers.is_empty() {
            return Err(Error::InvalidConfig(
                "At least one STUN or TURN server is required".to_string(),
            ));
        }

        if let Some(bad) = self
            .stun_servers
            .iter()
            .find(|url| !url.starts_with("stun:") && !url.starts_with("stuns:"))
        {
            return Err(Error::InvalidConfig(format!(
                "stun server must start with stun: or stuns:, got {}",
                bad
            )));
        }

        if let Some(bad) = self
            .turn_servers
            .iter()
            .find(|turn| !turn.url.starts_with("turn:") && !turn.url.starts_with("turns:"))
        {
            return Err(Error::InvalidConfig(format!(
                "turn server must start with turn: or turns:, got {}",
                bad.url
            )));
        }

        if self.negotiation_timeout_secs == 0 || self.negotiation_timeout_secs > 300 {
            return Err(Error::InvalidConfig(format!(
                "negotiation_timeout_secs must be in range 1-300, got {}",
                self.negotiation_timeout_secs
            )));
        }

        if self.request_timeout_secs == 0 || self.request_timeout_secs > 300 {
            return Err(Error::InvalidConfig(format!(
                "request_timeout_secs must be in range 1-300, got {}",
                self.request_timeout_secs
            )));
        }

        Ok(())
    }

    /// ICE server list for a fresh peer connection
    pub fn ice_servers(&self) -> Vec<RTCIceServer> {
        self.stun_servers
            .iter()
            .map(|url| RTCIceServer {
                urls: vec![url.clone()],
                ..Default::default()
            })
            .chain(self.turn_servers.iter().map(|turn| {
                #[allow(clippy::needless_update)]
                RTCIceServer {
                    urls: vec![turn.url.clone()],
                    username: turn.username.clone(),
                    credential: turn.credential.clone(),
                    ..Default::default()
                }
            }))
            .collect()
    }

    /// Negotiation timeout as a Duration
    pub fn negotiation_timeout(&self) -> Duration {
        Duration::from_secs(u64::from(self.negotiation_timeout_secs))
    }

    /// HTTP request timeout as a Duration
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(u64::from(self.request_timeout_secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = ClientConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.quality, Quality::High);
    }

    #[test]
    fn test_no_ice_servers_fails() {
        let mut config = ClientConfig::default();
        config.stun_servers.clear();
        assert!(config.validate().is_err());

        config.turn_servers.push(TurnServerConfig {
            url: "turn:relay.example:3478".to_string(),
            username: "user".to_string(),
            credential: "secret".to_string(),
        });
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_api_url_fails() {
        let mut config = ClientConfig::default();
        config.api_base_url = "ws://localhost:8000".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_timeouts_fail() {
        let mut config = ClientConfig::default();
        config.negotiation_timeout_secs = 0;
        assert!(config.validate().is_err());

        let mut config = ClientConfig::default();
        config.request_timeout_secs = 301;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_ice_servers_include_turn_credentials() {
        let mut config = ClientConfig::default();
        config.turn_servers.push(TurnServerConfig {
            url: "turns:relay.example:5349".to_string(),
            username: "user".to_string(),
            credential: "secret".to_string(),
        });

        let servers = config.ice_servers();
        assert_eq!(servers.len(), 2);
        assert_eq!(servers[0].urls, vec!["stun:stun.l.google.com:19302".to_string()]);
        assert_eq!(servers[1].username, "user");
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: ClientConfig =
            serde_json::from_str(r#"{"api_base_url": "https://api.example", "quality": "low"}"#)
                .unwrap();
        assert_eq!(config.api_base_url, "https://api.example");
        assert_eq!(config.quality, Quality::Low);
        assert_eq!(config.negotiation_timeout_secs, 30);
    }

    #[test]
    fn test_quality_from_str() {
        assert_eq!("HIGH".parse::<Quality>().unwrap(), Quality::High);
        assert!("ultra".parse::<Quality>().is_err());
    }
}
