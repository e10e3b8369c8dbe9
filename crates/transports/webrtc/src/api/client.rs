//! HTTP client for the remote session API
//!
//! Talks to the avatar backend:
//!
//! - `POST /api/avatar/create-session`
//! - `POST /api/avatar/speak`
//! - `POST /api/avatar/stop?session_id=<id>`
//! - `GET  /api/avatar/sessions/<id>`
//! - `GET  /api/avatar/list-avatars`

use super::types::{ApiResponse, CreateSessionRequest, CreateSessionResponse, SpeakRequest};
use super::SessionApi;
use crate::config::ClientConfig;
use crate::{Error, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, instrument};
use url::Url;

const API_PREFIX: &str = "api/avatar";

/// reqwest-backed [`SessionApi`]
pub struct HttpSessionApi {
    /// Base URL (e.g., "http://localhost:8000")
    base_url: Url,

    /// Reqwest HTTP client
    client: reqwest::Client,
}

impl HttpSessionApi {
    /// Create a new session API client
    ///
    /// # Arguments
    ///
    /// * `config` - Client configuration (base URL, request timeout)
    pub fn new(config: &ClientConfig) -> Result<Self> {
        let mut base_url = Url::parse(&config.api_base_url)?;
        if !matches!(base_url.scheme(), "http" | "https") {
            return Err(Error::InvalidConfig(format!(
                "api_base_url must start with http:// or https://, got: {}",
                config.api_base_url
            )));
        }

        // Url::join drops the last path segment unless it ends with '/'
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| Error::InvalidConfig(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { base_url, client })
    }

    /// Base URL requests are resolved against
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Resolve an endpoint below `/api/avatar/`
    fn endpoint(&self, path: &str) -> Result<Url> {
        Ok(self.base_url.join(&format!("{}/{}", API_PREFIX, path))?)
    }

    /// `/api/avatar/sessions/<id>` with the id percent-encoded as one segment
    fn session_endpoint(&self, session_id: &str) -> Result<Url> {
        let mut url = self.endpoint("sessions")?;
        url.path_segments_mut()
            .map_err(|_| Error::InvalidConfig("api_base_url cannot be a base".to_string()))?
            .push(session_id);
        Ok(url)
    }

    /// Send a request and decode the JSON body, mapping non-2xx to an error string
    async fn send<T: DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
    ) -> std::result::Result<T, String> {
        let response = request.send().await.map_err(|e| e.to_string())?;
        let status = response.status();

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(format!("HTTP {}: {}", status, body));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| format!("invalid response body: {}", e))
    }
}

#[async_trait]
impl SessionApi for HttpSessionApi {
    #[instrument(skip(self, request))]
    async fn create_session(&self, request: &CreateSessionRequest) -> Result<CreateSessionResponse> {
        let url = self.endpoint("create-session")?;
        debug!("POST {}", url);

        self.send(self.client.post(url).json(request))
            .await
            .map_err(Error::Acquisition)
    }

    #[instrument(skip(self, request), fields(session_id = %request.session_id))]
    async fn speak(&self, request: &SpeakRequest) -> Result<ApiResponse> {
        let url = self.endpoint("speak")?;
        debug!("POST {}", url);

        self.send(self.client.post(url).json(request))
            .await
            .map_err(Error::Api)
    }

    #[instrument(skip(self))]
    async fn stop_session(&self, session_id: &str) -> Result<ApiResponse> {
        let url = self.endpoint("stop")?;
        debug!("POST {}", url);

        self.send(self.client.post(url).query(&[("session_id", session_id)]))
            .await
            .map_err(Error::Teardown)
    }

    #[instrument(skip(self))]
    async fn session_status(&self, session_id: &str) -> Result<ApiResponse> {
        let url = self.session_endpoint(session_id)?;
        debug!("GET {}", url);

        self.send(self.client.get(url)).await.map_err(Error::Api)
    }

    async fn list_avatars(&self) -> Result<Value> {
        let url = self.endpoint("list-avatars")?;
        debug!("GET {}", url);

        self.send(self.client.get(url)).await.map_err(Error::Api)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client_for(base: &str) -> HttpSessionApi {
        let config = ClientConfig {
            api_base_url: base.to_string(),
            ..Default::default()
        };
        HttpSessionApi::new(&config).unwrap()
    }

    #[test]
    fn test_endpoints_resolve_under_prefix() {
        let api = client_for("http://localhost:8000");
        assert_eq!(
            api.endpoint("create-session").unwrap().as_str(),
            "http://localhost:8000/api/avatar/create-session"
        );
    }

    #[test]
    fn test_base_path_is_preserved() {
        let api = client_for("https://gateway.example/backend");
        assert_eq!(
            api.endpoint("speak").unwrap().as_str(),
            "https://gateway.example/backend/api/avatar/speak"
        );
    }

    #[test]
    fn test_session_id_is_one_path_segment() {
        let api = client_for("http://localhost:8000");
        assert_eq!(
            api.session_endpoint("a/b c").unwrap().as_str(),
            "http://localhost:8000/api/avatar/sessions/a%2Fb%20c"
        );
    }

    #[test]
    fn test_non_http_base_url_rejected() {
        let config = ClientConfig {
            api_base_url: "ftp://files.example".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            HttpSessionApi::new(&config),
            Err(Error::InvalidConfig(_))
        ));
    }
}
