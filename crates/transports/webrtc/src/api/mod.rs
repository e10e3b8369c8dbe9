//! Remote session API collaborator
//!
//! The avatar-hosting backend creates sessions, issues speak commands and
//! terminates sessions. The lifecycle only sees the [`SessionApi`] trait so
//! tests can script it.

mod client;
mod types;

pub use client::HttpSessionApi;
pub use types::{ApiResponse, CreateSessionRequest, CreateSessionResponse, SpeakRequest, TaskType};

use crate::Result;
use async_trait::async_trait;
use serde_json::Value;

/// Request/response API of the avatar-hosting service
#[async_trait]
pub trait SessionApi: Send + Sync {
    /// Create a session; failures are [`crate::Error::Acquisition`]
    async fn create_session(&self, request: &CreateSessionRequest) -> Result<CreateSessionResponse>;

    /// Make the avatar speak
    async fn speak(&self, request: &SpeakRequest) -> Result<ApiResponse>;

    /// Terminate a session; failures are [`crate::Error::Teardown`]
    async fn stop_session(&self, session_id: &str) -> Result<ApiResponse>;

    /// Session status payload
    async fn session_status(&self, session_id: &str) -> Result<ApiResponse>;

    /// Avatar / voice catalog
    async fn list_avatars(&self) -> Result<Value>;
}
