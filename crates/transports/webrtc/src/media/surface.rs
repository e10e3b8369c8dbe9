//! Render surface contract

use crate::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::fmt;
use tracing::{debug, info};
use url::Url;

/// What is currently attached to the render surface
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderTarget {
    /// Live peer-connection stream, bound directly
    Live {
        /// Remote stream id
        stream_id: String,
        /// Tracks of that stream bound so far
        track_ids: Vec<String>,
    },
    /// URI-addressable local resource
    Resource {
        /// Local resource URI
        uri: Url,
    },
}

impl fmt::Display for RenderTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RenderTarget::Live {
                stream_id,
                track_ids,
            } => write!(f, "stream {} ({} tracks)", stream_id, track_ids.len()),
            RenderTarget::Resource { uri } => write!(f, "{}", uri),
        }
    }
}

/// Loading / error overlay state shown over the surface
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Presentation {
    /// Nothing to show
    #[default]
    Idle,
    /// Waiting for a stream
    Loading,
    /// Stream is rendering
    Ready,
    /// Stream failed
    Error(String),
}

/// Visual element media is rendered into
#[async_trait]
pub trait RenderSurface: Send + Sync {
    /// Render `target` from now on
    fn attach(&self, target: &RenderTarget);

    /// Stop rendering and drop the source
    fn detach(&self);

    /// Update the overlay
    fn set_presentation(&self, presentation: Presentation);

    /// Resolves once the attached resource has enough data to render
    async fn wait_loaded(&self) -> Result<()> {
        Ok(())
    }
}

/// Surface without a display; logs and remembers what it was asked to show
#[derive(Debug, Default)]
pub struct HeadlessSurface {
    state: Mutex<HeadlessState>,
}

#[derive(Debug, Default)]
struct HeadlessState {
    target: Option<RenderTarget>,
    presentation: Presentation,
}

impl HeadlessSurface {
    /// Create an empty surface
    pub fn new() -> Self {
        Self::default()
    }

    /// Currently attached target
    pub fn target(&self) -> Option<RenderTarget> {
        self.state.lock().target.clone()
    }

    /// Current overlay
    pub fn presentation(&self) -> Presentation {
        self.state.lock().presentation.clone()
    }
}

#[async_trait]
impl RenderSurface for HeadlessSurface {
    fn attach(&self, target: &RenderTarget) {
        info!("Rendering {}", target);
        self.state.lock().target = Some(target.clone());
    }

    fn detach(&self) {
        if self.state.lock().target.take().is_some() {
            debug!("Render surface detached");
        }
    }

    fn set_presentation(&self, presentation: Presentation) {
        debug!("Presentation: {:?}", presentation);
        self.state.lock().presentation = presentation;
    }
}
