//! MediaTransport: the single source bound to the render surface

use super::resource::LocalResource;
use super::surface::{Presentation, RenderSurface, RenderTarget};
use super::track::{LiveStream, MediaTrack};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

/// Where a handle's media comes from
#[derive(Debug)]
pub enum MediaSource {
    /// Tracks from the peer connection
    Live(LiveStream),
    /// Fetched resource
    Resource(LocalResource),
}

/// Opaque handle to the media bound for one session
#[derive(Debug)]
pub struct MediaHandle {
    id: Uuid,
    source: MediaSource,
}

impl MediaHandle {
    /// Handle over a live stream
    pub fn live(stream: LiveStream) -> Self {
        Self {
            id: Uuid::new_v4(),
            source: MediaSource::Live(stream),
        }
    }

    /// Handle over a fetched resource
    pub fn resource(resource: LocalResource) -> Self {
        Self {
            id: Uuid::new_v4(),
            source: MediaSource::Resource(resource),
        }
    }

    /// Handle id
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Underlying source
    pub fn source(&self) -> &MediaSource {
        &self.source
    }

    /// What the render surface should show for this handle
    pub fn render_target(&self) -> RenderTarget {
        match &self.source {
            MediaSource::Live(stream) => RenderTarget::Live {
                stream_id: stream.stream_id().to_string(),
                track_ids: stream.track_ids(),
            },
            MediaSource::Resource(resource) => RenderTarget::Resource {
                uri: resource.uri().clone(),
            },
        }
    }

    /// Stop all tracks or revoke the resource
    pub fn release(&mut self) {
        match &mut self.source {
            MediaSource::Live(stream) => stream.stop_all(),
            MediaSource::Resource(resource) => resource.revoke(),
        }
    }

    /// Whether the handle still holds live media
    pub fn is_live(&self) -> bool {
        match &self.source {
            MediaSource::Live(stream) => stream.has_live_tracks(),
            MediaSource::Resource(resource) => !resource.is_revoked(),
        }
    }
}

/// Owns the render surface's media source; at most one handle bound at a time
pub struct MediaTransport {
    surface: Arc<dyn RenderSurface>,
    bound: Option<MediaHandle>,
}

/// MediaTransport shared between the lifecycle and in-flight negotiations
pub type SharedTransport = Arc<Mutex<MediaTransport>>;

impl MediaTransport {
    /// Create an unbound transport over `surface`
    pub fn new(surface: Arc<dyn RenderSurface>) -> Self {
        Self {
            surface,
            bound: None,
        }
    }

    /// Create a shared transport
    pub fn shared(surface: Arc<dyn RenderSurface>) -> SharedTransport {
        Arc::new(Mutex::new(Self::new(surface)))
    }

    /// Render surface this transport drives
    pub fn surface(&self) -> &Arc<dyn RenderSurface> {
        &self.surface
    }

    /// Bind `handle`, releasing whatever was bound before
    pub fn bind(&mut self, handle: MediaHandle) -> RenderTarget {
        if self.release() {
            debug!("Replaced previously bound media handle");
        }

        let target = handle.render_target();
        info!("Binding media handle {} ({})", handle.id(), target);

        self.surface.attach(&target);
        self.surface.set_presentation(Presentation::Ready);
        self.bound = Some(handle);
        target
    }

    /// Add a later track to the bound live stream
    ///
    /// Returns the updated target, or `None` if the track does not belong to
    /// the bound stream.
    pub fn join_track(&mut self, track: MediaTrack) -> Option<RenderTarget> {
        let handle = self.bound.as_mut()?;
        let MediaSource::Live(stream) = &mut handle.source else {
            return None;
        };

        let track_id = track.id().to_string();
        if !stream.add_track(track) {
            return None;
        }

        let target = handle.render_target();
        debug!("Track {} joined bound stream", track_id);
        self.surface.attach(&target);
        Some(target)
    }

    /// Release the bound handle (idempotent)
    ///
    /// Returns true if something was bound.
    pub fn release(&mut self) -> bool {
        match self.bound.take() {
            Some(mut handle) => {
                handle.release();
                self.surface.detach();
                debug!("Released media handle {}", handle.id());
                true
            }
            None => false,
        }
    }

    /// Release only if `id` is the bound handle
    pub fn release_if(&mut self, id: Uuid) -> bool {
        if self.bound_handle_id() == Some(id) {
            self.release()
        } else {
            false
        }
    }

    /// Whether a handle is bound
    pub fn is_bound(&self) -> bool {
        self.bound.is_some()
    }

    /// Id of the bound handle
    pub fn bound_handle_id(&self) -> Option<Uuid> {
        self.bound.as_ref().map(MediaHandle::id)
    }

    /// Target of the bound handle
    pub fn bound_target(&self) -> Option<RenderTarget> {
        self.bound.as_ref().map(MediaHandle::render_target)
    }

    /// Update the surface overlay
    pub fn set_presentation(&self, presentation: Presentation) {
        self.surface.set_presentation(presentation);
    }
}

impl Drop for MediaTransport {
    fn drop(&mut self) {
        self.release();
    }
}
