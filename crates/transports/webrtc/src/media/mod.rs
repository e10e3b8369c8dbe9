//! Media binding: inbound tracks, fetched resources and the render surface
//!
//! [`MediaTransport`] owns the one source bound to the render surface. A source
//! is either a [`LiveStream`] of peer-connection tracks or a [`LocalResource`]
//! materialized from a direct fetch; both are wrapped in a [`MediaHandle`].

mod resource;
mod surface;
mod track;
mod transport;

pub use resource::{HttpFetcher, LocalResource, ResourceFetcher};
pub use surface::{HeadlessSurface, Presentation, RenderSurface, RenderTarget};
pub use track::{LiveStream, MediaTrack, TrackKind};
pub use transport::{MediaHandle, MediaSource, MediaTransport, SharedTransport};
