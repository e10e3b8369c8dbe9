//! Inbound media tracks and the live stream they form

use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Track media kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackKind {
    /// Audio track
    Audio,
    /// Video track
    Video,
}

type StopHook = Box<dyn FnOnce() + Send>;

/// Inbound track delivered by the peer connection
///
/// Clones share liveness: stopping one clone stops them all. The stop hook
/// (if any) runs exactly once.
#[derive(Clone)]
pub struct MediaTrack {
    inner: Arc<TrackInner>,
}

struct TrackInner {
    id: String,
    stream_id: String,
    kind: TrackKind,
    live: AtomicBool,
    on_stop: Mutex<Option<StopHook>>,
}

impl MediaTrack {
    /// Create a live track
    pub fn new(id: impl Into<String>, stream_id: impl Into<String>, kind: TrackKind) -> Self {
        Self {
            inner: Arc::new(TrackInner {
                id: id.into(),
                stream_id: stream_id.into(),
                kind,
                live: AtomicBool::new(true),
                on_stop: Mutex::new(None),
            }),
        }
    }

    /// Attach a hook run when the track is stopped
    pub fn with_stop_hook(self, hook: impl FnOnce() + Send + 'static) -> Self {
        *self.inner.on_stop.lock() = Some(Box::new(hook));
        self
    }

    /// Track id
    pub fn id(&self) -> &str {
        &self.inner.id
    }

    /// Id of the media stream this track belongs to
    pub fn stream_id(&self) -> &str {
        &self.inner.stream_id
    }

    /// Media kind
    pub fn kind(&self) -> TrackKind {
        self.inner.kind
    }

    /// Whether the track has not been stopped
    pub fn is_live(&self) -> bool {
        self.inner.live.load(Ordering::SeqCst)
    }

    /// Stop the track (idempotent)
    pub fn stop(&self) {
        if self.inner.live.swap(false, Ordering::SeqCst) {
            let hook = self.inner.on_stop.lock().take();
            if let Some(hook) = hook {
                hook();
            }
        }
    }
}

impl fmt::Debug for MediaTrack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaTrack")
            .field("id", &self.inner.id)
            .field("stream_id", &self.inner.stream_id)
            .field("kind", &self.inner.kind)
            .field("live", &self.is_live())
            .finish()
    }
}

/// Tracks of one remote media stream
#[derive(Debug, Clone)]
pub struct LiveStream {
    stream_id: String,
    tracks: Vec<MediaTrack>,
}

impl LiveStream {
    /// Start a stream from its first arriving track
    pub fn new(first: MediaTrack) -> Self {
        Self {
            stream_id: first.stream_id().to_string(),
            tracks: vec![first],
        }
    }

    /// Stream id
    pub fn stream_id(&self) -> &str {
        &self.stream_id
    }

    /// Tracks in arrival order
    pub fn tracks(&self) -> &[MediaTrack] {
        &self.tracks
    }

    /// Ids of all tracks
    pub fn track_ids(&self) -> Vec<String> {
        self.tracks.iter().map(|t| t.id().to_string()).collect()
    }

    /// Add a later track of the same stream
    ///
    /// Returns false (and leaves the stream unchanged) for tracks of another
    /// stream or tracks already present.
    pub fn add_track(&mut self, track: MediaTrack) -> bool {
        if track.stream_id() != self.stream_id || self.tracks.iter().any(|t| t.id() == track.id()) {
            return false;
        }
        self.tracks.push(track);
        true
    }

    /// Stop every track
    pub fn stop_all(&self) {
        for track in &self.tracks {
            track.stop();
        }
    }

    /// Whether any track is still live
    pub fn has_live_tracks(&self) -> bool {
        self.tracks.iter().any(MediaTrack::is_live)
    }
}
