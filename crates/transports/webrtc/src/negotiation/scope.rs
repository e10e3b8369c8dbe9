//! Attempt generations and scoped resource release

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::debug;

/// Monotonic attempt counter
///
/// Every `start()` and `stop()` advances it; an [`AttemptToken`] is current
/// only while no later advance has happened.
#[derive(Debug, Clone, Default)]
pub struct Generation {
    counter: Arc<AtomicU64>,
}

impl Generation {
    /// New counter at generation 0
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a new generation and return its token
    pub fn advance(&self) -> AttemptToken {
        let id = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        AttemptToken {
            id,
            counter: Arc::clone(&self.counter),
        }
    }

    /// Current generation number
    pub fn current(&self) -> u64 {
        self.counter.load(Ordering::SeqCst)
    }
}

/// Identifies one negotiation attempt
#[derive(Debug, Clone)]
pub struct AttemptToken {
    id: u64,
    counter: Arc<AtomicU64>,
}

impl AttemptToken {
    /// Generation this token was issued for
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Whether no newer generation has started
    pub fn is_current(&self) -> bool {
        self.counter.load(Ordering::SeqCst) == self.id
    }
}

type Cleanup = Box<dyn FnOnce() + Send>;

/// Resources acquired by one attempt, released together
///
/// Cleanups run synchronously, last registered first, exactly once. Releasing
/// also signals cancellation to anything awaiting [`ResourceScope::cancelled`].
/// Registering after release runs the cleanup immediately.
pub struct ResourceScope {
    cleanups: Mutex<Vec<(&'static str, Cleanup)>>,
    released: AtomicBool,
    cancel: watch::Sender<bool>,
}

impl Default for ResourceScope {
    fn default() -> Self {
        Self {
            cleanups: Mutex::new(Vec::new()),
            released: AtomicBool::new(false),
            cancel: watch::channel(false).0,
        }
    }
}

impl ResourceScope {
    /// Empty scope
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register a cleanup
    pub fn defer(&self, label: &'static str, cleanup: impl FnOnce() + Send + 'static) {
        {
            let mut cleanups = self.cleanups.lock();
            if !self.is_released() {
                cleanups.push((label, Box::new(cleanup)));
                return;
            }
        }

        debug!("Scope already released, running {} cleanup now", label);
        cleanup();
    }

    /// Run every cleanup (idempotent); returns how many ran
    pub fn release(&self) -> usize {
        let cleanups = {
            let mut cleanups = self.cleanups.lock();
            if self.released.swap(true, Ordering::SeqCst) {
                return 0;
            }
            std::mem::take(&mut *cleanups)
        };

        self.cancel.send_replace(true);

        let count = cleanups.len();
        for (label, cleanup) in cleanups.into_iter().rev() {
            debug!("Releasing {}", label);
            cleanup();
        }
        count
    }

    /// Whether release() has run
    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }

    /// Resolves once the scope is released
    pub async fn cancelled(&self) {
        let mut rx = self.cancel.subscribe();
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }
}

impl Drop for ResourceScope {
    fn drop(&mut self) {
        self.release();
    }
}
