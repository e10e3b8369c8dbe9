//! Negotiation state machine

use crate::{Error, Result};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Progress of one negotiation attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NegotiationState {
    /// Nothing started
    #[default]
    Idle,
    /// Creating the local offer
    AwaitingLocalDescription,
    /// Offer created, waiting for the remote answer
    AwaitingRemoteAnswer,
    /// Answer applied, waiting for media
    IceExchanging,
    /// Stream bound
    Ready,
    /// Terminal failure
    Failed,
}

impl NegotiationState {
    fn rank(self) -> u8 {
        match self {
            NegotiationState::Idle => 0,
            NegotiationState::AwaitingLocalDescription => 1,
            NegotiationState::AwaitingRemoteAnswer => 2,
            NegotiationState::IceExchanging => 3,
            NegotiationState::Ready => 4,
            NegotiationState::Failed => 5,
        }
    }

    /// Whether no further transition is possible
    pub fn is_terminal(self) -> bool {
        matches!(self, NegotiationState::Ready | NegotiationState::Failed)
    }

    /// Transitions only move forward; `Failed` is reachable from any
    /// non-terminal state. Skipping forward is allowed.
    pub fn can_transition_to(self, next: NegotiationState) -> bool {
        !self.is_terminal() && next.rank() > self.rank()
    }

    /// The single authorized transition function
    pub fn transition(self, next: NegotiationState) -> Result<NegotiationState> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(Error::InvalidTransition {
                from: self.to_string(),
                to: next.to_string(),
            })
        }
    }
}

impl fmt::Display for NegotiationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Shared, observable state of one attempt
///
/// Clones observe the same attempt. Every transition goes through
/// [`NegotiationState::transition`] and is recorded.
#[derive(Debug, Clone)]
pub struct NegotiationTracker {
    attempt: u64,
    inner: Arc<Mutex<TrackerInner>>,
}

#[derive(Debug, Default)]
struct TrackerInner {
    state: NegotiationState,
    history: Vec<NegotiationState>,
}

impl NegotiationTracker {
    /// Tracker for attempt `attempt`, starting at `Idle`
    pub fn new(attempt: u64) -> Self {
        Self {
            attempt,
            inner: Arc::new(Mutex::new(TrackerInner::default())),
        }
    }

    /// Attempt number
    pub fn attempt(&self) -> u64 {
        self.attempt
    }

    /// Current state
    pub fn state(&self) -> NegotiationState {
        self.inner.lock().state
    }

    /// States entered so far, in order (not including the initial `Idle`)
    pub fn history(&self) -> Vec<NegotiationState> {
        self.inner.lock().history.clone()
    }

    /// Move to `next`
    pub fn advance(&self, next: NegotiationState) -> Result<()> {
        let mut inner = self.inner.lock();
        let from = inner.state;
        inner.state = from.transition(next)?;
        inner.history.push(next);

        debug!(
            "Negotiation {} state transition: {} -> {}",
            self.attempt, from, next
        );
        Ok(())
    }

    /// Move to `Failed` unless already terminal; returns whether it moved
    pub fn fail(&self) -> bool {
        self.advance(NegotiationState::Failed).is_ok()
    }
}
