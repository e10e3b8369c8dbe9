//! Session lifecycle
//!
//! Owns at most one avatar session: creates it through the session API,
//! negotiates its stream, and guarantees local cleanup on stop, failure and
//! host disposal.

mod events;
mod lifecycle;

pub use events::SessionEvent;
pub use lifecycle::{Collaborators, LifecycleState, Session, SessionLifecycle};
