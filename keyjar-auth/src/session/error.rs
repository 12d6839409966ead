//! Session error types.

use super::Jar;

/// Errors from jar transitions and store operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum SessionError {
    /// A pending jar already exists for this client key.
    #[error("duplicate session")]
    DuplicateSession,

    /// No live jar matches (unknown, already resolved or replaced).
    #[error("session not found")]
    NotFound,

    /// The jar had passed its deadline and was evicted by this call. It is
    /// returned in the `Expired` state.
    #[error("session expired")]
    Expired(Box<Jar>),

    /// The jar has already left the pending state.
    #[error("session already terminal")]
    AlreadyTerminal,
}
