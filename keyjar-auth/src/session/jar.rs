//! Jar state machine.

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::challenge::Challenge;
use crate::identity::{Fingerprint, PublicKey};

use super::SessionError;

/// Identifies one jar generation.
///
/// A client key can be reused after its jar resolves, so callbacks carry the
/// id of the jar they were validated against to avoid acting on a successor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct JarId(Uuid);

impl JarId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for JarId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Why a callback was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// The proof did not open or did not carry the jar's challenge.
    AuthenticationFailed,
    /// The identity or a requested principal is not allowed.
    Unauthorized,
    /// The CA could not sign.
    SigningFailed,
}

/// Lifecycle state of a jar.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JarState {
    /// Awaiting the identity-provider callback.
    Pending,
    /// Callback validated and certificate issued.
    Completed { identity: String },
    /// Deadline passed before completion.
    Expired,
    /// Callback failed validation.
    Rejected { reason: RejectReason },
}

impl JarState {
    /// True for every state other than `Pending`.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

/// One in-flight authentication attempt.
///
/// Fields are private so nothing outside this module can extend a deadline
/// or skip the single pending-to-terminal transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Jar {
    id: JarId,
    key: PublicKey,
    challenge: Challenge,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    state: JarState,
}

impl Jar {
    /// Create a pending jar expiring `limit` after `now`.
    #[must_use]
    pub fn new(key: PublicKey, challenge: Challenge, now: DateTime<Utc>, limit: Duration) -> Self {
        Self {
            id: JarId::new(),
            key,
            challenge,
            created_at: now,
            expires_at: now + limit,
            state: JarState::Pending,
        }
    }

    #[must_use]
    pub fn id(&self) -> JarId {
        self.id
    }

    #[must_use]
    pub fn key(&self) -> &PublicKey {
        &self.key
    }

    /// Log-safe name for the owning client.
    #[must_use]
    pub fn fingerprint(&self) -> Fingerprint {
        self.key.fingerprint()
    }

    #[must_use]
    pub fn challenge(&self) -> &Challenge {
        &self.challenge
    }

    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    #[must_use]
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    #[must_use]
    pub fn state(&self) -> &JarState {
        &self.state
    }

    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.state == JarState::Pending
    }

    /// A jar is expired at and after its deadline.
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Transition to `Completed`.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::AlreadyTerminal` without touching state if the
    /// jar is not pending.
    pub fn complete(&mut self, identity: &str) -> Result<(), SessionError> {
        self.transition(JarState::Completed {
            identity: identity.to_string(),
        })
    }

    /// Transition to `Rejected`.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::AlreadyTerminal` if the jar is not pending.
    pub fn reject(&mut self, reason: RejectReason) -> Result<(), SessionError> {
        self.transition(JarState::Rejected { reason })
    }

    /// Transition to `Expired`.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::AlreadyTerminal` if the jar is not pending.
    pub fn expire(&mut self) -> Result<(), SessionError> {
        self.transition(JarState::Expired)
    }

    fn transition(&mut self, next: JarState) -> Result<(), SessionError> {
        if self.state.is_terminal() {
            return Err(SessionError::AlreadyTerminal);
        }
        self.state = next;
        Ok(())
    }
}
