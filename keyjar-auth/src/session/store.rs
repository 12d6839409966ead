//! Concurrent jar storage.

use std::sync::Arc;

use chrono::Duration;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::challenge::Challenge;
use crate::clock::Clock;
use crate::identity::PublicKey;

use super::{Jar, JarId, RejectReason, SessionError};

/// Keyed storage for pending jars.
///
/// # Thread Safety
///
/// Uses `&self` throughout; implementations provide interior mutability.
///
/// # Atomicity
///
/// Every method that inspects and then mutates a jar **MUST** do so under a
/// single lock on that key. In particular `complete`, `reject` and
/// `sweep_expired` racing on one jar must leave exactly one terminal
/// transition, and `create` racing with itself must admit one winner.
///
/// # Expiry
///
/// Implementations evict lazily: any call touching a key whose deadline has
/// passed transitions that jar to `Expired`, removes it and hands it back
/// (as [`SessionError::Expired`] or [`Created::expired`]) so the caller can
/// record it. `sweep_expired` reclaims the rest.
///
/// # Replay
///
/// Jars leave the store on their terminal transition, so a second `complete`
/// or `reject` for the same jar reports `SessionError::NotFound`. The store
/// never returns `SessionError::AlreadyTerminal`; that error belongs to
/// [`Jar`] transitions.
pub trait JarStore: Send + Sync {
    /// Start a session for `key`.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::DuplicateSession` if a live pending jar exists.
    fn create(&self, key: PublicKey, challenge: Challenge) -> Result<Created, SessionError>;

    /// Fetch a snapshot of the live jar for `key`.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::NotFound` if there is no jar and
    /// `SessionError::Expired` if the jar was past its deadline.
    fn lookup(&self, key: &PublicKey) -> Result<Jar, SessionError>;

    /// Mark jar `id` completed by `identity` and remove it.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::NotFound` if the jar is gone, already resolved
    /// or has been replaced, and `SessionError::Expired` if it was past its
    /// deadline.
    fn complete(&self, key: &PublicKey, id: JarId, identity: &str) -> Result<Jar, SessionError>;

    /// Mark jar `id` rejected and remove it.
    ///
    /// # Errors
    ///
    /// Same as [`JarStore::complete`].
    fn reject(&self, key: &PublicKey, id: JarId, reason: RejectReason)
        -> Result<Jar, SessionError>;

    /// Drop whatever jar is stored for `key`.
    fn remove(&self, key: &PublicKey) -> Option<Jar>;

    /// Expire and remove every jar past its deadline, returning them in the
    /// `Expired` state.
    fn sweep_expired(&self) -> Vec<Jar>;

    /// Number of jars currently stored.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Outcome of a successful [`JarStore::create`].
#[derive(Debug, Clone)]
pub struct Created {
    /// The new pending jar.
    pub jar: Jar,
    /// A predecessor for the same key that had passed its deadline, now in
    /// the `Expired` state.
    pub expired: Option<Jar>,
}

/// In-memory [`JarStore`] backed by a sharded `DashMap`.
///
/// Per-key operations lock only the shard holding that key, so sessions for
/// different clients proceed in parallel.
pub struct MemoryJarStore {
    jars: DashMap<PublicKey, Jar>,
    limit: Duration,
    clock: Arc<dyn Clock>,
}

impl MemoryJarStore {
    /// Create a store whose jars live for `limit`.
    pub fn new(limit: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            jars: DashMap::new(),
            limit,
            clock,
        }
    }

    /// Session time limit.
    pub fn limit(&self) -> Duration {
        self.limit
    }

    fn resolve<F>(&self, key: &PublicKey, id: JarId, transition: F) -> Result<Jar, SessionError>
    where
        F: FnOnce(&mut Jar) -> Result<(), SessionError>,
    {
        let now = self.clock.now();

        match self.jars.entry(*key) {
            Entry::Vacant(_) => Err(SessionError::NotFound),
            Entry::Occupied(mut entry) => {
                if entry.get().id() != id {
                    return Err(SessionError::NotFound);
                }
                if entry.get().is_expired_at(now) {
                    return Err(evicted(entry.remove()));
                }

                transition(entry.get_mut())?;
                Ok(entry.remove())
            }
        }
    }
}

impl JarStore for MemoryJarStore {
    fn create(&self, key: PublicKey, challenge: Challenge) -> Result<Created, SessionError> {
        let now = self.clock.now();

        // Entry API holds the shard lock across check and insert
        match self.jars.entry(key) {
            Entry::Occupied(mut entry) => {
                if !entry.get().is_expired_at(now) {
                    return Err(SessionError::DuplicateSession);
                }
                let jar = Jar::new(key, challenge, now, self.limit);
                let mut previous = entry.insert(jar.clone());
                Ok(Created {
                    jar,
                    expired: previous.expire().is_ok().then_some(previous),
                })
            }
            Entry::Vacant(entry) => {
                let jar = Jar::new(key, challenge, now, self.limit);
                entry.insert(jar.clone());
                Ok(Created { jar, expired: None })
            }
        }
    }

    fn lookup(&self, key: &PublicKey) -> Result<Jar, SessionError> {
        let now = self.clock.now();

        match self.jars.entry(*key) {
            Entry::Vacant(_) => Err(SessionError::NotFound),
            Entry::Occupied(entry) => {
                if entry.get().is_expired_at(now) {
                    return Err(evicted(entry.remove()));
                }
                Ok(entry.get().clone())
            }
        }
    }

    fn complete(&self, key: &PublicKey, id: JarId, identity: &str) -> Result<Jar, SessionError> {
        self.resolve(key, id, |jar| jar.complete(identity))
    }

    fn reject(
        &self,
        key: &PublicKey,
        id: JarId,
        reason: RejectReason,
    ) -> Result<Jar, SessionError> {
        self.resolve(key, id, |jar| jar.reject(reason))
    }

    fn remove(&self, key: &PublicKey) -> Option<Jar> {
        self.jars.remove(key).map(|(_, jar)| jar)
    }

    fn sweep_expired(&self) -> Vec<Jar> {
        let now = self.clock.now();
        let mut expired = Vec::new();

        self.jars.retain(|_, jar| {
            if !jar.is_expired_at(now) {
                return true;
            }
            if jar.expire().is_ok() {
                expired.push(jar.clone());
            }
            false
        });

        expired
    }

    fn len(&self) -> usize {
        self.jars.len()
    }
}

fn evicted(mut jar: Jar) -> SessionError {
    if jar.expire().is_err() {
        // Only pending jars are stored
        return SessionError::NotFound;
    }
    SessionError::Expired(Box::new(jar))
}

impl std::fmt::Debug for MemoryJarStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryJarStore")
            .field("jars", &self.jars.len())
            .field("limit", &self.limit)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::entropy::SharedRng;
    use crate::identity::PrivateKey;
    use crate::session::JarState;
    use chrono::Utc;
    use std::thread;

    struct Fixture {
        store: Arc<MemoryJarStore>,
        clock: Arc<ManualClock>,
        rng: SharedRng,
    }

    impl Fixture {
        fn new() -> Self {
            let clock = Arc::new(ManualClock::new(Utc::now()));
            let store = Arc::new(MemoryJarStore::new(Duration::minutes(30), clock.clone()));
            Self {
                store,
                clock,
                rng: SharedRng::seeded(21),
            }
        }

        fn key(&self) -> PublicKey {
            PrivateKey::generate(&self.rng).unwrap().public_key()
        }

        fn challenge(&self) -> Challenge {
            Challenge::generate(&self.rng).unwrap()
        }
    }

    #[test]
    fn test_create_then_lookup_is_pending() {
        let fx = Fixture::new();
        let key = fx.key();
        let now = fx.clock.now();

        fx.store.create(key, fx.challenge()).unwrap();
        let jar = fx.store.lookup(&key).unwrap();

        assert_eq!(jar.state(), &JarState::Pending);
        assert_eq!(jar.expires_at(), now + Duration::minutes(30));
        assert_eq!(jar.key(), &key);
    }

    #[test]
    fn test_duplicate_create_rejected_without_overwrite() {
        let fx = Fixture::new();
        let key = fx.key();

        let first = fx.store.create(key, fx.challenge()).unwrap().jar;
        assert_eq!(
            fx.store.create(key, fx.challenge()).unwrap_err(),
            SessionError::DuplicateSession
        );

        // The original jar and its challenge are untouched
        let stored = fx.store.lookup(&key).unwrap();
        assert_eq!(stored.id(), first.id());
        assert_eq!(stored.challenge(), first.challenge());
    }

    #[test]
    fn test_key_reusable_after_terminal() {
        let fx = Fixture::new();
        let key = fx.key();

        let jar = fx.store.create(key, fx.challenge()).unwrap().jar;
        let done = fx.store.complete(&key, jar.id(), "alice").unwrap();
        assert_eq!(
            done.state(),
            &JarState::Completed {
                identity: "alice".to_string()
            }
        );
        assert_eq!(fx.store.lookup(&key).unwrap_err(), SessionError::NotFound);

        let next = fx.store.create(key, fx.challenge()).unwrap().jar;
        assert_ne!(next.id(), jar.id());
    }

    #[test]
    fn test_stale_jar_id_cannot_touch_successor() {
        let fx = Fixture::new();
        let key = fx.key();

        let old = fx.store.create(key, fx.challenge()).unwrap().jar;
        fx.store
            .reject(&key, old.id(), RejectReason::AuthenticationFailed)
            .unwrap();
        let new = fx.store.create(key, fx.challenge()).unwrap().jar;

        assert_eq!(
            fx.store.complete(&key, old.id(), "alice").unwrap_err(),
            SessionError::NotFound
        );
        assert!(fx.store.lookup(&key).unwrap().is_pending());
        assert_eq!(fx.store.lookup(&key).unwrap().id(), new.id());
    }

    #[test]
    fn test_complete_unknown_key() {
        let fx = Fixture::new();
        let key = fx.key();
        let other = fx.store.create(fx.key(), fx.challenge()).unwrap().jar;

        assert_eq!(
            fx.store.complete(&key, other.id(), "alice").unwrap_err(),
            SessionError::NotFound
        );
    }

    #[test]
    fn test_presence_before_and_absence_at_deadline() {
        let fx = Fixture::new();
        let key = fx.key();
        fx.store.create(key, fx.challenge()).unwrap();

        fx.clock.advance(Duration::minutes(30) - Duration::milliseconds(1));
        assert!(fx.store.lookup(&key).is_ok());

        fx.clock.advance(Duration::milliseconds(1));
        match fx.store.lookup(&key).unwrap_err() {
            SessionError::Expired(jar) => {
                assert_eq!(jar.key(), &key);
                assert_eq!(jar.state(), &JarState::Expired);
            }
            other => panic!("expected Expired, got {other:?}"),
        }
        assert!(fx.store.is_empty());
        assert_eq!(fx.store.lookup(&key).unwrap_err(), SessionError::NotFound);
    }

    #[test]
    fn test_late_completion_fails() {
        let fx = Fixture::new();
        let key = fx.key();
        let jar = fx.store.create(key, fx.challenge()).unwrap().jar;

        fx.clock.advance(Duration::minutes(31));
        match fx.store.complete(&key, jar.id(), "alice").unwrap_err() {
            SessionError::Expired(expired) => {
                assert_eq!(expired.id(), jar.id());
                assert_eq!(expired.state(), &JarState::Expired);
            }
            other => panic!("expected Expired, got {other:?}"),
        }
        assert!(fx.store.is_empty());
        assert!(fx.store.sweep_expired().is_empty());
    }

    #[test]
    fn test_replayed_resolution_not_found() {
        let fx = Fixture::new();
        let key = fx.key();
        let jar = fx.store.create(key, fx.challenge()).unwrap().jar;

        fx.store.complete(&key, jar.id(), "alice").unwrap();

        assert_eq!(
            fx.store.complete(&key, jar.id(), "alice").unwrap_err(),
            SessionError::NotFound
        );
        assert_eq!(
            fx.store
                .reject(&key, jar.id(), RejectReason::AuthenticationFailed)
                .unwrap_err(),
            SessionError::NotFound
        );
    }

    #[test]
    fn test_create_replaces_expired_jar() {
        let fx = Fixture::new();
        let key = fx.key();
        let old = fx.store.create(key, fx.challenge()).unwrap().jar;

        fx.clock.advance(Duration::minutes(30));
        let created = fx.store.create(key, fx.challenge()).unwrap();

        assert_ne!(created.jar.id(), old.id());
        let expired = created.expired.expect("predecessor handed back");
        assert_eq!(expired.id(), old.id());
        assert_eq!(expired.state(), &JarState::Expired);
        assert_eq!(fx.store.len(), 1);
    }

    #[test]
    fn test_fresh_create_reports_no_predecessor() {
        let fx = Fixture::new();
        let created = fx.store.create(fx.key(), fx.challenge()).unwrap();

        assert!(created.expired.is_none());
        assert!(created.jar.is_pending());
    }

    #[test]
    fn test_sweep_expires_only_due_jars() {
        let fx = Fixture::new();
        let early = fx.key();
        let late = fx.key();

        fx.store.create(early, fx.challenge()).unwrap();
        fx.clock.advance(Duration::minutes(10));
        fx.store.create(late, fx.challenge()).unwrap();

        fx.clock.advance(Duration::minutes(20));
        let swept = fx.store.sweep_expired();

        assert_eq!(swept.len(), 1);
        assert_eq!(swept[0].key(), &early);
        assert_eq!(swept[0].state(), &JarState::Expired);
        assert!(fx.store.lookup(&late).is_ok());
    }

    #[test]
    fn test_completed_jar_not_swept() {
        let fx = Fixture::new();
        let key = fx.key();
        let jar = fx.store.create(key, fx.challenge()).unwrap().jar;

        fx.store.complete(&key, jar.id(), "alice").unwrap();
        fx.clock.advance(Duration::hours(1));

        assert!(fx.store.sweep_expired().is_empty());
    }

    #[test]
    fn test_remove() {
        let fx = Fixture::new();
        let key = fx.key();
        fx.store.create(key, fx.challenge()).unwrap();

        assert!(fx.store.remove(&key).is_some());
        assert!(fx.store.remove(&key).is_none());
    }

    #[test]
    fn test_concurrent_resolution_single_winner() {
        let fx = Fixture::new();
        let key = fx.key();
        let jar = fx.store.create(key, fx.challenge()).unwrap().jar;

        let mut handles = vec![];
        for i in 0..16 {
            let store = Arc::clone(&fx.store);
            let id = jar.id();
            handles.push(thread::spawn(move || {
                if i % 2 == 0 {
                    store.complete(&key, id, "alice").is_ok()
                } else {
                    store
                        .reject(&key, id, RejectReason::AuthenticationFailed)
                        .is_ok()
                }
            }));
        }

        let wins = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|&won| won)
            .count();
        assert_eq!(wins, 1, "exactly one terminal transition");
        assert!(fx.store.is_empty());
    }

    #[test]
    fn test_concurrent_create_single_winner() {
        let fx = Fixture::new();
        let key = fx.key();

        let mut handles = vec![];
        for _ in 0..16 {
            let store = Arc::clone(&fx.store);
            let challenge = fx.challenge();
            handles.push(thread::spawn(move || store.create(key, challenge).is_ok()));
        }

        let created = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|&ok| ok)
            .count();
        assert_eq!(created, 1);
    }

    #[test]
    fn test_independent_keys_do_not_interfere() {
        let fx = Fixture::new();
        let keys: Vec<PublicKey> = (0..64).map(|_| fx.key()).collect();

        let handles: Vec<_> = keys
            .iter()
            .map(|&key| {
                let store = Arc::clone(&fx.store);
                let challenge = fx.challenge();
                thread::spawn(move || {
                    let jar = store.create(key, challenge).unwrap().jar;
                    store.complete(&key, jar.id(), "alice").unwrap();
                })
            })
            .collect();

        for h in handles {
            h.join().unwrap();
        }
        assert!(fx.store.is_empty());
    }
}
