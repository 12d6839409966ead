//! Injected randomness.
//!
//! Keypair generation, challenges, envelope nonces and certificate serials all
//! draw from one [`SharedRng`] handed in at construction. Production code uses
//! [`SharedRng::os`]; tests pass a seeded generator.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use rand::rngs::{OsRng, StdRng};
use rand::{CryptoRng, RngCore, SeedableRng};

/// Object-safe bound for a cryptographically secure generator.
trait SecureRandom: RngCore + CryptoRng + Send {}

impl<T: RngCore + CryptoRng + Send> SecureRandom for T {}

/// A cloneable, thread-safe handle to a cryptographically secure generator.
///
/// Clones share the same underlying state, so a seeded generator produces a
/// single deterministic stream no matter how many components hold a handle.
#[derive(Clone)]
pub struct SharedRng(Arc<Mutex<Box<dyn SecureRandom>>>);

impl SharedRng {
    /// Wrap an arbitrary cryptographically secure generator.
    #[must_use]
    pub fn new<R>(rng: R) -> Self
    where
        R: RngCore + CryptoRng + Send + 'static,
    {
        Self(Arc::new(Mutex::new(Box::new(rng))))
    }

    /// Generator backed by the operating system.
    #[must_use]
    pub fn os() -> Self {
        Self::new(OsRng)
    }

    /// Deterministic generator for tests and reproducible runs.
    #[must_use]
    pub fn seeded(seed: u64) -> Self {
        Self::new(StdRng::seed_from_u64(seed))
    }

    /// Fill `dest` with random bytes, surfacing source failures.
    ///
    /// # Errors
    ///
    /// Returns the underlying generator's error if it cannot produce output.
    pub fn fill(&self, dest: &mut [u8]) -> Result<(), rand::Error> {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .try_fill_bytes(dest)
    }
}

impl RngCore for SharedRng {
    fn next_u32(&mut self) -> u32 {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).next_u32()
    }

    fn next_u64(&mut self) -> u64 {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).next_u64()
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .fill_bytes(dest);
    }

    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), rand::Error> {
        self.fill(dest)
    }
}

impl CryptoRng for SharedRng {}

impl fmt::Debug for SharedRng {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SharedRng")
    }
}

impl Default for SharedRng {
    fn default() -> Self {
        Self::os()
    }
}
