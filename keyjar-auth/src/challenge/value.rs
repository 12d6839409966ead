//! The one-time challenge value.

use subtle::ConstantTimeEq;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::entropy::SharedRng;

use super::CodecError;

/// Challenge length in bytes.
pub const CHALLENGE_SIZE: usize = 32;

/// A random one-time value binding a jar to its client key.
///
/// # Security
///
/// - Zeroized on drop
/// - `Debug` is redacted
/// - Comparisons are constant-time
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct Challenge([u8; CHALLENGE_SIZE]);

impl Challenge {
    /// Draw a fresh challenge from `rng`.
    ///
    /// # Errors
    ///
    /// Returns `CodecError::RandomSource` if the generator fails.
    pub fn generate(rng: &SharedRng) -> Result<Self, CodecError> {
        let mut bytes = [0u8; CHALLENGE_SIZE];
        rng.fill(&mut bytes).map_err(|_| CodecError::RandomSource)?;
        Ok(Self(bytes))
    }

    /// Rebuild a challenge from opened envelope bytes.
    ///
    /// # Errors
    ///
    /// Returns `CodecError::AuthenticationFailed` on a length mismatch, so a
    /// well-formed envelope around the wrong payload is not distinguishable.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CodecError> {
        let bytes: [u8; CHALLENGE_SIZE] = bytes
            .try_into()
            .map_err(|_| CodecError::AuthenticationFailed)?;
        Ok(Self(bytes))
    }

    /// Raw challenge bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; CHALLENGE_SIZE] {
        &self.0
    }

    /// Constant-time comparison against candidate bytes.
    #[must_use]
    pub fn matches(&self, candidate: &[u8]) -> bool {
        candidate.len() == CHALLENGE_SIZE && bool::from(self.0.ct_eq(candidate))
    }
}

impl PartialEq for Challenge {
    fn eq(&self, other: &Self) -> bool {
        self.0.ct_eq(&other.0).into()
    }
}

impl Eq for Challenge {}

impl std::fmt::Debug for Challenge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Challenge([redacted])")
    }
}
