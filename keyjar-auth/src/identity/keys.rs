//! X25519 key types.
//!
//! - Private keys are zeroized on drop and never printable
//! - Public keys are plain 32-byte values, hashable for use as store keys
//! - Fingerprints compare in constant time

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

use crate::entropy::SharedRng;

/// Length of X25519 public and private keys.
pub const KEY_SIZE: usize = 32;

/// Errors that can occur during key operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum KeyError {
    /// The provided bytes have an invalid length.
    #[error("invalid key length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    /// The provided bytes do not represent a usable key.
    #[error("invalid key format")]
    InvalidFormat,

    /// The random source could not produce key material.
    #[error("random source failure")]
    RandomSource,
}

/// A private X25519 key.
///
/// # Security
///
/// - Zeroized on drop (the inner `crypto_box::SecretKey` handles this)
/// - No `Debug` implementation to prevent accidental logging
pub struct PrivateKey(crypto_box::SecretKey);

impl PrivateKey {
    /// Generate a new private key from `rng`.
    ///
    /// # Errors
    ///
    /// Returns `KeyError::RandomSource` if the generator fails.
    pub fn generate(rng: &SharedRng) -> Result<Self, KeyError> {
        let mut bytes = Zeroizing::new([0u8; KEY_SIZE]);
        rng.fill(&mut bytes[..])
            .map_err(|_| KeyError::RandomSource)?;
        Ok(Self(crypto_box::SecretKey::from(*bytes)))
    }

    /// Load a private key from raw bytes.
    ///
    /// # Errors
    ///
    /// Returns `KeyError::InvalidLength` if the slice is not exactly 32 bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, KeyError> {
        let bytes: Zeroizing<[u8; KEY_SIZE]> =
            Zeroizing::new(bytes.try_into().map_err(|_| KeyError::InvalidLength {
                expected: KEY_SIZE,
                actual: bytes.len(),
            })?);
        Ok(Self(crypto_box::SecretKey::from(*bytes)))
    }

    /// Derive the public key.
    #[must_use]
    pub fn public_key(&self) -> PublicKey {
        PublicKey(*self.0.public_key().as_bytes())
    }

    pub(crate) fn as_box_secret(&self) -> &crypto_box::SecretKey {
        &self.0
    }
}

// Explicitly NO Debug implementation for PrivateKey

/// A public X25519 key.
///
/// Clients present one of these when starting a session; it is the key under
/// which their jar is stored.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PublicKey([u8; KEY_SIZE]);

impl PublicKey {
    /// Load a public key from raw bytes.
    ///
    /// # Errors
    ///
    /// Returns `KeyError::InvalidLength` if the slice is not exactly 32 bytes.
    /// Returns `KeyError::InvalidFormat` for the all-zero key, which would
    /// yield an all-zero shared secret.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, KeyError> {
        let bytes: [u8; KEY_SIZE] = bytes.try_into().map_err(|_| KeyError::InvalidLength {
            expected: KEY_SIZE,
            actual: bytes.len(),
        })?;
        if bool::from(bytes.ct_eq(&[0u8; KEY_SIZE])) {
            return Err(KeyError::InvalidFormat);
        }
        Ok(Self(bytes))
    }

    /// Export the raw public key bytes.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; KEY_SIZE] {
        self.0
    }

    /// Encode as URL-safe base64 without padding.
    #[must_use]
    pub fn to_base64(&self) -> String {
        URL_SAFE_NO_PAD.encode(self.0)
    }

    /// Decode from URL-safe base64 without padding.
    ///
    /// # Errors
    ///
    /// Returns `KeyError::InvalidFormat` on malformed base64, otherwise the
    /// errors of [`PublicKey::from_bytes`].
    pub fn from_base64(encoded: &str) -> Result<Self, KeyError> {
        let bytes = URL_SAFE_NO_PAD
            .decode(encoded)
            .map_err(|_| KeyError::InvalidFormat)?;
        Self::from_bytes(&bytes)
    }

    /// Short, log-safe identifier for this key.
    #[must_use]
    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint::from_public_key(self)
    }

    pub(crate) fn to_box_public(self) -> crypto_box::PublicKey {
        crypto_box::PublicKey::from(self.0)
    }
}

impl std::fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PublicKey({})", Fingerprint::from_public_key(self))
    }
}

/// The broker's long-lived encryption keypair.
///
/// Generated once per process; the private half never leaves memory.
pub struct BrokerKeys {
    private: PrivateKey,
    public: PublicKey,
}

impl BrokerKeys {
    /// Generate a fresh keypair.
    ///
    /// # Errors
    ///
    /// Returns `KeyError::RandomSource` if the generator fails.
    pub fn generate(rng: &SharedRng) -> Result<Self, KeyError> {
        let private = PrivateKey::generate(rng)?;
        let public = private.public_key();
        Ok(Self { private, public })
    }

    /// The advertised public half.
    #[must_use]
    pub fn public_key(&self) -> &PublicKey {
        &self.public
    }

    /// The private half, for sealing and opening envelopes.
    #[must_use]
    pub fn private_key(&self) -> &PrivateKey {
        &self.private
    }
}

impl std::fmt::Debug for BrokerKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrokerKeys")
            .field("public", &self.public)
            .finish_non_exhaustive()
    }
}

/// A SHA-256 fingerprint of a public key.
///
/// Format: `SHA256:{url_safe_base64_no_padding}`
///
/// The Hash derive is kept alongside the manual constant-time `PartialEq`;
/// the hash value itself is not secret.
#[derive(Clone, Eq, Hash)]
#[allow(clippy::derived_hash_with_manual_eq)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// The prefix used for fingerprint strings.
    pub const PREFIX: &'static str = "SHA256:";

    /// Create a fingerprint from a public key.
    #[must_use]
    pub fn from_public_key(public_key: &PublicKey) -> Self {
        let hash = Sha256::digest(public_key.to_bytes());
        Self(format!("{}{}", Self::PREFIX, URL_SAFE_NO_PAD.encode(hash)))
    }

    /// Get the fingerprint as a string reference.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl PartialEq for Fingerprint {
    fn eq(&self, other: &Self) -> bool {
        self.0.as_bytes().ct_eq(other.0.as_bytes()).into()
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Fingerprint({})", self.0)
    }
}
