//! Authenticated public-key encryption of challenges.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use crypto_box::aead::{Aead, Nonce};
use crypto_box::SalsaBox;
use zeroize::Zeroizing;

use crate::entropy::SharedRng;
use crate::identity::{PrivateKey, PublicKey};

use super::{Challenge, CodecError};

/// Current envelope format version.
const ENVELOPE_VERSION: u8 = 1;

/// XSalsa20 nonce length.
pub const NONCE_SIZE: usize = 24;

/// Poly1305 tag length.
const TAG_SIZE: usize = 16;

/// Upper bound on a decoded envelope; keeps redirect URLs bounded.
pub const MAX_ENVELOPE_SIZE: usize = 1024;

const MIN_ENVELOPE_SIZE: usize = 1 + NONCE_SIZE + TAG_SIZE;

/// A box-sealed payload.
///
/// Wire format (v1):
/// - 1 byte: version (currently 1)
/// - 24 bytes: random nonce
/// - N + 16 bytes: XSalsa20-Poly1305 ciphertext and tag
///
/// Encoded for transport as URL-safe base64 without padding.
#[derive(Clone, PartialEq, Eq)]
pub struct SealedEnvelope {
    nonce: [u8; NONCE_SIZE],
    ciphertext: Vec<u8>,
}

impl SealedEnvelope {
    /// Serialize to the v1 wire format.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(1 + NONCE_SIZE + self.ciphertext.len());
        bytes.push(ENVELOPE_VERSION);
        bytes.extend_from_slice(&self.nonce);
        bytes.extend_from_slice(&self.ciphertext);
        bytes
    }

    /// Parse the v1 wire format.
    ///
    /// # Errors
    ///
    /// Returns `CodecError::AuthenticationFailed` for any malformed input.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CodecError> {
        if bytes.len() < MIN_ENVELOPE_SIZE || bytes.len() > MAX_ENVELOPE_SIZE {
            return Err(CodecError::AuthenticationFailed);
        }
        if bytes[0] != ENVELOPE_VERSION {
            return Err(CodecError::AuthenticationFailed);
        }

        let nonce: [u8; NONCE_SIZE] = bytes[1..1 + NONCE_SIZE]
            .try_into()
            .map_err(|_| CodecError::AuthenticationFailed)?;

        Ok(Self {
            nonce,
            ciphertext: bytes[1 + NONCE_SIZE..].to_vec(),
        })
    }

    /// Encode for transport.
    #[must_use]
    pub fn to_base64(&self) -> String {
        URL_SAFE_NO_PAD.encode(self.to_bytes())
    }

    /// Decode from transport encoding.
    ///
    /// # Errors
    ///
    /// Returns `CodecError::AuthenticationFailed` for any malformed input.
    pub fn from_base64(encoded: &str) -> Result<Self, CodecError> {
        // Reject oversized input before allocating for it
        if encoded.len() > MAX_ENVELOPE_SIZE.div_ceil(3) * 4 {
            return Err(CodecError::AuthenticationFailed);
        }
        let bytes = URL_SAFE_NO_PAD
            .decode(encoded)
            .map_err(|_| CodecError::AuthenticationFailed)?;
        Self::from_bytes(&bytes)
    }

    /// Length of the wire encoding in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        1 + NONCE_SIZE + self.ciphertext.len()
    }

    /// Always false; an envelope carries at least a version, nonce and tag.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        false
    }
}

impl std::fmt::Debug for SealedEnvelope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SealedEnvelope({} bytes)", self.len())
    }
}

/// Seals and opens envelopes between two X25519 keypairs.
///
/// The same codec serves both ends of the handshake: the broker seals with
/// its private key to the client's public key, and the client seals its
/// proof with its private key to the broker's public key.
#[derive(Debug, Clone)]
pub struct ChallengeCodec {
    rng: SharedRng,
}

impl ChallengeCodec {
    /// Create a codec drawing nonces from `rng`.
    #[must_use]
    pub fn new(rng: SharedRng) -> Self {
        Self { rng }
    }

    /// Seal `plaintext` from `sender` to `recipient`.
    ///
    /// # Errors
    ///
    /// Returns `CodecError::RandomSource` if no nonce could be drawn and
    /// `CodecError::SealFailed` if the result would exceed
    /// [`MAX_ENVELOPE_SIZE`].
    pub fn encrypt(
        &self,
        sender: &PrivateKey,
        recipient: &PublicKey,
        plaintext: &[u8],
    ) -> Result<SealedEnvelope, CodecError> {
        if MIN_ENVELOPE_SIZE + plaintext.len() > MAX_ENVELOPE_SIZE {
            return Err(CodecError::SealFailed);
        }

        let mut nonce = [0u8; NONCE_SIZE];
        self.rng
            .fill(&mut nonce)
            .map_err(|_| CodecError::RandomSource)?;

        let salsa = SalsaBox::new(&recipient.to_box_public(), sender.as_box_secret());
        let ciphertext = salsa
            .encrypt(Nonce::<SalsaBox>::from_slice(&nonce), plaintext)
            .map_err(|_| CodecError::SealFailed)?;

        Ok(SealedEnvelope { nonce, ciphertext })
    }

    /// Open an envelope sealed by `sender` to `recipient`.
    ///
    /// # Errors
    ///
    /// Returns `CodecError::AuthenticationFailed` if the tag does not verify
    /// under this key pair.
    pub fn decrypt(
        &self,
        recipient: &PrivateKey,
        sender: &PublicKey,
        envelope: &SealedEnvelope,
    ) -> Result<Zeroizing<Vec<u8>>, CodecError> {
        let salsa = SalsaBox::new(&sender.to_box_public(), recipient.as_box_secret());
        salsa
            .decrypt(
                Nonce::<SalsaBox>::from_slice(&envelope.nonce),
                envelope.ciphertext.as_slice(),
            )
            .map(Zeroizing::new)
            .map_err(|_| CodecError::AuthenticationFailed)
    }

    /// Seal a challenge.
    ///
    /// # Errors
    ///
    /// See [`ChallengeCodec::encrypt`].
    pub fn seal_challenge(
        &self,
        sender: &PrivateKey,
        recipient: &PublicKey,
        challenge: &Challenge,
    ) -> Result<SealedEnvelope, CodecError> {
        self.encrypt(sender, recipient, challenge.as_bytes())
    }

    /// Open an envelope expected to carry a challenge.
    ///
    /// # Errors
    ///
    /// Returns `CodecError::AuthenticationFailed` if the envelope does not
    /// open or does not carry exactly one challenge.
    pub fn open_challenge(
        &self,
        recipient: &PrivateKey,
        sender: &PublicKey,
        envelope: &SealedEnvelope,
    ) -> Result<Challenge, CodecError> {
        let plaintext = self.decrypt(recipient, sender, envelope)?;
        Challenge::from_bytes(&plaintext)
    }
}
