//! One-time challenges and the sealed envelope that carries them.
//!
//! The handshake is:
//! 1. Broker draws a fresh [`Challenge`] for a new jar
//! 2. Broker seals it to the client: `seal(broker_private, client_public)`
//! 3. Client opens it with `open(client_private, broker_public)`
//! 4. Client seals the same bytes back as proof of possession
//! 5. Identity provider relays the proof; broker opens it with
//!    `open(broker_private, client_public)` and compares in constant time
//!
//! # Security
//!
//! - NaCl box (X25519 + XSalsa20-Poly1305) authenticates both endpoints, so
//!   a proof opened under a jar's key was produced by that key's holder
//! - Every open failure collapses to [`CodecError::AuthenticationFailed`]
//! - Challenges are zeroized on drop and never printed

mod codec;
mod error;
mod value;

pub use codec::{ChallengeCodec, SealedEnvelope, MAX_ENVELOPE_SIZE, NONCE_SIZE};
pub use error::CodecError;
pub use value::{Challenge, CHALLENGE_SIZE};
