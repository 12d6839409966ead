//! Pure session and certificate library for keyjar.
//!
//! This crate is intentionally IO-free:
//! - No filesystem operations
//! - No network calls
//! - No logging
//!
//! Dependencies are injected via traits:
//! - [`clock::Clock`] - Time source for session expiry
//! - [`session::JarStore`] - Pending session storage
//! - [`authz::PrincipalAuthorizer`] - Identity authorization
//!
//! # Example
//!
//! ```
//! use keyjar_auth::challenge::{Challenge, ChallengeCodec};
//! use keyjar_auth::entropy::SharedRng;
//! use keyjar_auth::identity::BrokerKeys;
//!
//! let rng = SharedRng::seeded(1);
//! let broker = BrokerKeys::generate(&rng).unwrap();
//! let client = BrokerKeys::generate(&rng).unwrap();
//! let codec = ChallengeCodec::new(rng.clone());
//!
//! // Broker seals a challenge that only the client can open
//! let challenge = Challenge::generate(&rng).unwrap();
//! let sealed = codec
//!     .seal_challenge(broker.private_key(), client.public_key(), &challenge)
//!     .unwrap();
//!
//! let opened = codec
//!     .open_challenge(client.private_key(), broker.public_key(), &sealed)
//!     .unwrap();
//! assert_eq!(opened, challenge);
//! ```

pub mod authz;
pub mod cert;
pub mod challenge;
pub mod clock;
pub mod entropy;
pub mod identity;
pub mod session;

pub use authz::{PrincipalAuthorizer, PrincipalError, PrincipalSet};
pub use cert::{CaKey, CaKeyError, CertificateIssuer, IssueError, IssuedCertificate};
pub use challenge::{Challenge, ChallengeCodec, CodecError, SealedEnvelope};
pub use clock::{Clock, ManualClock, SystemClock};
pub use entropy::SharedRng;
pub use identity::{BrokerKeys, Fingerprint, KeyError, PrivateKey, PublicKey};
pub use session::{Created, Jar, JarId, JarState, JarStore, MemoryJarStore, RejectReason, SessionError};
