//! Broker and client key material for the sealed-challenge handshake.
//!
//! - [`PrivateKey`] - X25519 secret, zeroized on drop, no `Debug`
//! - [`PublicKey`] - X25519 public key; a client's key also names its jar
//! - [`BrokerKeys`] - the broker's process-lifetime keypair
//! - [`Fingerprint`] - `SHA256:{url_safe_base64_no_padding}` for logs
//!
//! # Example
//!
//! ```
//! use keyjar_auth::entropy::SharedRng;
//! use keyjar_auth::identity::{BrokerKeys, Fingerprint};
//!
//! let keys = BrokerKeys::generate(&SharedRng::os()).unwrap();
//! let fingerprint = Fingerprint::from_public_key(keys.public_key());
//! assert!(fingerprint.as_str().starts_with("SHA256:"));
//! ```

mod keys;

pub use keys::{BrokerKeys, Fingerprint, KeyError, PrivateKey, PublicKey, KEY_SIZE};
