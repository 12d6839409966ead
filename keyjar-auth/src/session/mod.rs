//! Pending authentication sessions ("jars") and the store that holds them.
//!
//! A jar is keyed by the client's public key and moves through:
//!
//! ```text
//! Pending ──► Completed
//!    │
//!    ├──────► Rejected
//!    │
//!    └──────► Expired
//! ```
//!
//! Every transition out of `Pending` removes the jar from the store in the
//! same critical section, which frees the key for a new session and makes
//! resurrection impossible.

mod error;
mod jar;
mod store;

pub use error::SessionError;
pub use jar::{Jar, JarId, JarState, RejectReason};
pub use store::{Created, JarStore, MemoryJarStore};
