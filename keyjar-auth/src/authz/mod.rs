//! Principal authorization.
//!
//! The broker is configured with a fixed, ordered, non-empty list of
//! principals. An authenticated identity may only receive a certificate if it
//! is one of them, and a certificate may only name principals from the list.

mod principals;

pub use principals::{PrincipalAuthorizer, PrincipalError, PrincipalSet};
