//! Codec error types.

/// Errors from sealing or opening envelopes.
///
/// Opening only ever reports `AuthenticationFailed`: truncated input, bad
/// base64, wrong version, wrong key and a forged tag all look the same.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum CodecError {
    /// The envelope could not be opened or did not authenticate.
    #[error("authentication failed")]
    AuthenticationFailed,

    /// Encryption failed.
    #[error("failed to seal envelope")]
    SealFailed,

    /// The random source could not produce a nonce or challenge.
    #[error("random source failure")]
    RandomSource,
}
