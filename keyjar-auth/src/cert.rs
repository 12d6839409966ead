//! SSH certificate issuance.
//!
//! # Security
//!
//! - CA key input is limited to 16KB and must be unencrypted OpenSSH format
//! - Certificates are user certificates valid from issuance for at most the
//!   configured window, naming only principals from the allowed set
//! - Signing errors are returned as-is; there is no fallback

use chrono::{DateTime, Duration, Utc};
use rand::RngCore;
use ssh_key::certificate::{Builder, CertType};
use ssh_key::{Certificate, HashAlg};
use thiserror::Error;

use crate::authz::{PrincipalAuthorizer, PrincipalSet};
use crate::entropy::SharedRng;

/// Maximum CA key file size.
pub const MAX_CA_KEY_SIZE: usize = 16 * 1024;

/// Extensions granted to every certificate (OpenSSH's defaults for
/// `ssh-keygen -s`).
const DEFAULT_EXTENSIONS: &[&str] = &[
    "permit-X11-forwarding",
    "permit-agent-forwarding",
    "permit-port-forwarding",
    "permit-pty",
    "permit-user-rc",
];

/// Errors loading CA key material.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum CaKeyError {
    #[error("CA key too large: {0} bytes (max {MAX_CA_KEY_SIZE})")]
    TooLarge(usize),

    #[error("failed to parse CA private key: {0}")]
    Parse(String),

    #[error("CA private key is encrypted")]
    Encrypted,

    #[error("failed to encode CA public key: {0}")]
    Encode(String),
}

/// Errors issuing a certificate.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum IssueError {
    /// The identity or a requested principal is outside the allowed set.
    #[error("principal not authorized: {principal}")]
    Unauthorized { principal: String },

    /// The CA could not produce a certificate.
    #[error("signing failed: {0}")]
    SigningFailed(String),
}

/// The CA signing key and its authorized-key form.
pub struct CaKey {
    key: ssh_key::PrivateKey,
    authorized_key: String,
}

impl CaKey {
    /// Parse an unencrypted OpenSSH private key.
    ///
    /// # Errors
    ///
    /// Returns `CaKeyError::TooLarge` for input over 16KB,
    /// `CaKeyError::Parse` for malformed input and `CaKeyError::Encrypted`
    /// for passphrase-protected keys.
    pub fn from_openssh(pem: &[u8]) -> Result<Self, CaKeyError> {
        if pem.len() > MAX_CA_KEY_SIZE {
            return Err(CaKeyError::TooLarge(pem.len()));
        }

        let key =
            ssh_key::PrivateKey::from_openssh(pem).map_err(|e| CaKeyError::Parse(e.to_string()))?;
        if key.is_encrypted() {
            return Err(CaKeyError::Encrypted);
        }

        let public = key
            .public_key()
            .to_openssh()
            .map_err(|e| CaKeyError::Encode(e.to_string()))?;

        Ok(Self {
            key,
            authorized_key: format!("{}\n", public),
        })
    }

    /// The CA public key.
    #[must_use]
    pub fn public_key(&self) -> &ssh_key::PublicKey {
        self.key.public_key()
    }

    /// The CA public key as an `authorized_keys` / `TrustedUserCAKeys` line,
    /// newline terminated.
    #[must_use]
    pub fn authorized_key(&self) -> &str {
        &self.authorized_key
    }

    /// SHA-256 fingerprint of the CA public key.
    #[must_use]
    pub fn fingerprint(&self) -> ssh_key::Fingerprint {
        self.key.public_key().fingerprint(HashAlg::Sha256)
    }
}

impl std::fmt::Debug for CaKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "CaKey({})", self.fingerprint())
    }
}

/// A freshly signed certificate and what the client needs to install it.
#[derive(Debug, Clone)]
pub struct IssuedCertificate {
    pub certificate: Certificate,
    /// The certificate in `*-cert.pub` form.
    pub openssh: String,
    /// The CA public key in authorized-key form.
    pub ca_public_key: String,
    pub serial: u64,
    pub principals: Vec<String>,
    pub valid_after: DateTime<Utc>,
    pub valid_before: DateTime<Utc>,
}

/// Signs short-lived user certificates with the CA key.
pub struct CertificateIssuer {
    ca: CaKey,
    principals: PrincipalSet,
    validity: Duration,
    rng: SharedRng,
}

impl CertificateIssuer {
    /// Create an issuer whose certificates are valid for `validity`.
    #[must_use]
    pub fn new(ca: CaKey, principals: PrincipalSet, validity: Duration, rng: SharedRng) -> Self {
        Self {
            ca,
            principals,
            validity,
            rng,
        }
    }

    #[must_use]
    pub fn ca(&self) -> &CaKey {
        &self.ca
    }

    #[must_use]
    pub fn principals(&self) -> &PrincipalSet {
        &self.principals
    }

    #[must_use]
    pub fn validity(&self) -> Duration {
        self.validity
    }

    /// Sign `subject` for `identity`.
    ///
    /// `requested` lists the principals to embed; when empty the certificate
    /// names `identity` alone.
    ///
    /// Authorization is membership in the allowed set, not a per-identity
    /// mapping: an allowed identity may request any allowed principal,
    /// including ones other than itself (`alice` may ask for `root`).
    ///
    /// # Errors
    ///
    /// Returns `IssueError::Unauthorized` if `identity` or any requested
    /// principal is outside the allowed set, and `IssueError::SigningFailed`
    /// if the certificate cannot be built or signed.
    pub fn issue(
        &self,
        identity: &str,
        requested: &[String],
        subject: &ssh_key::PublicKey,
        now: DateTime<Utc>,
    ) -> Result<IssuedCertificate, IssueError> {
        if !self.principals.is_allowed(identity) {
            return Err(IssueError::Unauthorized {
                principal: identity.to_string(),
            });
        }

        let principals: Vec<String> = if requested.is_empty() {
            vec![identity.to_string()]
        } else {
            requested.to_vec()
        };
        if let Some(principal) = self.principals.first_unauthorized(&principals) {
            return Err(IssueError::Unauthorized {
                principal: principal.to_string(),
            });
        }

        let valid_after = now;
        let valid_before = now + self.validity;
        let after_secs = unix_seconds(valid_after)?;
        let before_secs = unix_seconds(valid_before)?;

        let mut rng = self.rng.clone();
        let serial = rng.next_u64();

        let mut builder = Builder::new_with_random_nonce(
            &mut rng,
            subject.key_data().clone(),
            after_secs,
            before_secs,
        )
        .map_err(signing_failed)?;
        builder.serial(serial).map_err(signing_failed)?;
        builder.key_id(identity).map_err(signing_failed)?;
        builder.cert_type(CertType::User).map_err(signing_failed)?;
        for principal in &principals {
            builder
                .valid_principal(principal.as_str())
                .map_err(signing_failed)?;
        }
        for extension in DEFAULT_EXTENSIONS {
            builder
                .extension(*extension, "")
                .map_err(signing_failed)?;
        }

        let certificate = builder.sign(&self.ca.key).map_err(signing_failed)?;
        let openssh = certificate.to_openssh().map_err(signing_failed)?;

        Ok(IssuedCertificate {
            certificate,
            openssh,
            ca_public_key: self.ca.authorized_key.clone(),
            serial,
            principals,
            valid_after,
            valid_before,
        })
    }
}

impl std::fmt::Debug for CertificateIssuer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CertificateIssuer")
            .field("ca", &self.ca)
            .field("principals", &self.principals)
            .field("validity", &self.validity)
            .finish()
    }
}

fn unix_seconds(at: DateTime<Utc>) -> Result<u64, IssueError> {
    u64::try_from(at.timestamp())
        .map_err(|_| IssueError::SigningFailed("timestamp before unix epoch".to_string()))
}

fn signing_failed(e: ssh_key::Error) -> IssueError {
    IssueError::SigningFailed(e.to_string())
}
