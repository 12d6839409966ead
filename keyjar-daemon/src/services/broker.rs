//! The session broker: starts sessions and handles identity provider
//! callbacks.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use keyjar_auth::authz::{PrincipalAuthorizer, PrincipalSet};
use keyjar_auth::cert::{CertificateIssuer, IssueError, IssuedCertificate};
use keyjar_auth::challenge::{Challenge, ChallengeCodec, SealedEnvelope};
use keyjar_auth::clock::Clock;
use keyjar_auth::entropy::SharedRng;
use keyjar_auth::identity::{BrokerKeys, PublicKey};
use keyjar_auth::session::{Jar, JarId, JarStore, RejectReason, SessionError};

use crate::stats::BrokerStats;

/// Message shown to clients for every failed callback.
const GENERIC_DENIAL: &str = "authentication denied";

/// Per-session errors.
///
/// `Display` keeps the internal distinction for logs; clients only ever see
/// [`BrokerError::public_message`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum BrokerError {
    #[error("a session is already pending for this key")]
    DuplicateSession,

    #[error("no live session for this key")]
    NotFound,

    #[error("proof of possession failed")]
    AuthenticationFailed,

    #[error("principal not authorized: {0}")]
    Unauthorized(String),

    #[error("certificate signing failed: {0}")]
    SigningFailed(String),

    /// The random source failed while starting a session.
    #[error("entropy source unavailable")]
    Unavailable,
}

impl BrokerError {
    /// The message to return to the client.
    #[must_use]
    pub fn public_message(&self) -> &'static str {
        match self {
            BrokerError::DuplicateSession => "authentication already in progress",
            BrokerError::Unavailable => "service unavailable",
            _ => GENERIC_DENIAL,
        }
    }
}

impl From<SessionError> for BrokerError {
    fn from(e: SessionError) -> Self {
        match e {
            SessionError::DuplicateSession => BrokerError::DuplicateSession,
            _ => BrokerError::NotFound,
        }
    }
}

/// Where to send the user to prove their identity.
#[derive(Debug, Clone)]
pub struct AuthRedirect {
    /// `{auth_url}/?key=<client key>&broker=<broker key>&challenge=<sealed challenge>`
    pub url: String,
    pub broker_key: PublicKey,
    pub jar_id: JarId,
    pub expires_at: DateTime<Utc>,
}

/// The identity provider's report for one session.
#[derive(Debug, Clone)]
pub struct Callback {
    pub client_key: PublicKey,
    /// The identity the provider vouches for.
    pub identity: String,
    /// The challenge, re-sealed by the client to the broker.
    pub proof: SealedEnvelope,
    /// The key to certify.
    pub ssh_public_key: ssh_key::PublicKey,
    /// Principals to embed; empty means just `identity`.
    pub principals: Vec<String>,
}

impl Callback {
    /// Decode a callback from its transport fields.
    ///
    /// `principals` is an optional comma-separated list.
    ///
    /// # Errors
    ///
    /// Any malformed field is `BrokerError::AuthenticationFailed`.
    pub fn decode(
        client_key: &str,
        identity: &str,
        proof: &str,
        ssh_public_key: &str,
        principals: Option<&str>,
    ) -> Result<Self, BrokerError> {
        let client_key =
            PublicKey::from_base64(client_key).map_err(|_| BrokerError::AuthenticationFailed)?;
        let proof =
            SealedEnvelope::from_base64(proof).map_err(|_| BrokerError::AuthenticationFailed)?;
        let ssh_public_key = ssh_key::PublicKey::from_openssh(ssh_public_key.trim())
            .map_err(|_| BrokerError::AuthenticationFailed)?;

        let identity = identity.trim();
        if identity.is_empty() {
            return Err(BrokerError::AuthenticationFailed);
        }

        let principals = principals
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(String::from)
            .collect();

        Ok(Self {
            client_key,
            identity: identity.to_string(),
            proof,
            ssh_public_key,
            principals,
        })
    }
}

/// The assembled broker. Immutable after construction apart from the jar
/// store; build it with [`crate::config::BrokerConfig`].
pub struct Broker {
    keys: BrokerKeys,
    codec: ChallengeCodec,
    store: Arc<dyn JarStore>,
    issuer: CertificateIssuer,
    auth_url: String,
    time_limit: chrono::Duration,
    clock: Arc<dyn Clock>,
    rng: SharedRng,
    stats: BrokerStats,
}

impl Broker {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        keys: BrokerKeys,
        codec: ChallengeCodec,
        store: Arc<dyn JarStore>,
        issuer: CertificateIssuer,
        auth_url: String,
        time_limit: chrono::Duration,
        clock: Arc<dyn Clock>,
        rng: SharedRng,
        stats: BrokerStats,
    ) -> Self {
        Self {
            keys,
            codec,
            store,
            issuer,
            auth_url,
            time_limit,
            clock,
            rng,
            stats,
        }
    }

    /// Start a session for `client_key` and return the identity provider
    /// redirect.
    ///
    /// # Errors
    ///
    /// Returns `BrokerError::DuplicateSession` if a session is already
    /// pending for this key.
    pub fn begin(&self, client_key: &PublicKey) -> Result<AuthRedirect, BrokerError> {
        let fingerprint = client_key.fingerprint();

        let challenge = Challenge::generate(&self.rng).map_err(|e| {
            tracing::error!(client = %fingerprint, error = %e, "Failed to generate challenge");
            BrokerError::Unavailable
        })?;
        let sealed = self
            .codec
            .seal_challenge(self.keys.private_key(), client_key, &challenge)
            .map_err(|e| {
                tracing::error!(client = %fingerprint, error = %e, "Failed to seal challenge");
                BrokerError::Unavailable
            })?;

        let created = self.store.create(*client_key, challenge).map_err(|e| {
            if e == SessionError::DuplicateSession {
                self.stats.record_duplicate_session();
                tracing::warn!(client = %fingerprint, "Duplicate session request");
            }
            self.session_error(e)
        })?;
        if let Some(expired) = &created.expired {
            self.record_expired(expired);
        }
        let jar = created.jar;

        self.stats.record_session_started();
        tracing::info!(
            client = %fingerprint,
            jar = %jar.id(),
            expires_at = %jar.expires_at(),
            "Session started"
        );

        Ok(AuthRedirect {
            url: format!(
                "{}/?key={}&broker={}&challenge={}",
                self.auth_url,
                client_key.to_base64(),
                self.keys.public_key().to_base64(),
                sealed.to_base64()
            ),
            broker_key: *self.keys.public_key(),
            jar_id: jar.id(),
            expires_at: jar.expires_at(),
        })
    }

    /// Validate an identity provider callback and issue a certificate.
    ///
    /// The session is resolved exactly once: on success it is completed, on
    /// any validation failure it is rejected. Either way it leaves the store.
    ///
    /// # Errors
    ///
    /// Returns `BrokerError::NotFound` if no live session matches (including
    /// when a concurrent callback resolved it first),
    /// `BrokerError::AuthenticationFailed` for a bad proof,
    /// `BrokerError::Unauthorized` for a disallowed identity or principal and
    /// `BrokerError::SigningFailed` if the CA could not sign.
    pub fn handle_callback(&self, callback: &Callback) -> Result<IssuedCertificate, BrokerError> {
        let key = &callback.client_key;
        let fingerprint = key.fingerprint();

        let jar = self.store.lookup(key).map_err(|e| {
            tracing::warn!(client = %fingerprint, "Callback for unknown or expired session");
            self.session_error(e)
        })?;

        if !self.verify_proof(&jar, &callback.proof) {
            tracing::warn!(client = %fingerprint, jar = %jar.id(), "Proof of possession failed");
            self.reject(&jar, RejectReason::AuthenticationFailed);
            return Err(BrokerError::AuthenticationFailed);
        }

        if !self.issuer.principals().is_allowed(&callback.identity) {
            tracing::warn!(
                client = %fingerprint,
                identity = %callback.identity,
                "Identity not in principal set"
            );
            self.reject(&jar, RejectReason::Unauthorized);
            return Err(BrokerError::Unauthorized(callback.identity.clone()));
        }

        let issued = match self.issuer.issue(
            &callback.identity,
            &callback.principals,
            &callback.ssh_public_key,
            self.clock.now(),
        ) {
            Ok(issued) => issued,
            Err(IssueError::Unauthorized { principal }) => {
                tracing::warn!(
                    client = %fingerprint,
                    identity = %callback.identity,
                    principal = %principal,
                    "Requested principal not authorized"
                );
                self.reject(&jar, RejectReason::Unauthorized);
                return Err(BrokerError::Unauthorized(principal));
            }
            Err(e) => {
                tracing::error!(client = %fingerprint, error = %e, "Certificate signing failed");
                self.reject(&jar, RejectReason::SigningFailed);
                return Err(BrokerError::SigningFailed(e.to_string()));
            }
        };

        // Only the caller that wins the completion gets the certificate
        if let Err(e) = self.store.complete(key, jar.id(), &callback.identity) {
            tracing::warn!(
                client = %fingerprint,
                jar = %jar.id(),
                error = %e,
                "Session resolved concurrently, discarding certificate"
            );
            return Err(self.session_error(e));
        }

        self.stats.record_completed();
        tracing::info!(
            client = %fingerprint,
            jar = %jar.id(),
            identity = %callback.identity,
            serial = issued.serial,
            valid_before = %issued.valid_before,
            "Certificate issued"
        );

        Ok(issued)
    }

    /// Fetch the live session for `key`.
    ///
    /// # Errors
    ///
    /// Returns `BrokerError::NotFound` if there is none.
    pub fn lookup(&self, key: &PublicKey) -> Result<Jar, BrokerError> {
        self.store.lookup(key).map_err(|e| self.session_error(e))
    }

    fn verify_proof(&self, jar: &Jar, proof: &SealedEnvelope) -> bool {
        self.codec
            .open_challenge(self.keys.private_key(), jar.key(), proof)
            .map(|challenge| challenge == *jar.challenge())
            .unwrap_or(false)
    }

    fn reject(&self, jar: &Jar, reason: RejectReason) {
        match self.store.reject(jar.key(), jar.id(), reason) {
            Ok(_) => self.stats.record_rejected(reason),
            Err(SessionError::Expired(expired)) => self.record_expired(&expired),
            Err(e) => {
                tracing::debug!(jar = %jar.id(), error = %e, "Session already resolved");
            }
        }
    }

    /// Map a store error, accounting for any jar the store evicted on the way.
    fn session_error(&self, e: SessionError) -> BrokerError {
        if let SessionError::Expired(jar) = &e {
            self.record_expired(jar);
        }
        BrokerError::from(e)
    }

    fn record_expired(&self, jar: &Jar) {
        self.stats.record_expired(1);
        tracing::debug!(
            client = %jar.fingerprint(),
            jar = %jar.id(),
            expires_at = %jar.expires_at(),
            "Session expired"
        );
    }

    /// The broker's public key, advertised to clients.
    #[must_use]
    pub fn public_key(&self) -> &PublicKey {
        self.keys.public_key()
    }

    /// The CA public key in authorized-key form.
    #[must_use]
    pub fn ca_public_key(&self) -> &str {
        self.issuer.ca().authorized_key()
    }

    #[must_use]
    pub fn auth_url(&self) -> &str {
        &self.auth_url
    }

    #[must_use]
    pub fn time_limit(&self) -> chrono::Duration {
        self.time_limit
    }

    #[must_use]
    pub fn cert_validity(&self) -> chrono::Duration {
        self.issuer.validity()
    }

    #[must_use]
    pub fn principals(&self) -> &PrincipalSet {
        self.issuer.principals()
    }

    #[must_use]
    pub fn store(&self) -> Arc<dyn JarStore> {
        Arc::clone(&self.store)
    }

    #[must_use]
    pub fn clock(&self) -> Arc<dyn Clock> {
        Arc::clone(&self.clock)
    }

    #[must_use]
    pub fn stats(&self) -> &BrokerStats {
        &self.stats
    }
}

impl std::fmt::Debug for Broker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Broker")
            .field("public_key", self.keys.public_key())
            .field("auth_url", &self.auth_url)
            .field("time_limit", &self.time_limit)
            .field("issuer", &self.issuer)
            .field("sessions", &self.store.len())
            .finish()
    }
}
