//! Broker configuration.
//!
//! Flags are read once at startup and applied, in order, to a
//! [`BrokerConfig`] builder value. Every step can fail, and the broker only
//! exists once [`BrokerConfig::build`] has validated the whole combination.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::Args;
use keyjar_auth::authz::{PrincipalError, PrincipalSet};
use keyjar_auth::cert::{CaKey, CaKeyError, CertificateIssuer};
use keyjar_auth::challenge::ChallengeCodec;
use keyjar_auth::clock::Clock;
use keyjar_auth::entropy::SharedRng;
use keyjar_auth::identity::{BrokerKeys, KeyError};
use keyjar_auth::session::MemoryJarStore;
use zeroize::Zeroizing;

use crate::services::Broker;
use crate::stats::BrokerStats;

/// Default session time limit.
pub const DEFAULT_TIME_LIMIT: Duration = Duration::from_secs(30 * 60);

/// Default CA private key location.
pub const DEFAULT_CA_PATH: &str = "/etc/ssh/ca.pem";

/// Configuration errors. All of them are fatal at startup.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("time limit must be positive and representable")]
    InvalidTimeLimit,

    #[error("certificate validity must be positive and representable")]
    InvalidCertValidity,

    #[error("auth URL is not set")]
    MissingAuthUrl,

    #[error("there cannot be 0 principals")]
    EmptyPrincipals,

    #[error("invalid principals: {0}")]
    InvalidPrincipals(PrincipalError),

    #[error("CA key is not set")]
    MissingCaKey,

    #[error("failed to read CA key {path}: {source}")]
    ReadCaKey {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid CA key: {0}")]
    InvalidCaKey(#[from] CaKeyError),

    #[error("failed to generate broker keypair: {0}")]
    KeyGeneration(#[from] KeyError),
}

impl From<PrincipalError> for ConfigError {
    fn from(e: PrincipalError) -> Self {
        match e {
            PrincipalError::Empty => ConfigError::EmptyPrincipals,
            other => ConfigError::InvalidPrincipals(other),
        }
    }
}

/// Command-line and environment configuration.
#[derive(Debug, Clone, Args)]
pub struct Flags {
    /// How long a session may wait for the identity provider (e.g. "30m", "1h")
    #[arg(long, env = "KEYJAR_TIME_LIMIT", default_value = "30m", value_parser = parse_duration)]
    pub time_limit: Duration,

    /// Identity provider endpoint clients are redirected to
    #[arg(long, env = "KEYJAR_AUTH_URL", default_value = "")]
    pub auth_url: String,

    /// Comma-separated principals allowed to receive certificates
    #[arg(long, env = "KEYJAR_PRINCIPALS", default_value = "")]
    pub principals: String,

    /// Path to the unencrypted OpenSSH CA private key
    #[arg(long, env = "KEYJAR_CA", default_value = DEFAULT_CA_PATH)]
    pub ca: PathBuf,

    /// Certificate lifetime, capped at the time limit
    #[arg(long, env = "KEYJAR_CERT_VALIDITY", value_parser = parse_duration)]
    pub cert_validity: Option<Duration>,

    /// How often expired sessions are swept
    #[arg(long, env = "KEYJAR_SWEEP_INTERVAL", default_value = "30s", value_parser = parse_duration)]
    pub sweep_interval: Duration,
}

impl Flags {
    /// Apply the flags to `config` in order: time limit, auth URL, CA key,
    /// principals, certificate validity.
    ///
    /// # Errors
    ///
    /// Returns the first step's `ConfigError`.
    pub fn apply(&self, config: BrokerConfig) -> Result<BrokerConfig, ConfigError> {
        let config = config
            .with_time_limit(self.time_limit)?
            .with_auth_url(&self.auth_url)?
            .with_ca_key_file(&self.ca)?
            .with_principals(&self.principals)?;

        match self.cert_validity {
            Some(validity) => config.with_cert_validity(validity),
            None => Ok(config),
        }
    }
}

/// Builder value for a [`Broker`].
#[derive(Debug)]
pub struct BrokerConfig {
    time_limit: chrono::Duration,
    auth_url: Option<String>,
    ca_key: Option<CaKey>,
    principals: Option<PrincipalSet>,
    cert_validity: Option<chrono::Duration>,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            time_limit: chrono::Duration::minutes(30),
            auth_url: None,
            ca_key: None,
            principals: None,
            cert_validity: None,
        }
    }
}

impl BrokerConfig {
    /// Set the session time limit.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidTimeLimit` for zero.
    pub fn with_time_limit(mut self, limit: Duration) -> Result<Self, ConfigError> {
        self.time_limit = positive(limit).ok_or(ConfigError::InvalidTimeLimit)?;
        Ok(self)
    }

    /// Set the identity provider URL, stripping trailing slashes.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::MissingAuthUrl` if nothing is left.
    pub fn with_auth_url(mut self, url: &str) -> Result<Self, ConfigError> {
        let url = url.trim().trim_end_matches('/');
        if url.is_empty() {
            return Err(ConfigError::MissingAuthUrl);
        }
        self.auth_url = Some(url.to_string());
        Ok(self)
    }

    /// Set the CA signing key.
    pub fn with_ca_key(mut self, key: CaKey) -> Result<Self, ConfigError> {
        self.ca_key = Some(key);
        Ok(self)
    }

    /// Load the CA signing key from an OpenSSH private key file.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ReadCaKey` if the file cannot be read and
    /// `ConfigError::InvalidCaKey` if it does not hold a usable key.
    pub fn with_ca_key_file(self, path: &Path) -> Result<Self, ConfigError> {
        let pem = Zeroizing::new(std::fs::read(path).map_err(|source| ConfigError::ReadCaKey {
            path: path.to_path_buf(),
            source,
        })?);
        let key = CaKey::from_openssh(&pem)?;
        self.with_ca_key(key)
    }

    /// Set the allowed principals from a comma-separated list.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::EmptyPrincipals` if no names remain after
    /// trimming, and `ConfigError::InvalidPrincipals` for malformed names.
    pub fn with_principals(mut self, raw: &str) -> Result<Self, ConfigError> {
        self.principals = Some(PrincipalSet::parse(raw)?);
        Ok(self)
    }

    /// Set the certificate lifetime. Capped at the time limit on build.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidCertValidity` for zero.
    pub fn with_cert_validity(mut self, validity: Duration) -> Result<Self, ConfigError> {
        self.cert_validity = Some(positive(validity).ok_or(ConfigError::InvalidCertValidity)?);
        Ok(self)
    }

    /// Validate the configuration and assemble the broker.
    ///
    /// The broker keypair and every challenge draw from `rng`; session expiry
    /// reads `clock`.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a required setting is missing or the broker
    /// keypair cannot be generated.
    pub fn build(self, rng: SharedRng, clock: Arc<dyn Clock>) -> Result<Broker, ConfigError> {
        let auth_url = self.auth_url.ok_or(ConfigError::MissingAuthUrl)?;
        let principals = self.principals.ok_or(ConfigError::EmptyPrincipals)?;
        let ca_key = self.ca_key.ok_or(ConfigError::MissingCaKey)?;

        let validity = self
            .cert_validity
            .map_or(self.time_limit, |v| v.min(self.time_limit));

        let keys = BrokerKeys::generate(&rng)?;
        let store = Arc::new(MemoryJarStore::new(self.time_limit, Arc::clone(&clock)));
        let issuer = CertificateIssuer::new(ca_key, principals, validity, rng.clone());

        Ok(Broker::new(
            keys,
            ChallengeCodec::new(rng.clone()),
            store,
            issuer,
            auth_url,
            self.time_limit,
            clock,
            rng,
            BrokerStats::new(),
        ))
    }
}

fn positive(d: Duration) -> Option<chrono::Duration> {
    if d.is_zero() {
        return None;
    }
    chrono::Duration::from_std(d).ok()
}

/// Parse a duration string like "90s", "5m" or "1h". Bare numbers are
/// seconds.
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("empty duration".to_string());
    }

    let (num_str, unit) = if let Some(n) = s.strip_suffix('s') {
        (n, 1)
    } else if let Some(n) = s.strip_suffix('m') {
        (n, 60)
    } else if let Some(n) = s.strip_suffix('h') {
        (n, 3600)
    } else {
        (s, 1)
    };

    let num: u64 = num_str
        .trim()
        .parse()
        .map_err(|_| format!("invalid duration: {}", s))?;
    let secs = num
        .checked_mul(unit)
        .ok_or_else(|| format!("duration too large: {}", s))?;

    Ok(Duration::from_secs(secs))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use keyjar_auth::clock::SystemClock;
    use rand::rngs::OsRng;
    use ssh_key::{Algorithm, LineEnding};
    use std::io::Write;

    #[derive(Parser)]
    struct Cli {
        #[command(flatten)]
        flags: Flags,
    }

    fn ca_file() -> tempfile::NamedTempFile {
        let key = ssh_key::PrivateKey::random(&mut OsRng, Algorithm::Ed25519).unwrap();
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(key.to_openssh(LineEnding::LF).unwrap().as_bytes())
            .unwrap();
        file
    }

    fn flags(ca: &Path, auth_url: &str, principals: &str) -> Flags {
        Cli::parse_from([
            "keyjar-daemon",
            "--ca",
            ca.to_str().unwrap(),
            "--auth-url",
            auth_url,
            "--principals",
            principals,
        ])
        .flags
    }

    fn build(flags: &Flags) -> Result<Broker, ConfigError> {
        flags
            .apply(BrokerConfig::default())?
            .build(SharedRng::seeded(3), Arc::new(SystemClock))
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("30m").unwrap(), Duration::from_secs(1800));
        assert_eq!(parse_duration("1h").unwrap(), Duration::from_secs(3600));
        assert_eq!(parse_duration("90s").unwrap(), Duration::from_secs(90));
        assert_eq!(parse_duration("45").unwrap(), Duration::from_secs(45));
        assert_eq!(parse_duration(" 2m ").unwrap(), Duration::from_secs(120));
        assert!(parse_duration("").is_err());
        assert!(parse_duration("soon").is_err());
        assert!(parse_duration("-5m").is_err());
    }

    #[test]
    fn test_flag_defaults() {
        let cli = Cli::parse_from(["keyjar-daemon"]);

        assert_eq!(cli.flags.time_limit, DEFAULT_TIME_LIMIT);
        assert_eq!(cli.flags.ca, PathBuf::from(DEFAULT_CA_PATH));
        assert_eq!(cli.flags.sweep_interval, Duration::from_secs(30));
        assert!(cli.flags.cert_validity.is_none());
    }

    #[test]
    fn test_build_from_flags() {
        let ca = ca_file();
        let broker = build(&flags(ca.path(), "https://idp.example.com/", "alice, bob")).unwrap();

        assert_eq!(broker.auth_url(), "https://idp.example.com");
        assert_eq!(broker.time_limit(), chrono::Duration::minutes(30));
        assert_eq!(broker.principals().as_slice(), ["alice", "bob"]);
        assert!(broker.ca_public_key().starts_with("ssh-ed25519 "));
    }

    #[test]
    fn test_empty_auth_url_rejected() {
        let ca = ca_file();
        let err = build(&flags(ca.path(), "", "alice")).unwrap_err();
        assert!(matches!(err, ConfigError::MissingAuthUrl));
    }

    #[test]
    fn test_root_auth_url_rejected() {
        let ca = ca_file();
        let err = build(&flags(ca.path(), "/", "alice")).unwrap_err();
        assert!(matches!(err, ConfigError::MissingAuthUrl));
    }

    #[test]
    fn test_empty_principals_rejected() {
        let ca = ca_file();
        let err = build(&flags(ca.path(), "https://idp", " , ,")).unwrap_err();
        assert!(matches!(err, ConfigError::EmptyPrincipals));
    }

    #[test]
    fn test_missing_ca_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = build(&flags(&dir.path().join("nope.pem"), "https://idp", "alice")).unwrap_err();
        assert!(matches!(err, ConfigError::ReadCaKey { .. }));
    }

    #[test]
    fn test_garbage_ca_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"-----BEGIN NONSENSE-----\n").unwrap();

        let err = build(&flags(file.path(), "https://idp", "alice")).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidCaKey(CaKeyError::Parse(_))));
    }

    #[test]
    fn test_zero_time_limit_rejected() {
        let err = BrokerConfig::default()
            .with_time_limit(Duration::ZERO)
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidTimeLimit));
    }

    #[test]
    fn test_cert_validity_capped_at_time_limit() {
        let ca = ca_file();
        let broker = BrokerConfig::default()
            .with_time_limit(Duration::from_secs(600))
            .unwrap()
            .with_auth_url("https://idp")
            .unwrap()
            .with_ca_key_file(ca.path())
            .unwrap()
            .with_principals("alice")
            .unwrap()
            .with_cert_validity(Duration::from_secs(3600))
            .unwrap()
            .build(SharedRng::seeded(4), Arc::new(SystemClock))
            .unwrap();

        assert_eq!(broker.cert_validity(), chrono::Duration::minutes(10));
    }

    #[test]
    fn test_build_requires_every_setting() {
        let err = BrokerConfig::default()
            .build(SharedRng::seeded(5), Arc::new(SystemClock))
            .unwrap_err();
        assert!(matches!(err, ConfigError::MissingAuthUrl));

        let err = BrokerConfig::default()
            .with_auth_url("https://idp")
            .unwrap()
            .with_principals("alice")
            .unwrap()
            .build(SharedRng::seeded(5), Arc::new(SystemClock))
            .unwrap_err();
        assert!(matches!(err, ConfigError::MissingCaKey));
    }
}
