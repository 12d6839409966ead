//! Test harnesses for session flow tests.
//!
//! Drives a real [`Broker`] in-process with a manual clock and a seeded
//! random source. `TestClient` plays the client and the identity provider.

use std::sync::Arc;

use chrono::Utc;
use keyjar_auth::challenge::{ChallengeCodec, SealedEnvelope};
use keyjar_auth::clock::ManualClock;
use keyjar_auth::entropy::SharedRng;
use keyjar_auth::identity::{PrivateKey, PublicKey};
use keyjar_auth::CaKey;
use keyjar_daemon::{AuthRedirect, Broker, BrokerConfig, Callback};
use rand::rngs::OsRng;
use ssh_key::{Algorithm, HashAlg, LineEnding};

/// A broker wired to a manual clock.
pub struct TestBroker {
    pub broker: Broker,
    pub clock: Arc<ManualClock>,
    pub rng: SharedRng,
}

#[allow(dead_code)]
impl TestBroker {
    /// 30 minute limit, principals alice and bob.
    pub fn new() -> Self {
        Self::with_principals("alice,bob")
    }

    pub fn with_principals(principals: &str) -> Self {
        let ca = ssh_key::PrivateKey::random(&mut OsRng, Algorithm::Ed25519)
            .expect("Failed to generate CA key");
        let ca = CaKey::from_openssh(
            ca.to_openssh(LineEnding::LF)
                .expect("Failed to encode CA key")
                .as_bytes(),
        )
        .expect("Failed to load CA key");

        let clock = Arc::new(ManualClock::new(Utc::now()));
        let rng = SharedRng::seeded(1234);

        let broker = BrokerConfig::default()
            .with_auth_url("https://login.example.com/")
            .expect("auth url")
            .with_ca_key(ca)
            .expect("ca key")
            .with_principals(principals)
            .expect("principals")
            .build(rng.clone(), clock.clone())
            .expect("Failed to build broker");

        Self { broker, clock, rng }
    }

    /// Fingerprint of the CA as an SSH server would compute it from
    /// `TrustedUserCAKeys`.
    pub fn ca_fingerprint(&self) -> ssh_key::Fingerprint {
        ssh_key::PublicKey::from_openssh(self.broker.ca_public_key().trim_end())
            .expect("CA public key must parse")
            .fingerprint(HashAlg::Sha256)
    }

    pub fn advance_minutes(&self, minutes: i64) {
        self.clock.advance(chrono::Duration::minutes(minutes));
    }
}

/// A client holding a session key and an SSH key to certify.
pub struct TestClient {
    pub private_key: PrivateKey,
    pub public_key: PublicKey,
    pub ssh_key: ssh_key::PrivateKey,
    codec: ChallengeCodec,
}

#[allow(dead_code)]
impl TestClient {
    pub fn new(rng: &SharedRng) -> Self {
        let private_key = PrivateKey::generate(rng).expect("Failed to generate client key");
        let public_key = private_key.public_key();
        let ssh_key = ssh_key::PrivateKey::random(&mut OsRng, Algorithm::Ed25519)
            .expect("Failed to generate SSH key");

        Self {
            private_key,
            public_key,
            ssh_key,
            codec: ChallengeCodec::new(rng.clone()),
        }
    }

    /// Start a session.
    pub fn begin(&self, broker: &Broker) -> AuthRedirect {
        broker
            .begin(&self.public_key)
            .expect("Failed to start session")
    }

    /// Open the challenge carried by the redirect and seal it back to the
    /// broker.
    ///
    /// Everything the client needs is read from the URL alone.
    pub fn prove(&self, redirect: &AuthRedirect) -> SealedEnvelope {
        let broker_key = query_param(&redirect.url, "broker")
            .map(PublicKey::from_base64)
            .expect("redirect carries the broker key")
            .expect("broker key must decode");
        let sealed = query_param(&redirect.url, "challenge")
            .map(SealedEnvelope::from_base64)
            .expect("redirect carries a challenge")
            .expect("challenge must decode");

        let challenge = self
            .codec
            .open_challenge(&self.private_key, &broker_key, &sealed)
            .expect("client must be able to open its challenge");
        self.codec
            .seal_challenge(&self.private_key, &broker_key, &challenge)
            .expect("Failed to seal proof")
    }

    /// The callback an identity provider would send after verifying
    /// `identity`.
    pub fn callback(&self, identity: &str, proof: SealedEnvelope) -> Callback {
        Callback {
            client_key: self.public_key,
            identity: identity.to_string(),
            proof,
            ssh_public_key: self.ssh_key.public_key().clone(),
            principals: Vec::new(),
        }
    }

    /// Begin a session and build the matching valid callback.
    pub fn authenticate(&self, broker: &Broker, identity: &str) -> Callback {
        let redirect = self.begin(broker);
        let proof = self.prove(&redirect);
        self.callback(identity, proof)
    }
}

/// Value of `name` in the query string of `url`.
#[allow(dead_code)]
pub fn query_param<'a>(url: &'a str, name: &str) -> Option<&'a str> {
    let (_, query) = url.split_once('?')?;
    query.split('&').find_map(|pair| {
        let (key, value) = pair.split_once('=')?;
        (key == name).then_some(value)
    })
}
