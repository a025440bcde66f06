//! Credential issuance for the MQTT bridge
//!
//! The broker authenticates devices with a short-lived JWT passed as the
//! connection password. Tokens carry `iat`/`exp`/`aud` claims and are signed
//! with the device's private key; the broker rejects tokens past their
//! expiry, so the scheduler mints a fresh one before every reconnect.

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

/// Errors raised while producing a signed credential
#[derive(Debug, Error)]
pub enum SigningError {
    #[error("failed to read private key {path}")]
    KeyRead {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid signing key for {algorithm:?}")]
    InvalidKey {
        algorithm: SigningAlgorithm,
        #[source]
        source: jsonwebtoken::errors::Error,
    },
    #[error("token signing failed")]
    Encode(#[source] jsonwebtoken::errors::Error),
}

/// Signing algorithms the broker accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SigningAlgorithm {
    Rs256,
    Es256,
    Hs256,
}

impl SigningAlgorithm {
    fn to_jwt(self) -> Algorithm {
        match self {
            SigningAlgorithm::Rs256 => Algorithm::RS256,
            SigningAlgorithm::Es256 => Algorithm::ES256,
            SigningAlgorithm::Hs256 => Algorithm::HS256,
        }
    }
}

/// JWT claims expected by the MQTT bridge
#[derive(Debug, Serialize, Deserialize)]
struct BridgeClaims {
    iat: i64,
    exp: i64,
    aud: String,
}

/// A time-bounded signed connection credential
#[derive(Debug, Clone)]
pub struct Credential {
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub token: String,
}

impl Credential {
    /// The broker rejects expired tokens at connect time, so callers must
    /// check this before reusing a held credential.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Mints signed connection credentials from a private key on disk
#[derive(Debug, Clone)]
pub struct CredentialIssuer {
    audience: String,
    key_path: PathBuf,
    algorithm: SigningAlgorithm,
    validity: Duration,
}

impl CredentialIssuer {
    pub fn new(
        audience: impl Into<String>,
        key_path: impl Into<PathBuf>,
        algorithm: SigningAlgorithm,
        validity_minutes: u64,
    ) -> Self {
        Self::with_validity(
            audience,
            key_path,
            algorithm,
            Duration::minutes(validity_minutes as i64),
        )
    }

    /// Construct with an arbitrary validity window (sub-minute windows are
    /// useful in tests and short-lived sessions).
    pub fn with_validity(
        audience: impl Into<String>,
        key_path: impl Into<PathBuf>,
        algorithm: SigningAlgorithm,
        validity: Duration,
    ) -> Self {
        Self {
            audience: audience.into(),
            key_path: key_path.into(),
            algorithm,
            validity,
        }
    }

    /// Issue a credential valid from now for the configured window
    pub fn issue(&self) -> Result<Credential, SigningError> {
        self.issue_at(Utc::now())
    }

    /// Deterministic variant taking an explicit clock instant
    pub fn issue_at(&self, now: DateTime<Utc>) -> Result<Credential, SigningError> {
        let encoding_key = read_encoding_key(&self.key_path, self.algorithm)?;

        let issued_at = now;
        let expires_at = now + self.validity;
        let claims = BridgeClaims {
            iat: issued_at.timestamp(),
            exp: expires_at.timestamp(),
            aud: self.audience.clone(),
        };

        let header = Header::new(self.algorithm.to_jwt());
        let token = encode(&header, &claims, &encoding_key).map_err(SigningError::Encode)?;

        debug!(
            algorithm = ?self.algorithm,
            %expires_at,
            "issued connection credential"
        );

        Ok(Credential {
            issued_at,
            expires_at,
            token,
        })
    }
}

/// Read the signing key from disk; the raw key material is dropped as soon
/// as the encoding key is built.
fn read_encoding_key(
    path: &Path,
    algorithm: SigningAlgorithm,
) -> Result<EncodingKey, SigningError> {
    let raw = std::fs::read(path).map_err(|source| SigningError::KeyRead {
        path: path.display().to_string(),
        source,
    })?;

    let key = match algorithm {
        SigningAlgorithm::Rs256 => EncodingKey::from_rsa_pem(&raw),
        SigningAlgorithm::Es256 => EncodingKey::from_ec_pem(&raw),
        SigningAlgorithm::Hs256 => return Ok(EncodingKey::from_secret(&raw)),
    };

    key.map_err(|source| SigningError::InvalidKey { algorithm, source })
}
