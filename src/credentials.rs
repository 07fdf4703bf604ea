use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};
use chrono::{Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// CredentialError
///
/// Failures of the credential service. `InvalidToken` deliberately carries no
/// detail: callers must not learn whether a token was expired, forged or garbled.
#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    #[error("invalid token")]
    InvalidToken,
    #[error("password hashing failed: {0}")]
    Hashing(String),
    #[error("token signing failed: {0}")]
    Signing(#[from] jsonwebtoken::errors::Error),
}

// --- Passwords ---

/// hash_password
///
/// Argon2id with a fresh random salt, encoded as a PHC string.
pub fn hash_password(password: &str) -> Result<String, CredentialError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| CredentialError::Hashing(e.to_string()))
}

/// verify_password
///
/// Uses the scheme's own verifier. A stored hash that does not parse verifies as false.
pub fn verify_password(password: &str, hash: &str) -> bool {
    let parsed_hash = match PasswordHash::new(hash) {
        Ok(p) => p,
        Err(_) => return false,
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok()
}

// --- Bearer Tokens ---

/// Claims
///
/// The JWT payload. `sub` carries the user's email.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: usize,
    pub iat: usize,
}

/// TokenService
///
/// Issues and verifies HMAC-signed bearer tokens. Built once at startup from
/// `AppConfig` and shared through `AppState`.
pub struct TokenService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    algorithm: Algorithm,
    ttl: Duration,
}

/// TokenState
///
/// The concrete type used to share the token service across the application state.
pub type TokenState = Arc<TokenService>;

impl TokenService {
    pub fn new(secret: &str, algorithm: Algorithm, ttl: Duration) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            algorithm,
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Signs a token for `subject` using the configured lifetime.
    pub fn issue_token(&self, subject: &str) -> Result<String, CredentialError> {
        self.issue_token_with_ttl(subject, self.ttl)
    }

    pub fn issue_token_with_ttl(
        &self,
        subject: &str,
        ttl: Duration,
    ) -> Result<String, CredentialError> {
        let now = Utc::now();
        let claims = Claims {
            sub: subject.to_string(),
            iat: timestamp(now.timestamp()),
            exp: timestamp((now + ttl).timestamp()),
        };
        Ok(encode(
            &Header::new(self.algorithm),
            &claims,
            &self.encoding_key,
        )?)
    }

    /// verify_token
    ///
    /// Checks signature, structure, algorithm and expiry. Every failure collapses
    /// into `CredentialError::InvalidToken`.
    pub fn verify_token(&self, token: &str) -> Result<Claims, CredentialError> {
        let mut validation = Validation::new(self.algorithm);
        validation.validate_exp = true;
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "sub"]);

        decode::<Claims>(token, &self.decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(|e| {
                tracing::debug!("token rejected: {:?}", e.kind());
                CredentialError::InvalidToken
            })
    }
}

// Negative instants clamp to the epoch.
fn timestamp(secs: i64) -> usize {
    usize::try_from(secs).unwrap_or(0)
}
