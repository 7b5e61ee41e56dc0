//! Signed session tokens.
//!
//! Tokens are stateless HS256 JSON Web Tokens carrying
//! `{"sub": "<user id>", "role": <role>, "iat": <unix secs>}`. Lifetime is
//! measured from `iat` against the configured TTL rather than an `exp`
//! claim, so changing the TTL applies to tokens already issued.

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{
    errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation,
};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::models::{Role, UserId};

/// Identity asserted by a verified token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Claims {
    pub subject_id: UserId,
    pub role: Role,
}

#[derive(Serialize, Deserialize)]
struct Payload {
    /// Decimal user id; JWT subjects are strings.
    sub: String,
    role: Role,
    iat: i64,
}

/// Reasons a token is refused or cannot be produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum TokenError {
    /// Absent, malformed or carrying a signature that does not match.
    #[error("Invalid token")]
    InvalidToken,
    #[error("Token has expired")]
    Expired,
    #[error("Failed to sign token")]
    Signing,
}

/// Issues and verifies session tokens with a process-wide secret.
#[derive(Clone)]
pub struct TokenService {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
    ttl: Duration,
}

impl std::fmt::Debug for TokenService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenService")
            .field("secret", &"<redacted>")
            .field("ttl", &self.ttl)
            .finish()
    }
}

impl TokenService {
    /// Creates a service signing with `secret`. Tokens older than `ttl` are
    /// rejected as expired.
    pub fn new(secret: impl AsRef<[u8]>, ttl: Duration) -> Self {
        let secret = secret.as_ref();

        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        validation.required_spec_claims.clear();

        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            validation,
            ttl,
        }
    }

    /// Creates a service with a freshly generated 32-byte secret.
    pub fn with_random_secret(ttl: Duration) -> Self {
        let mut secret = [0u8; 32];
        rand::rng().fill(&mut secret);
        Self::new(secret, ttl)
    }

    /// Issues a token for `subject_id` stamped with the current time.
    pub fn issue(&self, subject_id: UserId, role: Role) -> Result<String, TokenError> {
        self.issue_at(subject_id, role, Utc::now())
    }

    /// Issues a token stamped with `issued_at`.
    pub fn issue_at(
        &self,
        subject_id: UserId,
        role: Role,
        issued_at: DateTime<Utc>,
    ) -> Result<String, TokenError> {
        let payload = Payload {
            sub: subject_id.to_string(),
            role,
            iat: issued_at.timestamp(),
        };

        jsonwebtoken::encode(&Header::new(Algorithm::HS256), &payload, &self.encoding).map_err(
            |e| {
                tracing::error!("Token signing failed: {}", e);
                TokenError::Signing
            },
        )
    }

    /// Verifies a token against the current time.
    pub fn verify(&self, token: &str) -> Result<Claims, TokenError> {
        self.verify_at(token, Utc::now())
    }

    /// Verifies a token as if the current time were `now`.
    pub fn verify_at(&self, token: &str, now: DateTime<Utc>) -> Result<Claims, TokenError> {
        let payload = jsonwebtoken::decode::<Payload>(token, &self.decoding, &self.validation)
            .map_err(|e| {
                if !matches!(e.kind(), ErrorKind::InvalidSignature) {
                    tracing::debug!("Malformed token: {}", e);
                }
                TokenError::InvalidToken
            })?
            .claims;
        let subject_id: UserId = payload.sub.parse().map_err(|_| TokenError::InvalidToken)?;
        let issued_at =
            DateTime::from_timestamp(payload.iat, 0).ok_or(TokenError::InvalidToken)?;

        let age = now.signed_duration_since(issued_at);
        if age > self.ttl {
            return Err(TokenError::Expired);
        }
        // Dated further ahead than a whole lifetime: not issued by this clock.
        if -age > self.ttl {
            return Err(TokenError::InvalidToken);
        }

        Ok(Claims {
            subject_id,
            role: payload.role,
        })
    }
}
