//! Signed bearer tokens (HS256).

use {
    chrono::Utc,
    jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode},
    serde::{Deserialize, Serialize},
};

use parley_common::{Error, Result};

/// Token payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject: the user id.
    pub sub: String,
    /// Issued-at, unix seconds.
    pub iat: i64,
    /// Expiry, unix seconds.
    pub exp: i64,
}

pub(crate) struct TokenSigner {
    encoding: EncodingKey,
    decoding: DecodingKey,
    default_ttl_minutes: i64,
}

impl TokenSigner {
    pub fn new(secret: &str, default_ttl_minutes: i64) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            default_ttl_minutes,
        }
    }

    pub fn create(&self, user_id: &str, expires_minutes: Option<i64>) -> Result<String> {
        let now = Utc::now().timestamp();
        let ttl_minutes = expires_minutes.unwrap_or(self.default_ttl_minutes);
        let claims = Claims {
            sub: user_id.to_string(),
            iat: now,
            exp: now + ttl_minutes * 60,
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| Error::auth(format!("failed to sign token: {e}")))
    }

    pub fn decode(&self, token: &str) -> Result<Claims> {
        let mut validation = Validation::new(Algorithm::HS256);
        // Reject exactly at expiry; tests rely on negative TTLs failing.
        validation.leeway = 0;
        decode::<Claims>(token, &self.decoding, &validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => {
                    Error::auth("token has expired")
                },
                _ => Error::auth("invalid token"),
            })
    }
}
