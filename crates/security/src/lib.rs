//! Security service: password hashing, bearer tokens, payload encryption.
//!
//! Stateless once constructed. Construction validates the config: a
//! non-empty token secret is required, and when encryption is enabled the
//! key must decode to exactly 32 bytes. Validation failures are fatal.

pub mod cipher;
pub mod password;
pub mod token;

use parley_common::{Error, Result};
use parley_config::ParleyConfig;

pub use {
    cipher::{Cipher, random_key},
    token::Claims,
};

pub struct SecurityService {
    tokens: token::TokenSigner,
    cipher: Option<Cipher>,
}

impl SecurityService {
    /// Build the service from config. Fails with `ConfigError` when the
    /// token secret is empty or an enabled encryption key is unusable.
    pub fn new(cfg: &ParleyConfig) -> Result<Self> {
        if cfg.jwt_secret.is_empty() {
            return Err(Error::config("jwt_secret must not be empty"));
        }
        if cfg.jwt_algorithm != "HS256" {
            return Err(Error::config(format!(
                "unsupported jwt_algorithm '{}'",
                cfg.jwt_algorithm
            )));
        }

        let cipher = if cfg.enable_encryption {
            let key = cfg
                .encryption_key
                .as_deref()
                .ok_or_else(|| Error::config("enable_encryption is set but encryption_key is missing"))?;
            Some(Cipher::from_key(key)?)
        } else {
            None
        };

        Ok(Self {
            tokens: token::TokenSigner::new(&cfg.jwt_secret, cfg.jwt_expiration_minutes),
            cipher,
        })
    }

    /// Hash a password with argon2id. The output is a self-describing PHC
    /// string (algorithm, parameters, salt, digest).
    pub fn hash_password(&self, plaintext: &str) -> Result<String> {
        password::hash_password(plaintext)
    }

    /// Verify a password against a stored PHC hash.
    #[must_use]
    pub fn verify_password(&self, plaintext: &str, hash: &str) -> bool {
        password::verify_password(plaintext, hash)
    }

    /// Mint a signed bearer token for `user_id`. `expires_minutes` overrides
    /// the configured TTL; negative values produce an already-expired token.
    pub fn create_token(&self, user_id: &str, expires_minutes: Option<i64>) -> Result<String> {
        self.tokens.create(user_id, expires_minutes)
    }

    /// Verify signature and expiry, returning the claims.
    pub fn decode_token(&self, token: &str) -> Result<Claims> {
        self.tokens.decode(token)
    }

    /// Shortcut: decode and return the token subject.
    pub fn user_id_from_token(&self, token: &str) -> Result<String> {
        Ok(self.decode_token(token)?.sub)
    }

    /// Whether payload encryption is configured.
    #[must_use]
    pub fn encryption_enabled(&self) -> bool {
        self.cipher.is_some()
    }

    /// Seal a payload. Fails with `ConfigError` when encryption is not
    /// configured.
    pub fn encrypt(&self, plaintext: &str) -> Result<String> {
        self.require_cipher()?.encrypt(plaintext)
    }

    /// Open a sealed payload, verifying the auth tag.
    pub fn decrypt(&self, ciphertext: &str) -> Result<String> {
        self.require_cipher()?.decrypt(ciphertext)
    }

    fn require_cipher(&self) -> Result<&Cipher> {
        self.cipher
            .as_ref()
            .ok_or_else(|| Error::config("encryption is not enabled"))
    }
}
