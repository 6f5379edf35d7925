//! XChaCha20-Poly1305 payload encryption.
//!
//! Sealed blob layout: `[nonce: 24 bytes][ciphertext + Poly1305 tag]`,
//! base64-encoded for storage in text columns.

#[allow(deprecated)] // upstream generic-array 0.x deprecation
use chacha20poly1305::{
    XChaCha20Poly1305, XNonce,
    aead::{Aead, KeyInit},
};
use {base64::Engine, base64::engine::general_purpose::STANDARD as BASE64, rand::RngCore};

use parley_common::{Error, Result};

/// Nonce size for XChaCha20-Poly1305 (24 bytes).
const NONCE_LEN: usize = 24;

pub struct Cipher {
    key: [u8; 32],
}

impl Cipher {
    /// Accepts 64 hex chars (decoded) or a raw 32-byte string.
    pub fn from_key(key: &str) -> Result<Self> {
        let bytes = if key.len() == 64 {
            hex::decode(key)
                .map_err(|_| Error::config("encryption_key is not valid hex"))?
        } else {
            key.as_bytes().to_vec()
        };
        let key: [u8; 32] = bytes
            .try_into()
            .map_err(|_| Error::config("encryption_key must decode to 32 bytes"))?;
        Ok(Self { key })
    }

    #[allow(deprecated)]
    pub fn encrypt(&self, plaintext: &str) -> Result<String> {
        let cipher = XChaCha20Poly1305::new((&self.key).into());

        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::rng().fill_bytes(&mut nonce_bytes);
        let nonce = XNonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|e| Error::config(format!("encryption failed: {e}")))?;

        let mut blob = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        blob.extend_from_slice(&nonce_bytes);
        blob.extend_from_slice(&ciphertext);
        Ok(BASE64.encode(blob))
    }

    #[allow(deprecated)]
    pub fn decrypt(&self, sealed: &str) -> Result<String> {
        let blob = BASE64
            .decode(sealed)
            .map_err(|_| Error::validation("ciphertext is not valid base64"))?;
        if blob.len() < NONCE_LEN + 16 {
            return Err(Error::validation("ciphertext too short"));
        }

        let (nonce_bytes, ct) = blob.split_at(NONCE_LEN);
        let nonce = XNonce::from_slice(nonce_bytes);
        let cipher = XChaCha20Poly1305::new((&self.key).into());

        let plaintext = cipher
            .decrypt(nonce, ct)
            .map_err(|_| Error::validation("ciphertext failed authentication"))?;
        String::from_utf8(plaintext).map_err(|_| Error::validation("decrypted payload is not UTF-8"))
    }
}

/// Generate `len_bytes` of randomness rendered as lowercase hex
/// (`2 * len_bytes` chars).
#[must_use]
pub fn random_key(len_bytes: usize) -> String {
    let mut bytes = vec![0u8; len_bytes];
    rand::rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}
