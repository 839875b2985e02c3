//! Token encryption at rest
//!
//! AES-256-GCM with a fresh 96-bit nonce per call. The stored envelope is
//! `base64(nonce || ciphertext)`. Token envelopes carry their connection as
//! associated data, so an envelope copied onto another connection fails to open.

use std::env;
use std::fmt;

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::{Engine as _, engine::general_purpose::STANDARD};
use rand::RngExt;

use super::token::OAuthToken;
use crate::{Error, Result};

const NONCE_LEN: usize = 12;
const KEY_LEN: usize = 32;

/// Associated data binding a token envelope to one user's connection
#[must_use]
pub fn connection_aad(user_id: &str, integration_id: &str) -> String {
    format!("{user_id}|{integration_id}|oauth_token")
}

/// Symmetric cipher for stored OAuth tokens
#[derive(Clone)]
pub struct TokenCipher {
    cipher: Aes256Gcm,
}

impl fmt::Debug for TokenCipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenCipher").finish_non_exhaustive()
    }
}

impl TokenCipher {
    /// Build from raw key bytes
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` unless the key is exactly 32 bytes.
    pub fn new(key: &[u8]) -> Result<Self> {
        if key.len() != KEY_LEN {
            return Err(Error::Config(format!(
                "vault key must be {KEY_LEN} bytes, got {}",
                key.len()
            )));
        }
        let cipher = Aes256Gcm::new_from_slice(key)
            .map_err(|e| Error::Config(format!("invalid vault key: {e}")))?;
        Ok(Self { cipher })
    }

    /// Build from a configured key: base64, or `env:VAR` naming a variable holding base64
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if the variable is unset, the value is not
    /// base64, or it does not decode to 32 bytes.
    pub fn from_config_key(configured: &str) -> Result<Self> {
        let encoded = match configured.strip_prefix("env:") {
            Some(var_name) => env::var(var_name).map_err(|_| {
                Error::Config(format!("vault key variable '{var_name}' is not set"))
            })?,
            None => configured.to_string(),
        };
        let key = STANDARD
            .decode(encoded.trim())
            .map_err(|e| Error::Config(format!("vault key is not valid base64: {e}")))?;
        Self::new(&key)
    }

    /// Generate a fresh base64-encoded key
    #[must_use]
    pub fn generate_key() -> String {
        let key: [u8; KEY_LEN] = rand::rng().random();
        STANDARD.encode(key)
    }

    /// Encrypt arbitrary bytes into an envelope authenticated with `aad`
    ///
    /// # Errors
    ///
    /// Returns `Error::Internal` if the AEAD fails.
    pub fn encrypt(&self, plaintext: &[u8], aad: &[u8]) -> Result<String> {
        let nonce_bytes: [u8; NONCE_LEN] = rand::rng().random();
        let ciphertext = self
            .cipher
            .encrypt(
                Nonce::from_slice(&nonce_bytes),
                Payload {
                    msg: plaintext,
                    aad,
                },
            )
            .map_err(|_| Error::Internal("token encryption failed".to_string()))?;

        let mut envelope = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        envelope.extend_from_slice(&nonce_bytes);
        envelope.extend_from_slice(&ciphertext);
        Ok(STANDARD.encode(envelope))
    }

    /// Decrypt an envelope produced by [`Self::encrypt`] with the same `aad`
    ///
    /// # Errors
    ///
    /// Returns `Error::Internal` on bad base64, a short envelope, or an
    /// authentication failure. Messages never include ciphertext or plaintext.
    pub fn decrypt(&self, envelope: &str, aad: &[u8]) -> Result<Vec<u8>> {
        let raw = STANDARD
            .decode(envelope)
            .map_err(|_| Error::Internal("token envelope is not base64".to_string()))?;
        if raw.len() <= NONCE_LEN {
            return Err(Error::Internal("token envelope too short".to_string()));
        }
        let (nonce_bytes, ciphertext) = raw.split_at(NONCE_LEN);
        self.cipher
            .decrypt(
                Nonce::from_slice(nonce_bytes),
                Payload {
                    msg: ciphertext,
                    aad,
                },
            )
            .map_err(|_| Error::Internal("token decryption failed".to_string()))
    }

    /// Serialize and encrypt a token bound to `aad` (see [`connection_aad`])
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or encryption fails.
    pub fn encrypt_token(&self, token: &OAuthToken, aad: &str) -> Result<String> {
        let plaintext = serde_json::to_vec(token)?;
        self.encrypt(&plaintext, aad.as_bytes())
    }

    /// Decrypt and parse a token bound to `aad`
    ///
    /// # Errors
    ///
    /// Returns an error if decryption fails, the envelope belongs to another
    /// connection, or the plaintext is not a token.
    pub fn decrypt_token(&self, envelope: &str, aad: &str) -> Result<OAuthToken> {
        let plaintext = self.decrypt(envelope, aad.as_bytes())?;
        Ok(serde_json::from_slice(&plaintext)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cipher() -> TokenCipher {
        TokenCipher::new(&[7u8; 32]).unwrap()
    }

    const AAD: &str = "u1|int-gh|oauth_token";

    fn token() -> OAuthToken {
        OAuthToken {
            access_token: "gho_secret".to_string(),
            token_type: "Bearer".to_string(),
            expires_in: Some(3600),
            refresh_token: Some("ghr_refresh".to_string()),
            scope: Some("repo".to_string()),
        }
    }

    #[test]
    fn token_round_trip() {
        let c = cipher();
        let envelope = c.encrypt_token(&token(), AAD).unwrap();
        assert_eq!(c.decrypt_token(&envelope, AAD).unwrap(), token());
    }

    #[test]
    fn ciphertext_is_not_deterministic() {
        let c = cipher();
        let a = c.encrypt_token(&token(), AAD).unwrap();
        let b = c.encrypt_token(&token(), AAD).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn envelope_hides_plaintext() {
        let envelope = cipher().encrypt_token(&token(), AAD).unwrap();
        assert!(!envelope.contains("gho_secret"));
        let raw = STANDARD.decode(&envelope).unwrap();
        assert!(!String::from_utf8_lossy(&raw).contains("gho_secret"));
    }

    #[test]
    fn wrong_key_fails() {
        let envelope = cipher().encrypt_token(&token(), AAD).unwrap();
        let other = TokenCipher::new(&[8u8; 32]).unwrap();
        assert!(other.decrypt_token(&envelope, AAD).is_err());
    }

    #[test]
    fn envelope_does_not_open_under_another_connection() {
        let c = cipher();
        let envelope = c.encrypt_token(&token(), &connection_aad("u1", "int-gh")).unwrap();
        assert!(c.decrypt_token(&envelope, &connection_aad("u2", "int-gh")).is_err());
        assert!(c.decrypt_token(&envelope, &connection_aad("u1", "int-slack")).is_err());
        assert_eq!(
            c.decrypt_token(&envelope, &connection_aad("u1", "int-gh")).unwrap(),
            token()
        );
    }

    #[test]
    fn tampered_envelope_fails() {
        let c = cipher();
        let envelope = c.encrypt_token(&token(), AAD).unwrap();
        let mut raw = STANDARD.decode(&envelope).unwrap();
        let last = raw.len() - 1;
        raw[last] ^= 0x01;
        assert!(c.decrypt(&STANDARD.encode(raw), AAD.as_bytes()).is_err());
    }

    #[test]
    fn short_or_garbage_envelope_fails() {
        let c = cipher();
        assert!(c.decrypt("not base64!!", b"").is_err());
        assert!(c.decrypt(&STANDARD.encode([0u8; 5]), b"").is_err());
    }

    #[test]
    fn rejects_wrong_key_length() {
        assert!(matches!(TokenCipher::new(&[0u8; 16]), Err(Error::Config(_))));
    }

    #[test]
    fn generated_key_is_usable() {
        let key = TokenCipher::generate_key();
        let c = TokenCipher::from_config_key(&key).unwrap();
        let envelope = c.encrypt(b"hello", b"").unwrap();
        assert_eq!(c.decrypt(&envelope, b"").unwrap(), b"hello");
    }

    #[test]
    fn missing_env_key_is_config_error() {
        let result = TokenCipher::from_config_key("env:INTEGRATION_GATEWAY_TEST_UNSET_VAULT_KEY");
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
