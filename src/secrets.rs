//! `SecretStore` contract (§6.3) and a default AES-256-GCM implementation.
//!
//! Credential encryption-at-rest has no precedent in the teacher's stack,
//! so this pulls `aes-gcm`, the crate the rest of the retrieval pack reaches
//! for when it needs symmetric authenticated encryption.

use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{AeadCore, Aes256Gcm, Key, Nonce};
use async_trait::async_trait;
use base64::Engine as _;

use crate::error::{EngineError, EngineResult};

/// Symmetric, reversible credential encryption. Key rotation is out of
/// scope (§6.3); callers supply a single active key at construction time.
#[async_trait]
pub trait SecretStore: Send + Sync {
    async fn encrypt(&self, plaintext: &str) -> EngineResult<Vec<u8>>;
    async fn decrypt(&self, ciphertext: &[u8]) -> EngineResult<String>;
}

/// AES-256-GCM store. Ciphertext layout is `nonce (12 bytes) || tag+data`.
pub struct AesGcmSecretStore {
    cipher: Aes256Gcm,
}

impl AesGcmSecretStore {
    pub fn new(key_bytes: &[u8; 32]) -> Self {
        let key = Key::<Aes256Gcm>::from_slice(key_bytes);
        Self { cipher: Aes256Gcm::new(key) }
    }

    /// Decodes a base64-encoded 32-byte key, as read from `secrets.key_base64`.
    pub fn from_base64(encoded: &str) -> EngineResult<Self> {
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .map_err(|e| EngineError::fatal(format!("invalid secrets key encoding: {e}")))?;
        let key_bytes: [u8; 32] = bytes
            .try_into()
            .map_err(|_| EngineError::fatal("secrets key must decode to exactly 32 bytes"))?;
        Ok(Self::new(&key_bytes))
    }

    /// Generates a fresh random key, for development only — ciphertext
    /// encrypted under it does not survive a process restart.
    pub fn generate_ephemeral() -> Self {
        let key = Aes256Gcm::generate_key(OsRng);
        Self { cipher: Aes256Gcm::new(&key) }
    }
}

#[async_trait]
impl SecretStore for AesGcmSecretStore {
    async fn encrypt(&self, plaintext: &str) -> EngineResult<Vec<u8>> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let mut out = self
            .cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|e| EngineError::fatal(format!("encryption failed: {e}")))?;
        let mut sealed = nonce.to_vec();
        sealed.append(&mut out);
        Ok(sealed)
    }

    async fn decrypt(&self, ciphertext: &[u8]) -> EngineResult<String> {
        if ciphertext.len() < 12 {
            return Err(EngineError::fatal("ciphertext shorter than nonce"));
        }
        let (nonce_bytes, sealed) = ciphertext.split_at(12);
        let nonce = Nonce::from_slice(nonce_bytes);
        let plaintext = self
            .cipher
            .decrypt(nonce, sealed)
            .map_err(|e| EngineError::fatal(format!("decryption failed: {e}")))?;
        String::from_utf8(plaintext)
            .map_err(|e| EngineError::fatal(format!("decrypted payload not utf-8: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn round_trips_through_encrypt_decrypt() {
        let store = AesGcmSecretStore::generate_ephemeral();
        let ciphertext = store.encrypt("hunter2").await.unwrap();
        assert_ne!(ciphertext, b"hunter2".to_vec());
        let plaintext = store.decrypt(&ciphertext).await.unwrap();
        assert_eq!(plaintext, "hunter2");
    }

    #[tokio::test]
    async fn rejects_tampered_ciphertext() {
        let store = AesGcmSecretStore::generate_ephemeral();
        let mut ciphertext = store.encrypt("hunter2").await.unwrap();
        let last = ciphertext.len() - 1;
        ciphertext[last] ^= 0xFF;
        assert!(store.decrypt(&ciphertext).await.is_err());
    }
}
