// =============================================================================
// Crypto Vault (C2) — per-user authenticated encryption of provider/exchange
// credentials
// =============================================================================
//
// AES-256-GCM (RustCrypto's `aes-gcm`, attested across the retrieval pack's
// manifests). Each process holds one master key; every encrypted blob is
// additionally keyed on the owning user's salt so that no single leaked blob
// is portable across users even if the master key were compromised in a
// narrower scope. A random 96-bit nonce is generated per encryption and
// stored alongside the ciphertext rather than derived, matching the
// AES-GCM construction's requirement of nonce uniqueness.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::{engine::general_purpose::STANDARD, Engine};
use rand::RngCore;
use sha2::{Digest, Sha256};

use crate::error::{AppError, AppResult};

#[derive(Clone)]
pub struct Vault {
    master_key: Vec<u8>,
}

impl Vault {
    pub fn new(master_key_material: &str) -> Self {
        // Derive a 32-byte key from arbitrary-length operator-supplied
        // material via SHA-256, so the env var need not be exactly 32 bytes.
        let mut hasher = Sha256::new();
        hasher.update(master_key_material.as_bytes());
        Self {
            master_key: hasher.finalize().to_vec(),
        }
    }

    fn cipher_for_user(&self, user_salt: &str) -> Aes256Gcm {
        let mut hasher = Sha256::new();
        hasher.update(&self.master_key);
        hasher.update(user_salt.as_bytes());
        let derived = hasher.finalize();
        let key = Key::<Aes256Gcm>::from_slice(&derived);
        Aes256Gcm::new(key)
    }

    /// Encrypts `plain` under `user_salt`'s derived key. Returns a
    /// base64-encoded `nonce || ciphertext` blob suitable for storage as a
    /// TEXT column.
    pub fn encrypt(&self, plain: &str, user_salt: &str) -> AppResult<String> {
        let cipher = self.cipher_for_user(user_salt);
        let mut nonce_bytes = [0u8; 12];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(nonce, plain.as_bytes())
            .map_err(|e| AppError::EncryptionFailed(format!("encrypt: {e}")))?;

        let mut blob = Vec::with_capacity(nonce_bytes.len() + ciphertext.len());
        blob.extend_from_slice(&nonce_bytes);
        blob.extend_from_slice(&ciphertext);
        Ok(STANDARD.encode(blob))
    }

    /// Decrypts a blob produced by [`Vault::encrypt`] under `user_salt`'s
    /// derived key. Decryption failure (wrong user, corrupted blob, or
    /// tampering) is always a hard error — it never falls back to plaintext
    /// (spec §4.2).
    pub fn decrypt(&self, blob_b64: &str, user_salt: &str) -> AppResult<String> {
        let raw = STANDARD
            .decode(blob_b64)
            .map_err(|e| AppError::EncryptionFailed(format!("base64 decode: {e}")))?;
        if raw.len() < 12 {
            return Err(AppError::EncryptionFailed("blob too short".into()));
        }
        let (nonce_bytes, ciphertext) = raw.split_at(12);
        let cipher = self.cipher_for_user(user_salt);
        let nonce = Nonce::from_slice(nonce_bytes);

        let plain = cipher
            .decrypt(nonce, ciphertext)
            .map_err(|e| AppError::EncryptionFailed(format!("decrypt: {e}")))?;

        String::from_utf8(plain).map_err(|e| AppError::EncryptionFailed(format!("utf8: {e}")))
    }

    /// A display-safe mask for a credential's identity, used by read paths
    /// that expose provider/wallet lists without revealing keys (spec §4.2
    /// `redact`).
    pub fn redact(id: &str) -> String {
        if id.len() <= 4 {
            "****".to_string()
        } else {
            format!("****{}", &id[id.len() - 4..])
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_same_user() {
        let vault = Vault::new("process-master-key");
        let ciphertext = vault.encrypt("sk-secret-api-key", "user-salt-1").unwrap();
        let plain = vault.decrypt(&ciphertext, "user-salt-1").unwrap();
        assert_eq!(plain, "sk-secret-api-key");
    }

    #[test]
    fn decrypt_with_wrong_user_fails() {
        let vault = Vault::new("process-master-key");
        let ciphertext = vault.encrypt("sk-secret-api-key", "user-salt-1").unwrap();
        let err = vault.decrypt(&ciphertext, "user-salt-2").unwrap_err();
        assert!(matches!(err, AppError::EncryptionFailed(_)));
    }

    #[test]
    fn ciphertext_differs_each_call() {
        let vault = Vault::new("process-master-key");
        let a = vault.encrypt("same-plain", "user-salt-1").unwrap();
        let b = vault.encrypt("same-plain", "user-salt-1").unwrap();
        assert_ne!(a, b, "random nonce must vary ciphertext across calls");
    }

    #[test]
    fn redact_keeps_last_four() {
        assert_eq!(Vault::redact("sk-abcd1234"), "****1234");
        assert_eq!(Vault::redact("ab"), "****");
    }
}
