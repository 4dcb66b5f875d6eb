//! Per-run authenticated encryption of event payloads.
//!
//! Directly grounded on `crates/everruns-storage/src/encryption.rs`'s
//! `EncryptionService` (AES-256-GCM via `aes-gcm`, nonce/base64 via `rand` +
//! `base64`), adapted from versioned-key rotation to a single active
//! deployment key with a per-run key derived by HKDF-SHA256 — this spec has
//! no key rotation, so there is no `key_id`/wrapped-DEK envelope.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use hkdf::Hkdf;
use rand::RngCore;
use sha2::Sha256;
use thiserror::Error;

use crate::ids::RunId;

const TAG: &[u8; 4] = b"encr";
const NONCE_LEN: usize = 12;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("ciphertext shorter than the nonce")]
    Truncated,

    #[error("unrecognized envelope tag")]
    UnknownTag,

    #[error("decryption failed (wrong key or tampered ciphertext)")]
    DecryptionFailed,

    #[error("key derivation failed: {0}")]
    KeyDerivation(String),
}

/// Encrypts/decrypts event payloads. A deployment may run without
/// encryption (see [`NoopEncryptor`]) or absent entirely — callers hold an
/// `Option<Arc<dyn Encryptor>>`, not a required field.
pub trait Encryptor: Send + Sync {
    fn encrypt(&self, run_id: &RunId, project_id: &str, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError>;
    fn decrypt(&self, run_id: &RunId, project_id: &str, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError>;
}

/// Pass-through implementation for deployments that run without
/// encryption at rest.
pub struct NoopEncryptor;

impl Encryptor for NoopEncryptor {
    fn encrypt(&self, _run_id: &RunId, _project_id: &str, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        Ok(plaintext.to_vec())
    }

    fn decrypt(&self, _run_id: &RunId, _project_id: &str, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        Ok(ciphertext.to_vec())
    }
}

/// AES-256-GCM with a per-run key derived via HKDF-SHA256 from the single
/// active deployment key. `info = "<project_id>|<run_id>"`, zero salt,
/// exactly as the spec requires.
pub struct AesGcmEncryptor {
    deployment_key: [u8; 32],
}

impl AesGcmEncryptor {
    pub fn new(deployment_key: [u8; 32]) -> Self {
        Self { deployment_key }
    }

    /// Reads a base64-encoded 32-byte key from the environment, matching
    /// the teacher's `EncryptionService::from_env` style.
    pub fn from_env(var: &str) -> Result<Self, CryptoError> {
        use base64::Engine;
        let encoded = std::env::var(var)
            .map_err(|_| CryptoError::KeyDerivation(format!("{var} is not set")))?;
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;
        let key: [u8; 32] = bytes
            .try_into()
            .map_err(|_| CryptoError::KeyDerivation("deployment key must be 32 bytes".into()))?;
        Ok(Self::new(key))
    }

    fn derive_run_key(&self, project_id: &str, run_id: &RunId) -> Result<[u8; 32], CryptoError> {
        let info = format!("{project_id}|{run_id}");
        let hk = Hkdf::<Sha256>::new(Some(&[]), &self.deployment_key);
        let mut out = [0u8; 32];
        hk.expand(info.as_bytes(), &mut out)
            .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;
        Ok(out)
    }
}

impl Encryptor for AesGcmEncryptor {
    fn encrypt(&self, run_id: &RunId, project_id: &str, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let run_key = self.derive_run_key(project_id, run_id)?;
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&run_key));

        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(nonce, plaintext)
            .map_err(|_| CryptoError::DecryptionFailed)?;

        let mut envelope = Vec::with_capacity(4 + NONCE_LEN + ciphertext.len());
        envelope.extend_from_slice(TAG);
        envelope.extend_from_slice(&nonce_bytes);
        envelope.extend_from_slice(&ciphertext);
        Ok(envelope)
    }

    fn decrypt(&self, run_id: &RunId, project_id: &str, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if ciphertext.len() < 4 + NONCE_LEN {
            return Err(CryptoError::Truncated);
        }
        let (tag, rest) = ciphertext.split_at(4);
        if tag != TAG {
            return Err(CryptoError::UnknownTag);
        }
        let (nonce_bytes, body) = rest.split_at(NONCE_LEN);

        let run_key = self.derive_run_key(project_id, run_id)?;
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&run_key));
        cipher
            .decrypt(Nonce::from_slice(nonce_bytes), body)
            .map_err(|_| CryptoError::DecryptionFailed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encryptor() -> AesGcmEncryptor {
        AesGcmEncryptor::new([7u8; 32])
    }

    #[test]
    fn round_trips_ciphertext() {
        let enc = encryptor();
        let run_id = RunId::new();
        let ciphertext = enc.encrypt(&run_id, "proj-1", b"hello world").unwrap();
        let plaintext = enc.decrypt(&run_id, "proj-1", &ciphertext).unwrap();
        assert_eq!(plaintext, b"hello world");
    }

    #[test]
    fn different_runs_derive_different_keys() {
        let enc = encryptor();
        let run_a = RunId::new();
        let run_b = RunId::new();
        let ciphertext = enc.encrypt(&run_a, "proj-1", b"secret").unwrap();
        assert!(enc.decrypt(&run_b, "proj-1", &ciphertext).is_err());
    }

    #[test]
    fn noop_encryptor_passes_through() {
        let enc = NoopEncryptor;
        let run_id = RunId::new();
        let ciphertext = enc.encrypt(&run_id, "proj-1", b"plain").unwrap();
        assert_eq!(ciphertext, b"plain");
        assert_eq!(enc.decrypt(&run_id, "proj-1", &ciphertext).unwrap(), b"plain");
    }

    #[test]
    fn rejects_truncated_envelope() {
        let enc = encryptor();
        assert!(matches!(enc.decrypt(&RunId::new(), "p", b"ab"), Err(CryptoError::Truncated)));
    }
}
