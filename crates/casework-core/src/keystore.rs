//! Key Store (C3): persistent asymmetric signing key pair, generated on first boot.
//!
//! Persistence follows the teacher's atomic-write idiom (write to a temp file, then rename)
//! so a crash mid-write can never leave a half-written key on disk.

use crate::error::CoreError;
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use std::fs;
use std::path::{Path, PathBuf};

pub struct KeyStore {
    signing_key: SigningKey,
    path: PathBuf,
}

impl KeyStore {
    /// Load the key pair from `path`; if absent, generate one and persist it atomically.
    pub fn load_or_generate(path: impl Into<PathBuf>) -> Result<Self, CoreError> {
        let path = path.into();
        let signing_key = if path.exists() {
            let raw = fs::read(&path)
                .map_err(|e| CoreError::KeyStore(format!("reading key file: {e}")))?;
            let bytes: [u8; 32] = raw
                .try_into()
                .map_err(|_| CoreError::KeyStore("key file has unexpected length".to_string()))?;
            SigningKey::from_bytes(&bytes)
        } else {
            let signing_key = SigningKey::generate(&mut OsRng);
            persist_atomically(&path, &signing_key.to_bytes())?;
            signing_key
        };

        Ok(Self { signing_key, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The public key, safe to expose for external verification.
    pub fn public_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }

    pub fn public_key_hex(&self) -> String {
        hex::encode(self.public_key().to_bytes())
    }

    /// Sign an already-hashed digest (hex string, as produced by the canonical encoder).
    pub fn sign_hex_digest(&self, digest_hex: &str) -> String {
        let signature: Signature = self.signing_key.sign(digest_hex.as_bytes());
        hex::encode(signature.to_bytes())
    }

    pub fn verify_hex_digest(
        public_key: &VerifyingKey,
        digest_hex: &str,
        signature_hex: &str,
    ) -> Result<(), CoreError> {
        let sig_bytes = hex::decode(signature_hex)
            .map_err(|e| CoreError::SignatureInvalid(format!("bad hex: {e}")))?;
        let sig_array: [u8; 64] = sig_bytes
            .try_into()
            .map_err(|_| CoreError::SignatureInvalid("signature has unexpected length".into()))?;
        let signature = Signature::from_bytes(&sig_array);
        public_key
            .verify(digest_hex.as_bytes(), &signature)
            .map_err(|_| CoreError::SignatureInvalid("signature mismatch".to_string()))
    }
}

fn persist_atomically(path: &Path, bytes: &[u8]) -> Result<(), CoreError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| CoreError::KeyStore(format!("creating key directory: {e}")))?;
    }
    let tmp_path = path.with_extension("tmp");
    fs::write(&tmp_path, bytes)
        .map_err(|e| CoreError::KeyStore(format!("writing temp key file: {e}")))?;
    fs::rename(&tmp_path, path)
        .map_err(|e| CoreError::KeyStore(format!("renaming key file into place: {e}")))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generates_and_persists_then_reloads_same_key() {
        let dir = std::env::temp_dir().join(format!("casework-keystore-{}", uuid::Uuid::new_v4()));
        let path = dir.join("signing.key");

        let first = KeyStore::load_or_generate(&path).unwrap();
        let pub_a = first.public_key_hex();

        let second = KeyStore::load_or_generate(&path).unwrap();
        let pub_b = second.public_key_hex();

        assert_eq!(pub_a, pub_b);
        fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn sign_and_verify_round_trips() {
        let dir = std::env::temp_dir().join(format!("casework-keystore-{}", uuid::Uuid::new_v4()));
        let path = dir.join("signing.key");
        let store = KeyStore::load_or_generate(&path).unwrap();

        let digest = "deadbeef";
        let sig = store.sign_hex_digest(digest);
        assert!(KeyStore::verify_hex_digest(&store.public_key(), digest, &sig).is_ok());
        assert!(KeyStore::verify_hex_digest(&store.public_key(), "other", &sig).is_err());

        fs::remove_dir_all(dir).ok();
    }
}
