//! AES-256-GCM sealing with a detached tag
//!
//! Used by the template store (per-subject key) and the audit log (audit
//! key). Every call to [`seal`] draws a fresh 12-byte nonce; a nonce is
//! never reused under the same key.

use ring::aead::{Aad, LessSafeKey, Nonce, UnboundKey, AES_256_GCM, NONCE_LEN};
use ring::rand::{SecureRandom, SystemRandom};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Algorithm identifier recorded next to every ciphertext
pub const ALGORITHM_ID: &str = "aes-256-gcm";

/// Errors that can occur while sealing or opening
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),

    #[error("Decryption failed: {0}")]
    DecryptionFailed(String),

    #[error("Random nonce generation failed")]
    NonceGeneration,
}

/// Output of [`seal`]: ciphertext with its nonce and detached tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sealed {
    pub ciphertext: Vec<u8>,
    pub nonce: [u8; NONCE_LEN],
    pub tag: Vec<u8>,
}

/// Encrypt `plaintext` under a 32-byte key.
pub fn seal(key: &[u8; 32], plaintext: &[u8], aad: &[u8]) -> Result<Sealed, CryptoError> {
    let nonce_bytes = generate_nonce()?;
    let nonce = Nonce::assume_unique_for_key(nonce_bytes);

    let unbound_key = UnboundKey::new(&AES_256_GCM, key)
        .map_err(|e| CryptoError::EncryptionFailed(format!("Key creation failed: {}", e)))?;
    let key = LessSafeKey::new(unbound_key);

    let mut ciphertext = plaintext.to_vec();
    let tag = key
        .seal_in_place_separate_tag(nonce, Aad::from(aad), &mut ciphertext)
        .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;

    Ok(Sealed {
        ciphertext,
        nonce: nonce_bytes,
        tag: tag.as_ref().to_vec(),
    })
}

/// Decrypt and authenticate a [`Sealed`] value.
pub fn open(key: &[u8; 32], sealed: &Sealed, aad: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if sealed.tag.len() != AES_256_GCM.tag_len() {
        return Err(CryptoError::DecryptionFailed(
            "Invalid tag length".to_string(),
        ));
    }

    let unbound_key = UnboundKey::new(&AES_256_GCM, key)
        .map_err(|e| CryptoError::DecryptionFailed(format!("Key creation failed: {}", e)))?;
    let key = LessSafeKey::new(unbound_key);

    let mut in_out = Vec::with_capacity(sealed.ciphertext.len() + sealed.tag.len());
    in_out.extend_from_slice(&sealed.ciphertext);
    in_out.extend_from_slice(&sealed.tag);

    let plaintext = key
        .open_in_place(
            Nonce::assume_unique_for_key(sealed.nonce),
            Aad::from(aad),
            &mut in_out,
        )
        .map_err(|_| CryptoError::DecryptionFailed("Authentication failed".to_string()))?;

    Ok(plaintext.to_vec())
}

fn generate_nonce() -> Result<[u8; NONCE_LEN], CryptoError> {
    let rng = SystemRandom::new();
    let mut nonce = [0u8; NONCE_LEN];
    rng.fill(&mut nonce).map_err(|_| CryptoError::NonceGeneration)?;
    Ok(nonce)
}
