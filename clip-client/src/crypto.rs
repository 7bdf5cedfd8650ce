//! Clipboard content encryption for duoclip.
//!
//! This module provides the envelope both paired apps agree on:
//! - AES-256-GCM keyed directly with the 32-byte shared secret
//! - A fresh random 96-bit nonce per message
//! - Wire layout `nonce(12) || ciphertext || tag(16)`, base64 on the relay
//!
//! # Security Notes
//!
//! - 96-bit random nonces are fine at clipboard volumes; never reuse one
//! - No key derivation step, so the envelope stays readable by existing apps
//! - Decryption failures never reveal which part of the envelope was wrong

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD, Engine};
use clip_core::SharedSecret;
use thiserror::Error;

/// Nonce size for AES-GCM (96 bits = 12 bytes).
pub const NONCE_SIZE: usize = 12;

/// Authentication tag size (128 bits = 16 bytes).
pub const TAG_SIZE: usize = 16;

/// Key size for AES-256 (256 bits = 32 bytes).
pub const KEY_SIZE: usize = 32;

/// Smallest envelope that can hold an (empty) message.
pub const MIN_ENVELOPE_SIZE: usize = NONCE_SIZE + TAG_SIZE;

/// Crypto errors.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// Envelope too short or not valid base64.
    #[error("malformed envelope: {0}")]
    MalformedEnvelope(String),

    /// Decryption failed (authentication error).
    #[error("decryption failed: authentication error")]
    DecryptFailed,

    /// Decrypted bytes are not UTF-8 text.
    #[error("decrypted content is not valid UTF-8")]
    InvalidUtf8,

    /// Encryption failed.
    #[error("encryption failed: {0}")]
    EncryptionFailed(String),
}

/// Encrypt `plaintext` into `nonce || ciphertext || tag`.
pub fn seal(plaintext: &[u8], key: &[u8; KEY_SIZE]) -> Result<Vec<u8>, CryptoError> {
    // Generate random 96-bit nonce
    let mut nonce_bytes = [0u8; NONCE_SIZE];
    getrandom::getrandom(&mut nonce_bytes)
        .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;
    let nonce = Nonce::from_slice(&nonce_bytes);

    let cipher = Aes256Gcm::new_from_slice(key)
        .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;

    let ciphertext = cipher
        .encrypt(nonce, plaintext)
        .map_err(|_| CryptoError::EncryptionFailed("aead encrypt failed".into()))?;

    let mut envelope = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    envelope.extend_from_slice(&nonce_bytes);
    envelope.extend_from_slice(&ciphertext);
    Ok(envelope)
}

/// Decrypt an envelope produced by [`seal`].
pub fn open(envelope: &[u8], key: &[u8; KEY_SIZE]) -> Result<Vec<u8>, CryptoError> {
    if envelope.len() < MIN_ENVELOPE_SIZE {
        return Err(CryptoError::MalformedEnvelope(format!(
            "expected at least {} bytes, got {}",
            MIN_ENVELOPE_SIZE,
            envelope.len()
        )));
    }

    let (nonce_bytes, ciphertext) = envelope.split_at(NONCE_SIZE);
    let nonce = Nonce::from_slice(nonce_bytes);

    let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| CryptoError::DecryptFailed)?;

    cipher
        .decrypt(nonce, ciphertext)
        .map_err(|_| CryptoError::DecryptFailed)
}

/// Encrypt clipboard text for upload (base64 of the sealed envelope).
pub fn seal_text(text: &str, secret: &SharedSecret) -> Result<String, CryptoError> {
    let envelope = seal(text.as_bytes(), secret.as_bytes())?;
    Ok(STANDARD.encode(envelope))
}

/// Decrypt clipboard text downloaded from the relay.
pub fn open_text(encoded: &str, secret: &SharedSecret) -> Result<String, CryptoError> {
    let envelope = STANDARD
        .decode(encoded.trim())
        .map_err(|e| CryptoError::MalformedEnvelope(format!("base64 decode: {}", e)))?;
    let plaintext = open(&envelope, secret.as_bytes())?;
    String::from_utf8(plaintext).map_err(|_| CryptoError::InvalidUtf8)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> [u8; KEY_SIZE] {
        [0x42; KEY_SIZE]
    }

    // ===========================================
    // Envelope layout
    // ===========================================

    #[test]
    fn seal_open_roundtrip() {
        let envelope = seal(b"hello clipboard", &key()).unwrap();
        assert_eq!(open(&envelope, &key()).unwrap(), b"hello clipboard");
    }

    #[test]
    fn envelope_is_nonce_ciphertext_tag() {
        let plaintext = b"123456";
        let envelope = seal(plaintext, &key()).unwrap();
        assert_eq!(envelope.len(), NONCE_SIZE + plaintext.len() + TAG_SIZE);
    }

    #[test]
    fn nonces_are_fresh_per_seal() {
        let a = seal(b"same", &key()).unwrap();
        let b = seal(b"same", &key()).unwrap();
        assert_ne!(a[..NONCE_SIZE], b[..NONCE_SIZE]);
        assert_ne!(a, b);
    }

    #[test]
    fn opens_envelope_built_by_another_implementation() {
        let nonce = [7u8; NONCE_SIZE];
        let cipher = Aes256Gcm::new_from_slice(&key()).unwrap();
        let ct = cipher
            .encrypt(Nonce::from_slice(&nonce), b"from the phone".as_ref())
            .unwrap();
        let mut envelope = nonce.to_vec();
        envelope.extend_from_slice(&ct);
        assert_eq!(open(&envelope, &key()).unwrap(), b"from the phone");
    }

    #[test]
    fn empty_plaintext_seals() {
        let envelope = seal(b"", &key()).unwrap();
        assert_eq!(envelope.len(), MIN_ENVELOPE_SIZE);
        assert!(open(&envelope, &key()).unwrap().is_empty());
    }

    // ===========================================
    // Rejections
    // ===========================================

    #[test]
    fn short_envelope_is_malformed() {
        for len in [0, 1, 12, MIN_ENVELOPE_SIZE - 1] {
            let res = open(&vec![0u8; len], &key());
            assert!(matches!(res, Err(CryptoError::MalformedEnvelope(_))), "len {}", len);
        }
    }

    #[test]
    fn wrong_key_fails_decryption() {
        let envelope = seal(b"secret", &key()).unwrap();
        let other = [0x43; KEY_SIZE];
        assert!(matches!(open(&envelope, &other), Err(CryptoError::DecryptFailed)));
    }

    #[test]
    fn any_flipped_byte_fails_decryption() {
        let envelope = seal(b"tamper me", &key()).unwrap();
        for i in 0..envelope.len() {
            let mut corrupted = envelope.clone();
            corrupted[i] ^= 0x01;
            assert!(
                matches!(open(&corrupted, &key()), Err(CryptoError::DecryptFailed)),
                "byte {} not authenticated",
                i
            );
        }
    }

    // ===========================================
    // Text helpers
    // ===========================================

    #[test]
    fn text_roundtrip_with_shared_secret() {
        let secret = SharedSecret::from_bytes(key());
        let encoded = seal_text("héllo 👋", &secret).unwrap();
        assert_eq!(open_text(&encoded, &secret).unwrap(), "héllo 👋");
    }

    #[test]
    fn invalid_base64_is_malformed() {
        let secret = SharedSecret::from_bytes(key());
        assert!(matches!(
            open_text("!!not base64!!", &secret),
            Err(CryptoError::MalformedEnvelope(_))
        ));
    }

    #[test]
    fn non_utf8_plaintext_is_rejected() {
        let secret = SharedSecret::from_bytes(key());
        let envelope = seal(&[0xff, 0xfe, 0xfd], secret.as_bytes()).unwrap();
        let encoded = STANDARD.encode(envelope);
        assert!(matches!(
            open_text(&encoded, &secret),
            Err(CryptoError::InvalidUtf8)
        ));
    }
}
