//! Token encryption at rest.
//!
//! # Responsibilities
//! - Encrypt upstream credentials with AES-256-GCM before they are persisted
//! - Decrypt them when the proxy needs the plaintext for header injection
//! - Load the process-wide key from `AUTH_ENCRYPTION_KEY`
//!
//! # Design Decisions
//! - A fresh random 12-byte nonce per record; the GCM tag travels inside the
//!   ciphertext, both base64-encoded for storage
//! - The key may be base64 or raw bytes; at least 32 key bytes are required
//!   and only the first 32 are used
//! - The key is re-read from the environment on each call, so the codec holds
//!   no state and a missing key surfaces as an error, not a panic

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;

/// Environment variable holding the encryption key (base64 or raw bytes).
pub const KEY_ENV: &str = "AUTH_ENCRYPTION_KEY";

/// Key size in bytes (AES-256).
pub const KEY_SIZE: usize = 32;

/// Nonce size in bytes (GCM standard).
pub const NONCE_SIZE: usize = 12;

#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    /// `AUTH_ENCRYPTION_KEY` is unset or decodes to fewer than 32 bytes.
    #[error("encryption key missing or shorter than {KEY_SIZE} bytes (set {KEY_ENV})")]
    KeyMissing,

    /// Stored nonce does not decode to exactly 12 bytes.
    #[error("invalid nonce length")]
    BadNonceLength,

    /// Ciphertext is not valid base64 or fails GCM authentication.
    #[error("ciphertext corrupt or tampered")]
    CorruptCiphertext,
}

/// Returns the AEAD key from the environment.
///
/// Accepts base64 (preferred) or raw bytes. Anything shorter than 32 bytes
/// after decoding is rejected as [`TokenError::KeyMissing`].
fn key_from_env() -> Result<Key<Aes256Gcm>, TokenError> {
    let raw = std::env::var(KEY_ENV).unwrap_or_default();
    if raw.is_empty() {
        return Err(TokenError::KeyMissing);
    }
    let bytes = match BASE64.decode(raw.as_bytes()) {
        Ok(decoded) if decoded.len() >= KEY_SIZE => decoded,
        _ if raw.len() >= KEY_SIZE => raw.into_bytes(),
        _ => return Err(TokenError::KeyMissing),
    };
    if bytes.len() < KEY_SIZE {
        return Err(TokenError::KeyMissing);
    }
    Ok(*Key::<Aes256Gcm>::from_slice(&bytes[..KEY_SIZE]))
}

/// Encrypts a plaintext token.
///
/// Returns `(ciphertext_b64, nonce_b64)`; the ciphertext includes the GCM tag.
pub fn encrypt_token(plaintext: &str) -> Result<(String, String), TokenError> {
    let key = key_from_env()?;
    let cipher = Aes256Gcm::new(&key);
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
    let ciphertext = cipher
        .encrypt(&nonce, plaintext.as_bytes())
        .map_err(|_| TokenError::CorruptCiphertext)?;
    Ok((BASE64.encode(ciphertext), BASE64.encode(nonce)))
}

/// Decrypts a stored token.
///
/// Fails with [`TokenError::KeyMissing`], [`TokenError::BadNonceLength`], or
/// [`TokenError::CorruptCiphertext`] if the record was tampered with.
pub fn decrypt_token(ciphertext_b64: &str, nonce_b64: &str) -> Result<String, TokenError> {
    let key = key_from_env()?;
    let nonce_bytes = BASE64
        .decode(nonce_b64.as_bytes())
        .map_err(|_| TokenError::BadNonceLength)?;
    if nonce_bytes.len() != NONCE_SIZE {
        return Err(TokenError::BadNonceLength);
    }
    let ciphertext = BASE64
        .decode(ciphertext_b64.as_bytes())
        .map_err(|_| TokenError::CorruptCiphertext)?;
    let cipher = Aes256Gcm::new(&key);
    let plaintext = cipher
        .decrypt(Nonce::from_slice(&nonce_bytes), ciphertext.as_ref())
        .map_err(|_| TokenError::CorruptCiphertext)?;
    String::from_utf8(plaintext).map_err(|_| TokenError::CorruptCiphertext)
}

#[cfg(test)]
mod tests {
    use super::*;

    // 32 zero bytes, base64. Test key only.
    const TEST_KEY: &str = "AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA=";

    // Tests share one process environment; serialize access to the key var.
    static ENV_LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());

    fn with_key<F: FnOnce()>(key: &str, f: F) {
        let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        if key.is_empty() {
            std::env::remove_var(KEY_ENV);
        } else {
            std::env::set_var(KEY_ENV, key);
        }
        f();
        std::env::remove_var(KEY_ENV);
    }

    #[test]
    fn roundtrip() {
        with_key(TEST_KEY, || {
            let (ciphertext, nonce) = encrypt_token("secret-token-123").unwrap();
            assert!(!ciphertext.is_empty());
            assert!(!nonce.is_empty());
            let plain = decrypt_token(&ciphertext, &nonce).unwrap();
            assert_eq!(plain, "secret-token-123");
        });
    }

    #[test]
    fn roundtrip_raw_key() {
        // 32 raw bytes, not valid base64 of >= 32 bytes.
        with_key("0123456789abcdef0123456789abcdef", || {
            let (ciphertext, nonce) = encrypt_token("x").unwrap();
            assert_eq!(decrypt_token(&ciphertext, &nonce).unwrap(), "x");
        });
    }

    #[test]
    fn key_missing() {
        with_key("", || {
            assert!(matches!(encrypt_token("x"), Err(TokenError::KeyMissing)));
            assert!(matches!(
                decrypt_token("any", "any"),
                Err(TokenError::KeyMissing)
            ));
        });
    }

    #[test]
    fn key_too_short() {
        let short = BASE64.encode([0u8; 16]);
        with_key(&short, || {
            assert!(matches!(encrypt_token("x"), Err(TokenError::KeyMissing)));
        });
    }

    #[test]
    fn tampered_ciphertext_fails() {
        with_key(TEST_KEY, || {
            let (ciphertext, nonce) = encrypt_token("payload").unwrap();
            let mut bytes = BASE64.decode(&ciphertext).unwrap();
            for i in 0..bytes.len() {
                bytes[i] ^= 0x01;
                let flipped = BASE64.encode(&bytes);
                assert!(matches!(
                    decrypt_token(&flipped, &nonce),
                    Err(TokenError::CorruptCiphertext)
                ));
                bytes[i] ^= 0x01;
            }
        });
    }

    #[test]
    fn tampered_nonce_fails() {
        with_key(TEST_KEY, || {
            let (ciphertext, nonce) = encrypt_token("payload").unwrap();
            let mut bytes = BASE64.decode(&nonce).unwrap();
            bytes[0] ^= 0x01;
            let flipped = BASE64.encode(&bytes);
            assert!(matches!(
                decrypt_token(&ciphertext, &flipped),
                Err(TokenError::CorruptCiphertext)
            ));
        });
    }

    #[test]
    fn short_nonce_rejected() {
        with_key(TEST_KEY, || {
            let (ciphertext, _) = encrypt_token("payload").unwrap();
            let short = BASE64.encode([0u8; 8]);
            assert!(matches!(
                decrypt_token(&ciphertext, &short),
                Err(TokenError::BadNonceLength)
            ));
        });
    }

    #[test]
    fn fresh_nonce_per_record() {
        with_key(TEST_KEY, || {
            let (c1, n1) = encrypt_token("same").unwrap();
            let (c2, n2) = encrypt_token("same").unwrap();
            assert_ne!(n1, n2);
            assert_ne!(c1, c2);
        });
    }
}
