//! Authenticated encryption using XChaCha20-Poly1305.
//!
//! XChaCha20-Poly1305 provides both confidentiality and authenticity,
//! with a 24-byte nonce that is safe for random generation.

use chacha20poly1305::{
    aead::{generic_array::GenericArray, Aead, AeadCore, KeyInit, OsRng, Payload},
    XChaCha20Poly1305,
};

use crate::keys::KEY_LENGTH;
use medledger_common::{Error, Result};

/// Nonce size for XChaCha20-Poly1305 (24 bytes).
pub const NONCE_SIZE: usize = 24;

/// Authentication tag size (16 bytes).
pub const TAG_SIZE: usize = 16;

fn cipher_for(key: &[u8]) -> Result<XChaCha20Poly1305> {
    if key.len() != KEY_LENGTH {
        return Err(Error::Crypto(format!(
            "Invalid key length: expected {}, got {}",
            KEY_LENGTH,
            key.len()
        )));
    }
    Ok(XChaCha20Poly1305::new(GenericArray::from_slice(key)))
}

/// Encrypt plaintext using XChaCha20-Poly1305.
///
/// # Postconditions
/// - Returns nonce || ciphertext || tag
/// - The nonce is randomly generated
///
/// # Errors
/// - Returns `Crypto` if the key length is incorrect
pub fn encrypt(key: &[u8], plaintext: &[u8]) -> Result<Vec<u8>> {
    encrypt_with_aad(key, plaintext, &[])
}

/// Decrypt ciphertext produced by [`encrypt`].
///
/// # Errors
/// - Returns `Crypto` if the key length is incorrect
/// - Returns `Decryption` if the input is too short or fails authentication
pub fn decrypt(key: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>> {
    decrypt_with_aad(key, ciphertext, &[])
}

/// Encrypt plaintext and bind it to associated data.
///
/// The associated data is authenticated but not encrypted; decryption
/// must present the same bytes.
pub fn encrypt_with_aad(key: &[u8], plaintext: &[u8], aad: &[u8]) -> Result<Vec<u8>> {
    let cipher = cipher_for(key)?;
    let nonce = XChaCha20Poly1305::generate_nonce(&mut OsRng);

    let ciphertext = cipher
        .encrypt(&nonce, Payload { msg: plaintext, aad })
        .map_err(|e| Error::Crypto(format!("Encryption failed: {}", e)))?;

    let mut result = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    result.extend_from_slice(&nonce);
    result.extend_from_slice(&ciphertext);

    Ok(result)
}

/// Decrypt ciphertext produced by [`encrypt_with_aad`].
pub fn decrypt_with_aad(key: &[u8], ciphertext: &[u8], aad: &[u8]) -> Result<Vec<u8>> {
    let cipher = cipher_for(key)?;

    if ciphertext.len() < NONCE_SIZE + TAG_SIZE {
        return Err(Error::Decryption("Ciphertext too short".to_string()));
    }

    let (nonce_bytes, encrypted) = ciphertext.split_at(NONCE_SIZE);
    let nonce = GenericArray::from_slice(nonce_bytes);

    cipher
        .decrypt(nonce, Payload { msg: encrypted, aad })
        .map_err(|_| Error::Decryption("Authentication tag mismatch".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_ciphertext_size() {
        let key = [42u8; KEY_LENGTH];
        let plaintext = b"Test message";

        let ciphertext = encrypt(&key, plaintext).unwrap();

        assert_eq!(ciphertext.len(), NONCE_SIZE + plaintext.len() + TAG_SIZE);
    }

    #[test]
    fn test_different_nonce_each_time() {
        let key = [42u8; KEY_LENGTH];
        let plaintext = b"Same plaintext";

        let ct1 = encrypt(&key, plaintext).unwrap();
        let ct2 = encrypt(&key, plaintext).unwrap();

        assert_ne!(&ct1[..NONCE_SIZE], &ct2[..NONCE_SIZE]);
        assert_ne!(ct1, ct2);
    }

    #[test]
    fn test_wrong_key_is_decryption_error() {
        let ciphertext = encrypt(&[1u8; KEY_LENGTH], b"Secret data").unwrap();
        let result = decrypt(&[2u8; KEY_LENGTH], &ciphertext);

        assert!(matches!(result, Err(Error::Decryption(_))));
    }

    #[test]
    fn test_tampered_ciphertext_fails() {
        let key = [42u8; KEY_LENGTH];
        let mut ciphertext = encrypt(&key, b"Important data").unwrap();
        ciphertext[NONCE_SIZE + 5] ^= 0xFF;

        assert!(matches!(decrypt(&key, &ciphertext), Err(Error::Decryption(_))));
    }

    #[test]
    fn test_truncated_ciphertext_fails() {
        let key = [42u8; KEY_LENGTH];
        let ciphertext = encrypt(&key, b"data").unwrap();

        let result = decrypt(&key, &ciphertext[..NONCE_SIZE + 3]);
        assert!(matches!(result, Err(Error::Decryption(_))));
    }

    #[test]
    fn test_invalid_key_length() {
        let short_key = [0u8; 16];
        assert!(matches!(encrypt(&short_key, b"data"), Err(Error::Crypto(_))));
    }

    #[test]
    fn test_aad_must_match() {
        let key = [7u8; KEY_LENGTH];
        let ciphertext = encrypt_with_aad(&key, b"wrapped key", b"alice").unwrap();

        assert_eq!(
            decrypt_with_aad(&key, &ciphertext, b"alice").unwrap(),
            b"wrapped key"
        );
        assert!(decrypt_with_aad(&key, &ciphertext, b"bob").is_err());
        assert!(decrypt(&key, &ciphertext).is_err());
    }

    proptest! {
        #[test]
        fn prop_encrypt_decrypt_roundtrip(
            key in proptest::array::uniform32(any::<u8>()),
            plaintext in proptest::collection::vec(any::<u8>(), 0..2048),
        ) {
            let ciphertext = encrypt(&key, &plaintext).unwrap();
            prop_assert_eq!(decrypt(&key, &ciphertext).unwrap(), plaintext);
        }
    }
}
