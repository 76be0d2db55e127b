use aes_gcm::aead::generic_array::GenericArray;
use aes_gcm::{aead::Aead, Aes256Gcm, KeyInit};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use rand::RngCore;

const NONCE_LEN: usize = 12;

#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("encryption failed")]
    Encrypt,
    #[error("ciphertext is not valid base64")]
    Encoding,
    #[error("ciphertext too short")]
    TooShort,
    #[error("decryption failed (wrong key or tampered data)")]
    Decrypt,
    #[error("decrypted value is not utf-8")]
    Utf8,
}

/// AES-256-GCM cipher for crawl login credentials. Output is
/// `base64(nonce || ciphertext || tag)` with a fresh random nonce per call.
#[derive(Clone)]
pub struct CredentialCipher {
    key: [u8; 32],
}

impl std::fmt::Debug for CredentialCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialCipher").finish_non_exhaustive()
    }
}

impl CredentialCipher {
    pub fn new(key: [u8; 32]) -> Self {
        Self { key }
    }

    pub fn encrypt(&self, plaintext: &str) -> Result<String, CryptoError> {
        let cipher = Aes256Gcm::new(GenericArray::from_slice(&self.key));
        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = GenericArray::from_slice(&nonce_bytes);
        let ciphertext = cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|_| CryptoError::Encrypt)?;

        let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        sealed.extend_from_slice(&nonce_bytes);
        sealed.extend_from_slice(&ciphertext);
        Ok(STANDARD.encode(sealed))
    }

    pub fn decrypt(&self, sealed: &str) -> Result<String, CryptoError> {
        let bytes = STANDARD
            .decode(sealed.trim())
            .map_err(|_| CryptoError::Encoding)?;
        if bytes.len() <= NONCE_LEN {
            return Err(CryptoError::TooShort);
        }
        let cipher = Aes256Gcm::new(GenericArray::from_slice(&self.key));
        let nonce = GenericArray::from_slice(&bytes[..NONCE_LEN]);
        let plaintext = cipher
            .decrypt(nonce, &bytes[NONCE_LEN..])
            .map_err(|_| CryptoError::Decrypt)?;
        String::from_utf8(plaintext).map_err(|_| CryptoError::Utf8)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cipher() -> CredentialCipher {
        CredentialCipher::new([7u8; 32])
    }

    #[test]
    fn round_trips_and_never_stores_plaintext() {
        let cipher = cipher();
        for secret in ["admin", "p@ss w0rd!", "סיסמה"] {
            let sealed = cipher.encrypt(secret).unwrap();
            assert_ne!(sealed, secret);
            assert!(!sealed.contains(secret));
            assert_eq!(cipher.decrypt(&sealed).unwrap(), secret);
        }
    }

    #[test]
    fn nonces_differ_between_calls() {
        let cipher = cipher();
        assert_ne!(cipher.encrypt("same").unwrap(), cipher.encrypt("same").unwrap());
    }

    #[test]
    fn wrong_key_or_tampering_is_rejected() {
        let sealed = cipher().encrypt("secret").unwrap();
        let other = CredentialCipher::new([9u8; 32]);
        assert!(matches!(other.decrypt(&sealed), Err(CryptoError::Decrypt)));

        let mut raw = STANDARD.decode(&sealed).unwrap();
        let last = raw.len() - 1;
        raw[last] ^= 0x01;
        assert!(matches!(
            cipher().decrypt(&STANDARD.encode(raw)),
            Err(CryptoError::Decrypt)
        ));
        assert!(matches!(cipher().decrypt("AAAA"), Err(CryptoError::TooShort)));
    }
}
