//! At-rest encryption for free-text survey answers and appointment notes.
use aes_gcm::{
    aead::{Aead, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose, Engine as _};
use rand_core::RngCore;
use thiserror::Error;

const NONCE_LEN: usize = 12;

#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("encryption error")]
    Encrypt,
    #[error("decryption error")]
    Decrypt,
    #[error("encryption key must be 32 bytes")]
    InvalidKey,
}

#[derive(Clone)]
pub struct Crypto {
    cipher: Aes256Gcm,
}

impl Crypto {
    pub fn new(key: &[u8]) -> Result<Self, CryptoError> {
        if key.len() != 32 {
            return Err(CryptoError::InvalidKey);
        }
        let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| CryptoError::InvalidKey)?;
        Ok(Self { cipher })
    }

    /// Encrypts to base64(nonce || ciphertext).
    pub fn seal(&self, plaintext: &str) -> Result<String, CryptoError> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);
        let ciphertext = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce_bytes), plaintext.as_bytes())
            .map_err(|_| CryptoError::Encrypt)?;

        let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        sealed.extend_from_slice(&nonce_bytes);
        sealed.extend_from_slice(&ciphertext);
        Ok(general_purpose::STANDARD.encode(sealed))
    }

    pub fn open(&self, sealed: &str) -> Result<String, CryptoError> {
        let data = general_purpose::STANDARD
            .decode(sealed)
            .map_err(|_| CryptoError::Decrypt)?;
        if data.len() <= NONCE_LEN {
            return Err(CryptoError::Decrypt);
        }
        let (nonce, ciphertext) = data.split_at(NONCE_LEN);
        let plain = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| CryptoError::Decrypt)?;
        String::from_utf8(plain).map_err(|_| CryptoError::Decrypt)
    }

    pub fn seal_opt(&self, plaintext: Option<&str>) -> Result<Option<String>, CryptoError> {
        plaintext
            .filter(|s| !s.trim().is_empty())
            .map(|s| self.seal(s))
            .transpose()
    }

    /// Decrypts for display; unreadable values are logged and hidden.
    pub fn open_lossy(&self, sealed: Option<&str>) -> Option<String> {
        let sealed = sealed?;
        match self.open(sealed) {
            Ok(plain) => Some(plain),
            Err(e) => {
                tracing::warn!("Failed to decrypt stored value: {}", e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn crypto() -> Crypto {
        Crypto::new(&[7u8; 32]).unwrap()
    }

    #[test]
    fn sealed_text_opens_with_same_key() {
        let c = crypto();
        let sealed = c.seal("felt anxious all week").unwrap();
        assert_ne!(sealed, "felt anxious all week");
        assert_eq!(c.open(&sealed).unwrap(), "felt anxious all week");
    }

    #[test]
    fn nonces_differ_between_seals() {
        let c = crypto();
        assert_ne!(c.seal("same").unwrap(), c.seal("same").unwrap());
    }

    #[test]
    fn rejects_wrong_key_and_garbage() {
        let sealed = crypto().seal("secret").unwrap();
        let other = Crypto::new(&[9u8; 32]).unwrap();
        assert!(other.open(&sealed).is_err());
        assert!(crypto().open("not-base64!").is_err());
        assert!(crypto().open("AAAA").is_err());
        assert!(other.open_lossy(Some(&sealed)).is_none());
    }

    #[test]
    fn key_length_is_checked() {
        assert!(matches!(Crypto::new(&[1u8; 16]), Err(CryptoError::InvalidKey)));
    }

    #[test]
    fn blank_optional_text_is_not_stored() {
        let c = crypto();
        assert_eq!(c.seal_opt(None).unwrap(), None);
        assert_eq!(c.seal_opt(Some("  ")).unwrap(), None);
        let sealed = c.seal_opt(Some("note")).unwrap();
        assert_eq!(c.open_lossy(sealed.as_deref()).as_deref(), Some("note"));
    }
}
