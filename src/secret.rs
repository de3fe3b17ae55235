//! Symmetric encryption of provider credentials at rest.
//!
//! Ciphertexts are AES-256-GCM with a random 96-bit nonce prepended, encoded as standard
//! base64 so they can be stored in JSON.

use crate::error::Error;
use base64::engine::general_purpose;
use base64::Engine;
use ring::aead::{Aad, LessSafeKey, Nonce, UnboundKey, AES_256_GCM, NONCE_LEN};
use ring::rand::{SecureRandom, SystemRandom};
use std::fmt;

pub const KEY_LEN: usize = 32;

#[derive(Clone)]
pub struct SecretCodec {
    key: [u8; KEY_LEN],
    rng: SystemRandom,
}

impl fmt::Debug for SecretCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretCodec").finish_non_exhaustive()
    }
}

impl SecretCodec {
    /// Build a codec from a key of exactly [`KEY_LEN`] bytes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] for a key of any other length.
    pub fn new(key: &[u8]) -> Result<Self, Error> {
        let key: [u8; KEY_LEN] = key.try_into().map_err(|_| {
            Error::Configuration(format!(
                "encryption key must be exactly {KEY_LEN} bytes, got {}",
                key.len()
            ))
        })?;
        Ok(SecretCodec {
            key,
            rng: SystemRandom::new(),
        })
    }

    fn sealing_key(&self) -> Result<LessSafeKey, Error> {
        let unbound = UnboundKey::new(&AES_256_GCM, &self.key)
            .map_err(|_| Error::Configuration("unusable encryption key".to_string()))?;
        Ok(LessSafeKey::new(unbound))
    }

    /// Encrypt `plaintext`. Empty input encrypts to an empty string.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if the system RNG or the cipher fails.
    pub fn encrypt(&self, plaintext: &str) -> Result<String, Error> {
        if plaintext.is_empty() {
            return Ok(String::new());
        }
        let mut nonce_bytes = [0u8; NONCE_LEN];
        self.rng
            .fill(&mut nonce_bytes)
            .map_err(|_| Error::Configuration("system RNG failure".to_string()))?;

        let mut in_out = plaintext.as_bytes().to_vec();
        self.sealing_key()?
            .seal_in_place_append_tag(
                Nonce::assume_unique_for_key(nonce_bytes),
                Aad::empty(),
                &mut in_out,
            )
            .map_err(|_| Error::Configuration("encryption failed".to_string()))?;

        let mut sealed = nonce_bytes.to_vec();
        sealed.extend_from_slice(&in_out);
        Ok(general_purpose::STANDARD.encode(sealed))
    }

    /// Decrypt a value produced by [`SecretCodec::encrypt`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] if the value isn't base64, is too short, or fails
    /// authentication (wrong key or tampered ciphertext).
    pub fn decrypt(&self, ciphertext: &str) -> Result<String, Error> {
        if ciphertext.is_empty() {
            return Ok(String::new());
        }
        let mut sealed = general_purpose::STANDARD
            .decode(ciphertext)
            .map_err(|err| Error::Validation(format!("secret is not valid base64: {err}")))?;
        if sealed.len() < NONCE_LEN {
            return Err(Error::Validation("secret ciphertext too short".to_string()));
        }
        let mut in_out = sealed.split_off(NONCE_LEN);
        let nonce = Nonce::try_assume_unique_for_key(&sealed)
            .map_err(|_| Error::Validation("secret nonce is malformed".to_string()))?;
        let plaintext = self
            .sealing_key()?
            .open_in_place(nonce, Aad::empty(), &mut in_out)
            .map_err(|_| Error::Validation("secret failed authentication".to_string()))?;
        String::from_utf8(plaintext.to_vec())
            .map_err(|_| Error::Validation("secret is not UTF-8".to_string()))
    }
}
