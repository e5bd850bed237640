//! Symmetric encryption and keyed-hash primitives.
//!
//! Ciphertext format: base64( nonce (12 bytes) | AES-256-GCM ciphertext + tag ).

use crate::error::{Result, TrustError};
use crate::secret_key::SecretKey;
use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::{engine::general_purpose, Engine as _};
use hmac::{Hmac, Mac};
use rand::RngCore;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

pub const NONCE_LEN: usize = 12;
pub const SESSION_TOKEN_BYTES: usize = 32;

type HmacSha256 = Hmac<Sha256>;

pub fn encrypt_bytes(key: &[u8; 32], plaintext: &[u8]) -> Result<Vec<u8>> {
    let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| TrustError::Encrypt)?;
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
    let ciphertext = cipher
        .encrypt(&nonce, plaintext)
        .map_err(|_| TrustError::Encrypt)?;
    let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

pub fn decrypt_bytes(key: &[u8; 32], data: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
    if data.len() < NONCE_LEN {
        return Err(TrustError::Decrypt);
    }
    let (nonce_bytes, ciphertext) = data.split_at(NONCE_LEN);
    let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| TrustError::Decrypt)?;
    let plaintext = cipher
        .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
        .map_err(|_| TrustError::Decrypt)?;
    Ok(Zeroizing::new(plaintext))
}

/// SHA-256 fingerprint, hex encoded.
pub fn hash(input: &str) -> String {
    hex::encode(Sha256::digest(input.as_bytes()))
}

/// HMAC-SHA256 over `message`, hex encoded.
pub fn hmac(message: &str, key: &SecretKey) -> Result<String> {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(key.as_bytes())
        .map_err(|e| TrustError::InvalidKey(format!("mac init: {e}")))?;
    mac.update(message.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Constant-time check of a hex HMAC produced by [`hmac`].
pub fn verify_hmac(message: &str, signature_hex: &str, key: &SecretKey) -> bool {
    let Ok(expected) = hex::decode(signature_hex) else {
        return false;
    };
    let Ok(mut mac) = <HmacSha256 as Mac>::new_from_slice(key.as_bytes()) else {
        return false;
    };
    mac.update(message.as_bytes());
    mac.verify_slice(&expected).is_ok()
}

/// `byte_len` bytes from the OS RNG, hex encoded.
pub fn random_token(byte_len: usize) -> String {
    let mut bytes = Zeroizing::new(vec![0u8; byte_len]);
    OsRng.fill_bytes(&mut bytes);
    hex::encode(&*bytes)
}

/// Encrypts and signs with the process key.
#[derive(Debug, Clone)]
pub struct CryptoCodec {
    key: SecretKey,
}

impl CryptoCodec {
    pub fn new(key: SecretKey) -> Self {
        Self { key }
    }

    pub fn key(&self) -> &SecretKey {
        &self.key
    }

    pub fn encrypt<T: Serialize + ?Sized>(&self, plaintext: &T) -> Result<String> {
        let json = Zeroizing::new(serde_json::to_vec(plaintext)?);
        let sealed = encrypt_bytes(self.key.as_bytes(), &json)?;
        Ok(general_purpose::STANDARD.encode(sealed))
    }

    pub fn decrypt<T: DeserializeOwned>(&self, ciphertext: &str) -> Result<T> {
        let sealed = general_purpose::STANDARD.decode(ciphertext.trim())?;
        let plaintext = decrypt_bytes(self.key.as_bytes(), &sealed)?;
        Ok(serde_json::from_slice(&plaintext)?)
    }

    pub fn sign(&self, message: &str) -> Result<String> {
        hmac(message, &self.key)
    }

    pub fn verify(&self, message: &str, signature_hex: &str) -> bool {
        verify_hmac(message, signature_hex, &self.key)
    }
}
