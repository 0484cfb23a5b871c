//! Authenticated encryption of stored payloads.
//!
//! The store encrypts the final serialized text right before the write and
//! decrypts it right after the read, so `decrypt(encrypt(t)) == t` for
//! every stored payload `t`.
//!
//! # Ciphertext format
//!
//! [`AeadCipher`] draws a fresh salt and nonce per message, derives the
//! key as `HMAC-<hashing>(secret, salt)` truncated to the key size, and
//! seals with AES-GCM. The result is a small JSON envelope:
//!
//! ```text
//! {"ct":"<ciphertext + tag>","iv":"<nonce>","salt":"<salt>"}
//! ```
//!
//! Each field uses the configured text encoding.

use crate::config::{CipherAlgorithm, CryptoOptions, HashAlgorithm, TextEncoding};
use crate::error::{SessionError, SessionResult};
use aes_gcm::aead::consts::U16;
use aes_gcm::aead::generic_array::GenericArray;
use aes_gcm::aead::{Aead, AeadCore, KeyInit};
use aes_gcm::aes::{Aes128, Aes256};
use aes_gcm::{Aes128Gcm, Aes256Gcm, AesGcm};
use base64::{Engine, engine::general_purpose::STANDARD};
use hmac::{Hmac, Mac};
use rand::RngCore;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use sha2::{Sha256, Sha512};

type Aes128Gcm16 = AesGcm<Aes128, U16>;
type Aes256Gcm16 = AesGcm<Aes256, U16>;

const SALT_SIZE: usize = 16;
const TAG_SIZE: usize = 16;

/// Encryption capability used by the store.
///
/// Both directions are fallible; a failed decrypt must never yield a value.
pub trait SessionCipher: Send + Sync {
    /// Encrypt `plaintext` under `secret`.
    fn encrypt(&self, secret: &str, plaintext: &str) -> SessionResult<String>;

    /// Decrypt `ciphertext` produced by [`SessionCipher::encrypt`].
    fn decrypt(&self, secret: &str, ciphertext: &str) -> SessionResult<String>;
}

/// AES-GCM cipher with per-message HMAC key derivation.
#[derive(Debug, Clone)]
pub struct AeadCipher {
    algorithm: CipherAlgorithm,
    hashing: HashAlgorithm,
    encoding: TextEncoding,
    iv_size: usize,
}

#[derive(Serialize, Deserialize)]
struct Envelope {
    ct: String,
    iv: String,
    salt: String,
}

impl AeadCipher {
    /// Build a cipher from crypto options, validating sizes.
    pub fn new(options: &CryptoOptions) -> SessionResult<Self> {
        if options.key_size != options.algorithm.key_size() {
            return Err(SessionError::Config(format!(
                "{} needs a {}-byte key, got key_size {}",
                options.algorithm,
                options.algorithm.key_size(),
                options.key_size
            )));
        }
        if options.iv_size != 12 && options.iv_size != 16 {
            return Err(SessionError::Config(format!(
                "iv_size must be 12 or 16, got {}",
                options.iv_size
            )));
        }
        if options.at_size != TAG_SIZE {
            return Err(SessionError::Config(format!(
                "at_size must be {TAG_SIZE}, got {}",
                options.at_size
            )));
        }

        Ok(Self {
            algorithm: options.algorithm,
            hashing: options.hashing,
            encoding: options.encoding,
            iv_size: options.iv_size,
        })
    }

    fn derive_key(&self, secret: &str, salt: &[u8]) -> SessionResult<Vec<u8>> {
        let digest = match self.hashing {
            HashAlgorithm::Sha256 => {
                let mut mac = <Hmac<Sha256> as Mac>::new_from_slice(secret.as_bytes())
                    .map_err(|e| SessionError::Crypto(e.to_string()))?;
                mac.update(salt);
                mac.finalize().into_bytes().to_vec()
            }
            HashAlgorithm::Sha512 => {
                let mut mac = <Hmac<Sha512> as Mac>::new_from_slice(secret.as_bytes())
                    .map_err(|e| SessionError::Crypto(e.to_string()))?;
                mac.update(salt);
                mac.finalize().into_bytes().to_vec()
            }
        };

        let key_size = self.algorithm.key_size();
        if digest.len() < key_size {
            return Err(SessionError::Crypto(format!(
                "{} digest too short for a {key_size}-byte key",
                self.hashing
            )));
        }
        Ok(digest[..key_size].to_vec())
    }

    fn seal_with(&self, key: &[u8], iv: &[u8], plaintext: &[u8]) -> SessionResult<Vec<u8>> {
        match (self.algorithm, self.iv_size) {
            (CipherAlgorithm::Aes128Gcm, 12) => seal::<Aes128Gcm>(key, iv, plaintext),
            (CipherAlgorithm::Aes128Gcm, _) => seal::<Aes128Gcm16>(key, iv, plaintext),
            (CipherAlgorithm::Aes256Gcm, 12) => seal::<Aes256Gcm>(key, iv, plaintext),
            (CipherAlgorithm::Aes256Gcm, _) => seal::<Aes256Gcm16>(key, iv, plaintext),
        }
    }

    fn open_with(&self, key: &[u8], iv: &[u8], ciphertext: &[u8]) -> SessionResult<Vec<u8>> {
        match (self.algorithm, self.iv_size) {
            (CipherAlgorithm::Aes128Gcm, 12) => open::<Aes128Gcm>(key, iv, ciphertext),
            (CipherAlgorithm::Aes128Gcm, _) => open::<Aes128Gcm16>(key, iv, ciphertext),
            (CipherAlgorithm::Aes256Gcm, 12) => open::<Aes256Gcm>(key, iv, ciphertext),
            (CipherAlgorithm::Aes256Gcm, _) => open::<Aes256Gcm16>(key, iv, ciphertext),
        }
    }

    fn encode(&self, bytes: &[u8]) -> String {
        match self.encoding {
            TextEncoding::Hex => hex::encode(bytes),
            TextEncoding::Base64 => STANDARD.encode(bytes),
        }
    }

    fn decode(&self, text: &str) -> SessionResult<Vec<u8>> {
        match self.encoding {
            TextEncoding::Hex => hex::decode(text).map_err(|e| SessionError::Crypto(e.to_string())),
            TextEncoding::Base64 => STANDARD
                .decode(text)
                .map_err(|e| SessionError::Crypto(e.to_string())),
        }
    }
}

impl SessionCipher for AeadCipher {
    fn encrypt(&self, secret: &str, plaintext: &str) -> SessionResult<String> {
        let mut salt = [0u8; SALT_SIZE];
        OsRng.fill_bytes(&mut salt);
        let mut iv = vec![0u8; self.iv_size];
        OsRng.fill_bytes(&mut iv);

        let key = self.derive_key(secret, &salt)?;
        let ct = self.seal_with(&key, &iv, plaintext.as_bytes())?;

        let envelope = Envelope {
            ct: self.encode(&ct),
            iv: self.encode(&iv),
            salt: self.encode(&salt),
        };
        serde_json::to_string(&envelope).map_err(|e| SessionError::Crypto(e.to_string()))
    }

    fn decrypt(&self, secret: &str, ciphertext: &str) -> SessionResult<String> {
        let envelope: Envelope = serde_json::from_str(ciphertext)
            .map_err(|e| SessionError::Crypto(format!("malformed ciphertext: {e}")))?;

        let salt = self.decode(&envelope.salt)?;
        let iv = self.decode(&envelope.iv)?;
        let ct = self.decode(&envelope.ct)?;

        let key = self.derive_key(secret, &salt)?;
        let plaintext = self.open_with(&key, &iv, &ct)?;

        String::from_utf8(plaintext).map_err(|e| SessionError::Crypto(e.to_string()))
    }
}

fn seal<C>(key: &[u8], iv: &[u8], plaintext: &[u8]) -> SessionResult<Vec<u8>>
where
    C: KeyInit + Aead,
{
    let cipher = C::new_from_slice(key).map_err(|e| SessionError::Crypto(e.to_string()))?;
    let nonce = GenericArray::<u8, <C as AeadCore>::NonceSize>::from_exact_iter(iv.iter().copied())
        .ok_or_else(|| SessionError::Crypto(format!("invalid iv length {}", iv.len())))?;
    cipher
        .encrypt(&nonce, plaintext)
        .map_err(|e| SessionError::Crypto(format!("Encryption failed: {e}")))
}

fn open<C>(key: &[u8], iv: &[u8], ciphertext: &[u8]) -> SessionResult<Vec<u8>>
where
    C: KeyInit + Aead,
{
    let cipher = C::new_from_slice(key).map_err(|e| SessionError::Crypto(e.to_string()))?;
    let nonce = GenericArray::<u8, <C as AeadCore>::NonceSize>::from_exact_iter(iv.iter().copied())
        .ok_or_else(|| SessionError::Crypto(format!("invalid iv length {}", iv.len())))?;
    cipher
        .decrypt(&nonce, ciphertext)
        .map_err(|e| SessionError::Crypto(format!("Decryption failed: {e}")))
}
