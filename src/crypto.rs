use std::time::{SystemTime, UNIX_EPOCH};

use aes_gcm::aead::consts::U12;
use aes_gcm::aead::{Aead as _, KeyInit as _};
use aes_gcm::{Aes128Gcm, Aes256Gcm, AesGcm};
use base64::Engine as _;
use hmac::Hmac;
use rand::RngCore as _;
use sha1::Sha1;
use sha2::{Digest as _, Sha256};
use zeroize::Zeroizing;

use crate::error::{IndexError, Result};

pub const KDF_ITERATIONS: u32 = 4096;
pub const EXTENDED_KEY_SIZE: usize = 32;
pub const KEY_ID_SIZE: usize = 8;
pub const NONCE_SIZE: usize = 12;

pub const AES_GCM_METHOD: &str = "aes-gcm";

type Aes192Gcm = AesGcm<aes_gcm::aes::Aes192, U12>;

pub type ExtendedKey = Zeroizing<[u8; EXTENDED_KEY_SIZE]>;

pub fn derive_extended_key(passphrase: &[u8], salt: &[u8]) -> Result<ExtendedKey> {
    let mut key = Zeroizing::new([0u8; EXTENDED_KEY_SIZE]);
    pbkdf2::pbkdf2::<Hmac<Sha256>>(passphrase, salt, KDF_ITERATIONS, key.as_mut())
        .map_err(|err| IndexError::KeyDerivationFailed(err.to_string()))?;
    Ok(key)
}

#[derive(Clone)]
pub enum Cipher {
    Aes128(Aes128Gcm),
    Aes192(Aes192Gcm),
    Aes256(Aes256Gcm),
}

impl std::fmt::Debug for Cipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let bits = match self {
            Self::Aes128(_) => 128,
            Self::Aes192(_) => 192,
            Self::Aes256(_) => 256,
        };
        write!(f, "Cipher(AES-{bits}-GCM, [REDACTED])")
    }
}

impl Cipher {
    pub fn new(key: &[u8]) -> Result<Self> {
        let invalid = |_| IndexError::InvalidKeyLength(key.len());
        match key.len() {
            16 => Ok(Self::Aes128(Aes128Gcm::new_from_slice(key).map_err(invalid)?)),
            24 => Ok(Self::Aes192(Aes192Gcm::new_from_slice(key).map_err(invalid)?)),
            32 => Ok(Self::Aes256(Aes256Gcm::new_from_slice(key).map_err(invalid)?)),
            other => Err(IndexError::InvalidKeyLength(other)),
        }
    }

    pub fn nonce_size(&self) -> usize {
        NONCE_SIZE
    }

    pub fn method(&self) -> &'static str {
        AES_GCM_METHOD
    }

    pub fn seal(&self, nonce: &[u8], plaintext: &[u8]) -> Result<Vec<u8>> {
        let nonce = self.checked_nonce(nonce)?;
        match self {
            Self::Aes128(c) => c.encrypt(nonce, plaintext),
            Self::Aes192(c) => c.encrypt(nonce, plaintext),
            Self::Aes256(c) => c.encrypt(nonce, plaintext),
        }
        .map_err(|_| IndexError::SealFailed)
    }

    pub fn open(&self, nonce: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>> {
        let nonce = self.checked_nonce(nonce)?;
        match self {
            Self::Aes128(c) => c.decrypt(nonce, ciphertext),
            Self::Aes192(c) => c.decrypt(nonce, ciphertext),
            Self::Aes256(c) => c.decrypt(nonce, ciphertext),
        }
        .map_err(|_| IndexError::OpenFailed)
    }

    fn checked_nonce<'n>(&self, nonce: &'n [u8]) -> Result<&'n aes_gcm::Nonce<U12>> {
        if nonce.len() != self.nonce_size() {
            return Err(IndexError::InvalidNonceLength {
                expected: self.nonce_size(),
                actual: nonce.len(),
            });
        }
        Ok(aes_gcm::Nonce::<U12>::from_slice(nonce))
    }
}

pub fn build_cipher(extended_key: &[u8]) -> Result<Cipher> {
    Cipher::new(extended_key)
}

pub fn new_nonce(size: usize) -> Result<Vec<u8>> {
    let digest_size = <Sha256 as sha2::digest::OutputSizeUser>::output_size();
    if size > digest_size {
        return Err(IndexError::InvalidNonceLength {
            expected: digest_size,
            actual: size,
        });
    }

    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default();
    let random = random_string(digest_size)?;

    let mut hasher = Sha256::new();
    hasher.update(now.to_string().as_bytes());
    hasher.update(random.as_bytes());
    let digest = hasher.finalize();
    Ok(digest[..size].to_vec())
}

fn random_string(len: usize) -> Result<String> {
    let mut bytes = vec![0u8; len];
    rand::rngs::OsRng
        .try_fill_bytes(&mut bytes)
        .map_err(|err| IndexError::KeyDerivationFailed(format!("read os entropy: {err}")))?;
    let mut encoded = base64::engine::general_purpose::URL_SAFE.encode(&bytes);
    encoded.truncate(len);
    Ok(encoded)
}

/// First eight bytes of SHA-256 over the raw passphrase.
pub fn key_id(passphrase: &[u8]) -> [u8; KEY_ID_SIZE] {
    let digest = Sha256::digest(passphrase);
    let mut id = [0u8; KEY_ID_SIZE];
    id.copy_from_slice(&digest[..KEY_ID_SIZE]);
    id
}

#[derive(Debug, Clone)]
pub struct EncryptionMaterial {
    pub cipher: Cipher,
    pub nonce: Vec<u8>,
}

impl EncryptionMaterial {
    pub fn new(passphrase: &[u8], salt: &[u8]) -> Result<Self> {
        let extended = derive_extended_key(passphrase, salt)?;
        let cipher = build_cipher(extended.as_slice())?;
        let nonce = new_nonce(cipher.nonce_size())?;
        Ok(Self { cipher, nonce })
    }
}

/// Payload digest written to the index: base32 SHA-1 of the original body.
pub fn content_digest(bytes: &[u8]) -> String {
    data_encoding::BASE32.encode(&Sha1::digest(bytes))
}
