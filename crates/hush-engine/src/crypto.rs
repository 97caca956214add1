use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use constant_time_eq::constant_time_eq;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};
use zeroize::ZeroizeOnDrop;

use crate::error::{Error, Result};

pub const SALT_LEN: usize = 16;
pub const NONCE_LEN: usize = 12;
pub const AAD_LEN: usize = 16;
pub const DIGEST_LEN: usize = 32;
/// GCM authentication tag appended to every ciphertext.
pub const TAG_LEN: usize = 16;

// scrypt cost parameters: N = 2^15, r = 8, p = 1, 32-byte output.
// Fixed for every record — changing them invalidates existing records and is
// a breaking migration.
const SCRYPT_LOG_N: u8 = 15;
const SCRYPT_R: u32 = 8;
const SCRYPT_P: u32 = 1;

/// 32-byte encryption key derived from a credential via scrypt.
#[derive(ZeroizeOnDrop)]
pub struct DerivedKey([u8; 32]);

impl DerivedKey {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

/// Derive a 32-byte key from `credential` and a per-record `salt`.
///
/// Deliberately slow and memory-hard so offline brute-forcing of the
/// credential stays expensive. Every failure collapses to the same opaque
/// error to avoid oracle leakage.
pub fn derive_key(credential: &str, salt: &[u8; SALT_LEN]) -> Result<DerivedKey> {
    let params = scrypt::Params::new(SCRYPT_LOG_N, SCRYPT_R, SCRYPT_P, 32)
        .map_err(|_| Error::Authentication)?;
    let mut key = [0u8; 32];
    scrypt::scrypt(credential.as_bytes(), salt, &params, &mut key)
        .map_err(|_| Error::Authentication)?;
    Ok(DerivedKey(key))
}

/// AEAD-seal `plaintext` under `key`, binding `aad` into the tag.
/// Ciphertext length = plaintext length + [`TAG_LEN`].
pub fn seal(key: &DerivedKey, nonce: &[u8; NONCE_LEN], aad: &[u8], plaintext: &[u8]) -> Result<Vec<u8>> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_bytes()));
    cipher
        .encrypt(Nonce::from_slice(nonce), Payload { msg: plaintext, aad })
        .map_err(|_| Error::Authentication)
}

/// Open an AEAD-sealed ciphertext. Fails closed: any bit-flip in ciphertext,
/// nonce, or aad, or a wrong key, yields the opaque authentication error and
/// never partial plaintext.
pub fn open(key: &DerivedKey, nonce: &[u8; NONCE_LEN], aad: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_bytes()));
    cipher
        .decrypt(Nonce::from_slice(nonce), Payload { msg: ciphertext, aad })
        .map_err(|_| Error::Authentication)
}

/// One-way digest of the receiver's credential, persisted in place of the
/// credential itself: SHA-256 over `salt || credential`.
pub fn credential_digest(credential: &str, salt: &[u8; SALT_LEN]) -> [u8; DIGEST_LEN] {
    let mut hasher = Sha256::new();
    hasher.update(salt);
    hasher.update(credential.as_bytes());
    hasher.finalize().into()
}

/// Constant-time digest comparison; must not short-circuit on the first
/// differing byte. A stored digest of the wrong length fails closed.
pub fn digest_matches(submitted: &[u8; DIGEST_LEN], stored: &[u8]) -> bool {
    stored.len() == DIGEST_LEN && constant_time_eq(submitted, stored)
}

/// Fresh random bytes from the OS CSPRNG (salts, nonces, aad headers).
pub fn rand_bytes<const N: usize>() -> [u8; N] {
    let mut out = [0u8; N];
    OsRng.fill_bytes(&mut out);
    out
}
