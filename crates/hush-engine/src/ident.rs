use rand::rngs::OsRng;
use rand::Rng;

/// Fixed identifier length; 62^16 keyspace makes birthday collisions
/// negligible at expected record volumes, so ids are not checked for
/// collisions at generation time (the store rejects duplicates instead).
pub const ID_LEN: usize = 16;
pub const CREDENTIAL_LEN: usize = 32;

const ALPHANUMERIC: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
const PUNCTUATION: &[u8] = b"!#$%&*+-=?@_~";

/// URL-safe random identifier for a new secret.
pub fn new_id() -> String {
    rand_string(ID_LEN, true)
}

/// Random decryption credential, shown exactly once to the producer.
/// Punctuation raises the per-character entropy; the credential travels out
/// of band, so it does not need to be URL-safe.
pub fn new_credential() -> String {
    rand_string(CREDENTIAL_LEN, false)
}

/// Uniform random string over the alphanumeric alphabet, optionally extended
/// with punctuation when `url_safe` is false.
pub fn rand_string(length: usize, url_safe: bool) -> String {
    let mut alphabet = ALPHANUMERIC.to_vec();
    if !url_safe {
        alphabet.extend_from_slice(PUNCTUATION);
    }
    let mut out = String::with_capacity(length);
    for _ in 0..length {
        // gen_range avoids the modulo bias a naive `next_u32 % len` would add.
        let idx = OsRng.gen_range(0..alphabet.len());
        out.push(alphabet[idx] as char);
    }
    out
}
