use std::time::Duration;

use serde::{Deserialize, Serialize};
use zeroize::ZeroizeOnDrop;

use crate::crypto::{AAD_LEN, DIGEST_LEN, NONCE_LEN, SALT_LEN};
use crate::error::{Error, Result};

pub const MIN_VIEWS: u32 = 1;
pub const MAX_VIEWS: u32 = 9;

/// The persisted unit: metadata plus AEAD-sealed payload for one secret.
/// All metadata is plaintext so the background sweep can evict without
/// decrypting. For file secrets the ciphertext holds JSON [`FileMeta`] and
/// the sealed file bytes live in the companion blob store under the same id.
#[derive(Debug, Clone, Serialize, Deserialize, ZeroizeOnDrop)]
pub struct SecretRecord {
    /// 16-char alphanumeric identifier; immutable and never reused.
    pub id: String,
    /// AEAD ciphertext (payload + tag).
    pub ciphertext: Vec<u8>,
    /// SHA-256 over `salt || credential`; the credential itself is never stored.
    pub credential_digest: [u8; DIGEST_LEN],
    /// Per-record random KDF salt.
    pub salt: [u8; SALT_LEN],
    /// Per-record random AEAD nonce.
    pub nonce: [u8; NONCE_LEN],
    /// Per-record random associated data bound into the AEAD tag.
    pub aad: [u8; AAD_LEN],
    /// Remaining authorized views; `None` means bounded by TTL only.
    pub remaining_views: Option<u32>,
    /// Absolute expiry (Unix seconds); `None` means bounded by views only.
    pub expires_at: Option<i64>,
    /// Unix timestamp (seconds) when the record was created.
    pub created_at: i64,
    /// Whether a companion blob must be fetched (and deleted) on view.
    pub is_file: bool,
}

impl SecretRecord {
    /// True once the TTL has passed or the view counter has hit zero.
    /// A record with zero remaining views is never observable as active,
    /// even if its physical deletion is still in flight.
    pub fn is_expired(&self, now: i64) -> bool {
        if let Some(exp) = self.expires_at {
            if now >= exp {
                return true;
            }
        }
        self.remaining_views == Some(0)
    }
}

/// Gate for which bound combinations a creation request must carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BoundsPolicy {
    /// Every secret carries both a view count and a TTL (the default).
    #[default]
    RequireBoth,
    /// Either bound alone is acceptable.
    AllowEither,
}

/// Self-destruction bounds for a new secret, as a tagged union so that a
/// record with neither bound is unrepresentable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bounds {
    Views(u32),
    Ttl(Duration),
    Both { views: u32, ttl: Duration },
}

impl Bounds {
    pub fn validate(&self, policy: BoundsPolicy) -> Result<()> {
        if policy == BoundsPolicy::RequireBoth && !matches!(self, Bounds::Both { .. }) {
            return Err(Error::Validation(
                "both a view count and a ttl are required".into(),
            ));
        }
        if let Some(views) = self.views() {
            if !(MIN_VIEWS..=MAX_VIEWS).contains(&views) {
                return Err(Error::Validation(format!(
                    "view count must be between {MIN_VIEWS} and {MAX_VIEWS}"
                )));
            }
        }
        Ok(())
    }

    pub fn views(&self) -> Option<u32> {
        match self {
            Bounds::Views(v) | Bounds::Both { views: v, .. } => Some(*v),
            Bounds::Ttl(_) => None,
        }
    }

    /// Absolute expiry derived from the TTL, relative to `now`.
    pub fn expires_at(&self, now: i64) -> Option<i64> {
        match self {
            Bounds::Ttl(ttl) | Bounds::Both { ttl, .. } => Some(now + ttl.as_secs() as i64),
            Bounds::Views(_) => None,
        }
    }
}

/// Declared name and type of a file secret; JSON-encoded, then sealed as the
/// record ciphertext.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMeta {
    pub file_name: String,
    pub content_type: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto;

    fn record(remaining_views: Option<u32>, expires_at: Option<i64>) -> SecretRecord {
        SecretRecord {
            id: "abcdefgh12345678".into(),
            ciphertext: vec![0u8; 32],
            credential_digest: [0u8; DIGEST_LEN],
            salt: crypto::rand_bytes(),
            nonce: crypto::rand_bytes(),
            aad: crypto::rand_bytes(),
            remaining_views,
            expires_at,
            created_at: 1000,
            is_file: false,
        }
    }

    #[test]
    fn expiry_by_time_and_views() {
        assert!(record(Some(2), Some(500)).is_expired(1000));
        assert!(!record(Some(2), Some(2000)).is_expired(1000));
        assert!(record(Some(0), None).is_expired(1000));
        assert!(!record(None, Some(2000)).is_expired(1000));
    }

    #[test]
    fn strict_policy_requires_both_bounds() {
        let both = Bounds::Both {
            views: 3,
            ttl: Duration::from_secs(60),
        };
        assert!(both.validate(BoundsPolicy::RequireBoth).is_ok());
        assert!(Bounds::Views(3).validate(BoundsPolicy::RequireBoth).is_err());
        assert!(Bounds::Ttl(Duration::from_secs(60))
            .validate(BoundsPolicy::RequireBoth)
            .is_err());
    }

    #[test]
    fn relaxed_policy_accepts_either_bound() {
        assert!(Bounds::Views(1).validate(BoundsPolicy::AllowEither).is_ok());
        assert!(Bounds::Ttl(Duration::from_secs(60))
            .validate(BoundsPolicy::AllowEither)
            .is_ok());
    }

    #[test]
    fn view_count_range_enforced() {
        assert!(Bounds::Views(0).validate(BoundsPolicy::AllowEither).is_err());
        assert!(Bounds::Views(10).validate(BoundsPolicy::AllowEither).is_err());
        assert!(Bounds::Views(9).validate(BoundsPolicy::AllowEither).is_ok());
    }

    #[test]
    fn expires_at_is_relative_to_now() {
        let b = Bounds::Both {
            views: 1,
            ttl: Duration::from_secs(3600),
        };
        assert_eq!(b.expires_at(1000), Some(4600));
        assert_eq!(Bounds::Views(1).expires_at(1000), None);
    }
}
