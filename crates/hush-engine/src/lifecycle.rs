use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::crypto::{self, DerivedKey};
use crate::error::{Error, Result};
use crate::ident;
use crate::model::{Bounds, BoundsPolicy, FileMeta, SecretRecord};
use crate::store::{unix_now, BlobStore, SecretStore};

/// Bounded retries of the read-decrement-or-delete sequence after losing a
/// compare-and-swap race; after the winner deletes the record the retry
/// observes NotFound.
const CONSUME_RETRIES: usize = 3;

/// Returned on creation; the only time the raw credential exists outside
/// client memory.
pub struct Created {
    pub id: String,
    pub credential: String,
}

/// A successfully consumed secret. `data` is the decrypted text payload, or
/// the decrypted file bytes when `file` carries the declared name and type.
#[derive(Debug)]
pub struct Consumed {
    pub data: Vec<u8>,
    pub file: Option<FileMeta>,
}

/// Orchestrates creation, consumption, and expiry of secret records — the
/// single place the "at most N views, at most T time" invariant is enforced.
/// Stateless per invocation aside from the shared backend handles, so
/// concurrent request handlers can share one clone each.
#[derive(Clone)]
pub struct Lifecycle {
    secrets: Arc<dyn SecretStore>,
    blobs: Arc<dyn BlobStore>,
    policy: BoundsPolicy,
    op_timeout: Duration,
}

impl Lifecycle {
    pub fn new(
        secrets: Arc<dyn SecretStore>,
        blobs: Arc<dyn BlobStore>,
        policy: BoundsPolicy,
        op_timeout: Duration,
    ) -> Self {
        Self {
            secrets,
            blobs,
            policy,
            op_timeout,
        }
    }

    /// Wrap a backend call in the configured deadline. A timed-out call is a
    /// transient failure and must not be assumed to have committed.
    async fn deadline<T>(&self, fut: impl Future<Output = Result<T>>) -> Result<T> {
        match tokio::time::timeout(self.op_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(Error::Backend("backend call exceeded deadline".into())),
        }
    }

    /// Create a text secret. Returns the record id and the freshly generated
    /// decryption credential.
    pub async fn create(&self, plaintext: &[u8], bounds: Bounds) -> Result<Created> {
        bounds.validate(self.policy)?;
        let (record, credential, _key) = seal_record(plaintext, bounds, false)?;
        let id = record.id.clone();
        self.deadline(self.secrets.store(&record)).await?;
        debug!(id = %id, "created secret");
        Ok(Created { id, credential })
    }

    /// Create a file secret: the sealed file bytes go to the blob store and
    /// the sealed JSON metadata becomes the record ciphertext, both under the
    /// same derived key. The blob is written first; if the metadata store
    /// fails the blob is cleaned up so no half-stored secret stays
    /// addressable.
    pub async fn create_file(
        &self,
        file_bytes: &[u8],
        file_name: &str,
        content_type: &str,
        bounds: Bounds,
    ) -> Result<Created> {
        bounds.validate(self.policy)?;
        // The companion blob is deleted on the first successful view, so a
        // file secret can only ever honor exactly one view.
        if bounds.views() != Some(1) {
            return Err(Error::Validation(
                "file secrets are limited to exactly one view".into(),
            ));
        }
        let meta = FileMeta {
            file_name: file_name.to_owned(),
            content_type: content_type.to_owned(),
        };
        let meta_json = serde_json::to_vec(&meta).map_err(|e| Error::Validation(e.to_string()))?;
        let (record, credential, key) = seal_record(&meta_json, bounds, true)?;

        // The blob carries its own nonce (prefixed) so the shared key is
        // never used twice under one nonce.
        let blob_nonce = crypto::rand_bytes::<{ crypto::NONCE_LEN }>();
        let sealed = crypto::seal(&key, &blob_nonce, &record.aad, file_bytes)?;
        let mut blob = Vec::with_capacity(crypto::NONCE_LEN + sealed.len());
        blob.extend_from_slice(&blob_nonce);
        blob.extend_from_slice(&sealed);

        self.deadline(self.blobs.store_blob(&record.id, &blob)).await?;
        if let Err(e) = self.deadline(self.secrets.store(&record)).await {
            if let Err(cleanup) = self.deadline(self.blobs.delete_blob(&record.id)).await {
                warn!(id = %record.id, error = %cleanup, "orphan blob cleanup failed");
            }
            return Err(e);
        }

        debug!(id = %record.id, "created file secret");
        Ok(Created {
            id: record.id.clone(),
            credential,
        })
    }

    /// Consume (view) a secret. Exactly one caller succeeds per remaining
    /// view; once the counter reaches zero the record and its companion blob
    /// are gone. Credential and decryption failures are deliberately
    /// indistinguishable from a missing record.
    pub async fn consume(&self, id: &str, credential: &str) -> Result<Consumed> {
        let mut attempts = 0;
        loop {
            return match self.consume_once(id, credential).await {
                Err(Error::Conflict) if attempts < CONSUME_RETRIES => {
                    attempts += 1;
                    continue;
                }
                // Retry exhaustion under contention is transient: views may
                // well remain, so the caller must not be told the secret is
                // gone. A deleted record surfaces as NotFound on the next
                // get, not here.
                Err(Error::Conflict) => {
                    Err(Error::Backend("secret is contended, retry".into()))
                }
                Err(Error::Authentication) => {
                    debug!(id, "credential rejected");
                    Err(Error::NotFound)
                }
                Err(Error::Corrupt) => {
                    warn!(id, "stored record failed structural decode");
                    Err(Error::NotFound)
                }
                other => other,
            };
        }
    }

    async fn consume_once(&self, id: &str, credential: &str) -> Result<Consumed> {
        let record = self.deadline(self.secrets.get(id)).await?;

        // A failed credential check consumes nothing.
        let submitted = crypto::credential_digest(credential, &record.salt);
        if !crypto::digest_matches(&submitted, &record.credential_digest) {
            return Err(Error::Authentication);
        }

        let key = crypto::derive_key(credential, &record.salt)?;
        let data = crypto::open(&key, &record.nonce, &record.aad, &record.ciphertext)?;

        // Claim the view before touching anything irreversible; a lost
        // compare-and-swap means a concurrent consumer won this view.
        let exhausted = match record.remaining_views {
            Some(n) => {
                self.deadline(self.secrets.update_view_count(id, n - 1)).await?;
                n == 1
            }
            None => false,
        };

        let file = if record.is_file {
            let payload = self.open_blob(id, &key, &record.aad).await?;
            let meta: FileMeta = serde_json::from_slice(&data).map_err(|_| Error::Corrupt)?;
            Some((meta, payload))
        } else {
            None
        };

        if exhausted {
            // Metadata deletion is the authoritative "gone" signal.
            self.deadline(self.secrets.delete(id)).await?;
            debug!(id, "burned after final view");
        }

        match file {
            Some((meta, payload)) => Ok(Consumed {
                data: payload,
                file: Some(meta),
            }),
            None => Ok(Consumed { data, file: None }),
        }
    }

    /// Fetch, decrypt, and then delete the companion blob for a file secret.
    async fn open_blob(&self, id: &str, key: &DerivedKey, aad: &[u8]) -> Result<Vec<u8>> {
        let blob = self.deadline(self.blobs.get_blob(id)).await?;
        if blob.len() < crypto::NONCE_LEN {
            return Err(Error::Corrupt);
        }
        let (nonce_bytes, sealed) = blob.split_at(crypto::NONCE_LEN);
        let mut nonce = [0u8; crypto::NONCE_LEN];
        nonce.copy_from_slice(nonce_bytes);
        let payload = crypto::open(key, &nonce, aad, sealed)?;

        if let Err(e) = self.deadline(self.blobs.delete_blob(id)).await {
            warn!(id, error = %e, "companion blob delete failed");
        }
        Ok(payload)
    }

    /// Return the record's KDF salt without counting a view, so a client can
    /// compute its credential digest out of band.
    pub async fn fetch_salt(&self, id: &str) -> Result<[u8; crypto::SALT_LEN]> {
        let record = self.deadline(self.secrets.get(id)).await?;
        Ok(record.salt)
    }
}

/// Generate identity and key material for a new record and seal `payload`.
fn seal_record(
    payload: &[u8],
    bounds: Bounds,
    is_file: bool,
) -> Result<(SecretRecord, String, DerivedKey)> {
    let id = ident::new_id();
    let credential = ident::new_credential();
    let salt = crypto::rand_bytes::<{ crypto::SALT_LEN }>();
    let nonce = crypto::rand_bytes::<{ crypto::NONCE_LEN }>();
    let aad = crypto::rand_bytes::<{ crypto::AAD_LEN }>();

    let key = crypto::derive_key(&credential, &salt)?;
    let ciphertext = crypto::seal(&key, &nonce, &aad, payload)?;

    let now = unix_now();
    let record = SecretRecord {
        credential_digest: crypto::credential_digest(&credential, &salt),
        id,
        ciphertext,
        salt,
        nonce,
        aad,
        remaining_views: bounds.views(),
        expires_at: bounds.expires_at(now),
        created_at: now,
        is_file,
    };
    Ok((record, credential, key))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn engine(policy: BoundsPolicy) -> (Lifecycle, MemoryStore) {
        let store = MemoryStore::new();
        let lifecycle = Lifecycle::new(
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            policy,
            Duration::from_secs(5),
        );
        (lifecycle, store)
    }

    fn week() -> Duration {
        Duration::from_secs(7 * 86400)
    }

    #[tokio::test]
    async fn text_secret_exhausts_after_n_views() {
        let (lc, _) = engine(BoundsPolicy::RequireBoth);
        let created = lc
            .create(b"hello", Bounds::Both { views: 2, ttl: week() })
            .await
            .unwrap();

        for _ in 0..2 {
            let got = lc.consume(&created.id, &created.credential).await.unwrap();
            assert_eq!(got.data, b"hello");
            assert!(got.file.is_none());
        }
        assert!(matches!(
            lc.consume(&created.id, &created.credential).await,
            Err(Error::NotFound)
        ));
    }

    #[tokio::test]
    async fn wrong_credential_does_not_consume() {
        let (lc, _) = engine(BoundsPolicy::RequireBoth);
        let created = lc
            .create(b"guarded", Bounds::Both { views: 1, ttl: week() })
            .await
            .unwrap();

        // Mismatch surfaces as NotFound and leaves the view intact.
        assert!(matches!(
            lc.consume(&created.id, "not-the-credential").await,
            Err(Error::NotFound)
        ));
        let got = lc.consume(&created.id, &created.credential).await.unwrap();
        assert_eq!(got.data, b"guarded");
    }

    #[tokio::test]
    async fn ttl_expiry_wins_over_remaining_views() {
        let (lc, _) = engine(BoundsPolicy::RequireBoth);
        let created = lc
            .create(
                b"short-lived",
                Bounds::Both {
                    views: 5,
                    ttl: Duration::ZERO,
                },
            )
            .await
            .unwrap();
        assert!(matches!(
            lc.consume(&created.id, &created.credential).await,
            Err(Error::NotFound)
        ));
    }

    #[tokio::test]
    async fn ttl_only_secret_survives_views() {
        let (lc, _) = engine(BoundsPolicy::AllowEither);
        let created = lc.create(b"durable", Bounds::Ttl(week())).await.unwrap();
        for _ in 0..3 {
            let got = lc.consume(&created.id, &created.credential).await.unwrap();
            assert_eq!(got.data, b"durable");
        }
    }

    #[tokio::test]
    async fn fetch_salt_never_consumes() {
        let (lc, _) = engine(BoundsPolicy::RequireBoth);
        let created = lc
            .create(b"salty", Bounds::Both { views: 1, ttl: week() })
            .await
            .unwrap();

        let a = lc.fetch_salt(&created.id).await.unwrap();
        let b = lc.fetch_salt(&created.id).await.unwrap();
        assert_eq!(a, b);

        let got = lc.consume(&created.id, &created.credential).await.unwrap();
        assert_eq!(got.data, b"salty");
    }

    #[tokio::test]
    async fn file_secret_round_trip_deletes_blob() {
        let (lc, store) = engine(BoundsPolicy::RequireBoth);
        let created = lc
            .create_file(
                &[1, 2, 3],
                "a.txt",
                "text/plain",
                Bounds::Both { views: 1, ttl: week() },
            )
            .await
            .unwrap();

        let got = lc.consume(&created.id, &created.credential).await.unwrap();
        assert_eq!(got.data, vec![1, 2, 3]);
        let meta = got.file.unwrap();
        assert_eq!(meta.file_name, "a.txt");
        assert_eq!(meta.content_type, "text/plain");

        use crate::store::BlobStore;
        assert!(matches!(store.get_blob(&created.id).await, Err(Error::NotFound)));
        assert!(matches!(
            lc.consume(&created.id, &created.credential).await,
            Err(Error::NotFound)
        ));
    }

    #[tokio::test]
    async fn file_secret_rejects_bounds_promising_extra_views() {
        let (lc, _) = engine(BoundsPolicy::AllowEither);
        // More than one view can never be honored once the blob is gone.
        assert!(matches!(
            lc.create_file(&[1, 2, 3], "a.txt", "text/plain", Bounds::Both { views: 2, ttl: week() })
                .await,
            Err(Error::Validation(_))
        ));
        // TTL-only file secrets promise unbounded views; same problem.
        assert!(matches!(
            lc.create_file(&[1, 2, 3], "a.txt", "text/plain", Bounds::Ttl(week())).await,
            Err(Error::Validation(_))
        ));
    }

    /// Delegates to a real store but always loses the view-count race,
    /// simulating sustained contention on a multi-view record.
    struct ContendedStore {
        inner: MemoryStore,
    }

    #[async_trait::async_trait]
    impl crate::store::SecretStore for ContendedStore {
        async fn store(&self, record: &SecretRecord) -> Result<()> {
            self.inner.store(record).await
        }

        async fn get(&self, id: &str) -> Result<SecretRecord> {
            self.inner.get(id).await
        }

        async fn update_view_count(&self, _id: &str, _new_count: u32) -> Result<()> {
            Err(Error::Conflict)
        }

        async fn delete(&self, id: &str) -> Result<()> {
            self.inner.delete(id).await
        }
    }

    #[tokio::test]
    async fn lost_view_races_surface_as_retryable_not_gone() {
        let backing = MemoryStore::new();
        let lc = Lifecycle::new(
            Arc::new(backing.clone()),
            Arc::new(backing.clone()),
            BoundsPolicy::RequireBoth,
            Duration::from_secs(5),
        );
        let created = lc
            .create(b"contended", Bounds::Both { views: 9, ttl: week() })
            .await
            .unwrap();

        let contended = Lifecycle::new(
            Arc::new(ContendedStore { inner: backing.clone() }),
            Arc::new(backing),
            BoundsPolicy::RequireBoth,
            Duration::from_secs(5),
        );
        let err = contended
            .consume(&created.id, &created.credential)
            .await
            .unwrap_err();
        assert!(err.is_retryable());

        // The views survive for an uncontended consumer.
        let got = lc.consume(&created.id, &created.credential).await.unwrap();
        assert_eq!(got.data, b"contended");
    }

    #[tokio::test]
    async fn strict_policy_rejects_single_bound() {
        let (lc, _) = engine(BoundsPolicy::RequireBoth);
        assert!(matches!(
            lc.create(b"x", Bounds::Views(1)).await,
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            lc.create(b"x", Bounds::Ttl(week())).await,
            Err(Error::Validation(_))
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn one_view_record_yields_exactly_one_success() {
        let (lc, _) = engine(BoundsPolicy::RequireBoth);
        let created = lc
            .create(b"once", Bounds::Both { views: 1, ttl: week() })
            .await
            .unwrap();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let lc = lc.clone();
            let id = created.id.clone();
            let credential = created.credential.clone();
            handles.push(tokio::spawn(async move {
                lc.consume(&id, &credential).await.is_ok()
            }));
        }

        let mut successes = 0;
        for handle in handles {
            if handle.await.unwrap() {
                successes += 1;
            }
        }
        assert_eq!(successes, 1);
    }
}
