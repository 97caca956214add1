use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use redb::{Database, ReadableTable, TableDefinition};
use tokio::time;
use tracing::{debug, info, warn};

use super::{unix_now, BlobStore, SecretStore};
use crate::error::{Error, Result};
use crate::model::SecretRecord;

const SECRETS: TableDefinition<&str, &[u8]> = TableDefinition::new("secrets");

/// Single-node metadata adapter backed by redb. The file engine has no
/// native TTL, so expiry is emulated: an explicit timestamp comparison on
/// every read plus a periodic sweep for physical deletion. Each mutation
/// runs in one write transaction, which is what provides the conditional
/// view-count guarantee.
#[derive(Clone)]
pub struct LocalStore {
    db: Arc<Database>,
}

impl LocalStore {
    /// Open (or create) the database at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        let db = Database::create(path).map_err(Error::backend)?;

        let write_txn = db.begin_write().map_err(Error::backend)?;
        write_txn.open_table(SECRETS).map_err(Error::backend)?;
        write_txn.commit().map_err(Error::backend)?;

        info!(path = %path.display(), "opened local secret store");
        Ok(Self { db: Arc::new(db) })
    }

    /// Remove all expired or exhausted records. Returns the evicted ids so
    /// the caller can cascade to companion blobs.
    pub fn purge_expired(&self) -> Result<Vec<String>> {
        let now = unix_now();

        // Collect expired ids in a read pass first.
        let expired: Vec<String> = {
            let read_txn = self.db.begin_read().map_err(Error::backend)?;
            let table = read_txn.open_table(SECRETS).map_err(Error::backend)?;
            let mut ids = Vec::new();
            for item in table.iter().map_err(Error::backend)? {
                let (id, value) = item.map_err(Error::backend)?;
                let record = decode(value.value())?;
                if record.is_expired(now) {
                    ids.push(id.value().to_owned());
                }
            }
            ids
        };

        if expired.is_empty() {
            return Ok(vec![]);
        }

        let write_txn = self.db.begin_write().map_err(Error::backend)?;
        {
            let mut table = write_txn.open_table(SECRETS).map_err(Error::backend)?;
            for id in &expired {
                table.remove(id.as_str()).map_err(Error::backend)?;
            }
        }
        write_txn.commit().map_err(Error::backend)?;

        info!(removed = expired.len(), "swept expired secrets");
        Ok(expired)
    }

    /// Spawn a background Tokio task that purges expired records every
    /// `interval`, cascading to companion blobs. Sweep failures are logged
    /// and retried on the next interval, never fatal.
    pub fn spawn_sweep(self, interval: Duration, blobs: Arc<dyn BlobStore>) {
        tokio::spawn(async move {
            let mut ticker = time::interval(interval);
            ticker.tick().await; // skip first immediate tick
            loop {
                ticker.tick().await;
                match self.purge_expired() {
                    Ok(ids) => {
                        for id in &ids {
                            // Idempotent for records that never had a blob.
                            if let Err(e) = blobs.delete_blob(id).await {
                                warn!(id = %id, error = %e, "blob cascade failed");
                            }
                        }
                    }
                    Err(e) => warn!(error = %e, "background sweep error"),
                }
            }
        });
    }
}

#[async_trait]
impl SecretStore for LocalStore {
    async fn store(&self, record: &SecretRecord) -> Result<()> {
        let bytes = encode(record)?;
        let write_txn = self.db.begin_write().map_err(Error::backend)?;
        {
            let mut table = write_txn.open_table(SECRETS).map_err(Error::backend)?;
            let exists = table
                .get(record.id.as_str())
                .map_err(Error::backend)?
                .is_some();
            if exists {
                return Err(Error::Duplicate);
            }
            table
                .insert(record.id.as_str(), bytes.as_slice())
                .map_err(Error::backend)?;
        }
        write_txn.commit().map_err(Error::backend)?;

        debug!(id = %record.id, "stored secret");
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<SecretRecord> {
        let now = unix_now();
        let read_txn = self.db.begin_read().map_err(Error::backend)?;
        let table = read_txn.open_table(SECRETS).map_err(Error::backend)?;

        let raw: Option<Vec<u8>> = table
            .get(id)
            .map_err(Error::backend)?
            .map(|guard| guard.value().to_vec());

        match raw {
            None => Err(Error::NotFound),
            Some(bytes) => {
                let record = decode(&bytes)?;
                if record.is_expired(now) {
                    // Physical deletion is left to the sweep.
                    return Err(Error::NotFound);
                }
                Ok(record)
            }
        }
    }

    async fn update_view_count(&self, id: &str, new_count: u32) -> Result<()> {
        let now = unix_now();
        let write_txn = self.db.begin_write().map_err(Error::backend)?;
        let result = {
            let mut table = write_txn.open_table(SECRETS).map_err(Error::backend)?;

            // Clone the raw bytes so the access guard drops before mutation.
            let raw: Option<Vec<u8>> = table
                .get(id)
                .map_err(Error::backend)?
                .map(|guard| guard.value().to_vec());

            match raw {
                None => Err(Error::NotFound),
                Some(bytes) => {
                    let mut record = decode(&bytes)?;
                    if record.is_expired(now) {
                        table.remove(id).map_err(Error::backend)?;
                        debug!(id, "lazy-evicted expired secret");
                        Err(Error::NotFound)
                    } else if record.remaining_views == Some(new_count + 1) {
                        record.remaining_views = Some(new_count);
                        let updated = encode(&record)?;
                        table
                            .insert(id, updated.as_slice())
                            .map_err(Error::backend)?;
                        Ok(())
                    } else {
                        Err(Error::Conflict)
                    }
                }
            }
        };
        write_txn.commit().map_err(Error::backend)?;
        result
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let write_txn = self.db.begin_write().map_err(Error::backend)?;
        {
            let mut table = write_txn.open_table(SECRETS).map_err(Error::backend)?;
            table.remove(id).map_err(Error::backend)?;
        }
        write_txn.commit().map_err(Error::backend)?;
        Ok(())
    }
}

fn encode(record: &SecretRecord) -> Result<Vec<u8>> {
    bincode::serde::encode_to_vec(record, bincode::config::standard()).map_err(Error::backend)
}

fn decode(bytes: &[u8]) -> Result<SecretRecord> {
    let (record, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
        .map_err(|_| Error::Corrupt)?;
    Ok(record)
}

/// Companion blob adapter: one file per id under `<data_dir>/blobs/`.
#[derive(Clone)]
pub struct LocalBlobStore {
    dir: PathBuf,
}

impl LocalBlobStore {
    pub fn open(data_dir: &Path) -> Result<Self> {
        let dir = data_dir.join("blobs");
        std::fs::create_dir_all(&dir).map_err(Error::backend)?;
        info!(dir = %dir.display(), "opened local blob store");
        Ok(Self { dir })
    }

    /// Ids are alphanumeric by construction; anything else would allow the
    /// id to traverse outside the blob directory.
    fn blob_path(&self, id: &str) -> Result<PathBuf> {
        if id.is_empty() || !id.bytes().all(|b| b.is_ascii_alphanumeric()) {
            return Err(Error::Validation("invalid blob id".into()));
        }
        Ok(self.dir.join(id))
    }
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    async fn store_blob(&self, id: &str, data: &[u8]) -> Result<()> {
        let path = self.blob_path(id)?;
        std::fs::write(path, data).map_err(Error::backend)
    }

    async fn get_blob(&self, id: &str) -> Result<Vec<u8>> {
        let path = self.blob_path(id)?;
        match std::fs::read(path) {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(Error::NotFound),
            Err(e) => Err(Error::backend(e)),
        }
    }

    async fn delete_blob(&self, id: &str) -> Result<()> {
        let path = self.blob_path(id)?;
        match std::fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::backend(e)),
        }
    }
}
