use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time;
use tracing::debug;

use super::{unix_now, BlobStore, SecretStore};
use crate::error::{Error, Result};
use crate::model::SecretRecord;

/// In-process reference adapter: records and blobs behind one mutex, so the
/// read-decrement-or-delete sequence is trivially atomic. Doubles as the
/// substitutable backend for tests.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

#[derive(Default)]
struct Inner {
    records: HashMap<String, SecretRecord>,
    blobs: HashMap<String, Vec<u8>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Remove all expired or exhausted records and their companion blobs.
    /// Returns the evicted ids.
    pub fn purge_expired(&self) -> Vec<String> {
        let now = unix_now();
        let mut inner = self.lock();
        let expired: Vec<String> = inner
            .records
            .iter()
            .filter(|(_, r)| r.is_expired(now))
            .map(|(id, _)| id.clone())
            .collect();
        for id in &expired {
            inner.records.remove(id);
            inner.blobs.remove(id);
        }
        expired
    }

    /// Spawn a background Tokio task that purges expired records every
    /// `interval`.
    pub fn spawn_sweep(self, interval: Duration) {
        tokio::spawn(async move {
            let mut ticker = time::interval(interval);
            ticker.tick().await; // skip first immediate tick
            loop {
                ticker.tick().await;
                let purged = self.purge_expired();
                if !purged.is_empty() {
                    debug!(purged = purged.len(), "swept expired secrets");
                }
            }
        });
    }
}

#[async_trait]
impl SecretStore for MemoryStore {
    async fn store(&self, record: &SecretRecord) -> Result<()> {
        let mut inner = self.lock();
        if inner.records.contains_key(&record.id) {
            return Err(Error::Duplicate);
        }
        inner.records.insert(record.id.clone(), record.clone());
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<SecretRecord> {
        let now = unix_now();
        let mut inner = self.lock();
        let record = match inner.records.get(id) {
            Some(r) => r.clone(),
            None => return Err(Error::NotFound),
        };
        if record.is_expired(now) {
            inner.records.remove(id);
            inner.blobs.remove(id);
            debug!(id, "lazy-evicted expired secret");
            return Err(Error::NotFound);
        }
        Ok(record)
    }

    async fn update_view_count(&self, id: &str, new_count: u32) -> Result<()> {
        let now = unix_now();
        let mut inner = self.lock();
        let expired = match inner.records.get(id) {
            Some(r) => r.is_expired(now),
            None => return Err(Error::NotFound),
        };
        if expired {
            inner.records.remove(id);
            inner.blobs.remove(id);
            debug!(id, "lazy-evicted expired secret");
            return Err(Error::NotFound);
        }
        let record = inner.records.get_mut(id).ok_or(Error::NotFound)?;
        match record.remaining_views {
            Some(current) if current == new_count + 1 => {
                record.remaining_views = Some(new_count);
                Ok(())
            }
            _ => Err(Error::Conflict),
        }
    }

    async fn delete(&self, id: &str) -> Result<()> {
        self.lock().records.remove(id);
        Ok(())
    }
}

#[async_trait]
impl BlobStore for MemoryStore {
    async fn store_blob(&self, id: &str, data: &[u8]) -> Result<()> {
        self.lock().blobs.insert(id.to_owned(), data.to_vec());
        Ok(())
    }

    async fn get_blob(&self, id: &str) -> Result<Vec<u8>> {
        self.lock().blobs.get(id).cloned().ok_or(Error::NotFound)
    }

    async fn delete_blob(&self, id: &str) -> Result<()> {
        self.lock().blobs.remove(id);
        Ok(())
    }
}
