pub mod local;
pub mod memory;

use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;

use crate::error::Result;
use crate::model::SecretRecord;

pub use local::{LocalBlobStore, LocalStore};
pub use memory::MemoryStore;

/// Seconds since the Unix epoch.
pub(crate) fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

/// Metadata persistence contract implemented by every backend.
///
/// Guarantees each adapter must uphold regardless of its native mechanism:
/// - `store` never silently overwrites an existing id.
/// - `get` treats an expired-but-not-yet-swept record as `NotFound`; expiry
///   is enforced at read time even when physical deletion is deferred to a
///   background sweep.
/// - `update_view_count` is conditional: the stored counter must equal
///   `new_count + 1` or the call fails with `Conflict`, so two concurrent
///   views of a one-view record cannot both win.
#[async_trait]
pub trait SecretStore: Send + Sync {
    async fn store(&self, record: &SecretRecord) -> Result<()>;

    async fn get(&self, id: &str) -> Result<SecretRecord>;

    async fn update_view_count(&self, id: &str, new_count: u32) -> Result<()>;

    /// Idempotent: deleting an already-absent id is not an error.
    async fn delete(&self, id: &str) -> Result<()>;
}

/// Companion blob persistence for file secrets, keyed by the record id.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn store_blob(&self, id: &str, data: &[u8]) -> Result<()>;

    async fn get_blob(&self, id: &str) -> Result<Vec<u8>>;

    /// Idempotent: deleting an already-absent blob is not an error.
    async fn delete_blob(&self, id: &str) -> Result<()>;
}
