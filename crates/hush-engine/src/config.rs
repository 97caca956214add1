use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::error::{Error, Result};
use crate::lifecycle::Lifecycle;
use crate::model::{Bounds, BoundsPolicy};
use crate::store::{BlobStore, LocalBlobStore, LocalStore, MemoryStore, SecretStore};

pub const DEFAULT_TTL_DAYS: u64 = 7;

/// Engine configuration, resolved from `HUSH_*` environment variables with
/// sensible fallbacks.
pub struct EngineConfig {
    /// Data directory for the redb file and blob directory (`HUSH_DATA_DIR`).
    /// Unset selects the in-memory backend.
    pub data_dir: Option<PathBuf>,
    /// Default TTL for callers that do not pick one (`HUSH_TTL_DAYS`).
    pub default_ttl: Duration,
    /// Background expiry sweep interval (`HUSH_SWEEP_INTERVAL_SECS`).
    pub sweep_interval: Duration,
    /// Per-backend-call deadline (`HUSH_OP_TIMEOUT_MS`).
    pub op_timeout: Duration,
    /// Set `HUSH_ALLOW_SINGLE_BOUND=true` to accept secrets bounded by only
    /// a view count or only a TTL.
    pub policy: BoundsPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            data_dir: std::env::var("HUSH_DATA_DIR").ok().map(PathBuf::from),
            default_ttl: Duration::from_secs(env_u64("HUSH_TTL_DAYS", DEFAULT_TTL_DAYS) * 86400),
            sweep_interval: Duration::from_secs(env_u64("HUSH_SWEEP_INTERVAL_SECS", 300)),
            op_timeout: Duration::from_millis(env_u64("HUSH_OP_TIMEOUT_MS", 5000)),
            policy: if env_flag("HUSH_ALLOW_SINGLE_BOUND") {
                BoundsPolicy::AllowEither
            } else {
                BoundsPolicy::RequireBoth
            },
        }
    }
}

impl EngineConfig {
    /// Bounds for callers that only pick a view count: the configured
    /// default TTL fills in the time bound, satisfying the strict policy.
    pub fn default_bounds(&self, views: u32) -> Bounds {
        Bounds::Both {
            views,
            ttl: self.default_ttl,
        }
    }
}

fn env_u64(name: &str, default: u64) -> u64 {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_flag(name: &str) -> bool {
    std::env::var(name)
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

/// Select and construct the backend pair. With a data directory configured
/// this is redb + filesystem blobs; otherwise the in-process store. Spawns
/// the expiry sweep, so it must run inside a Tokio runtime.
pub fn build_stores(cfg: &EngineConfig) -> Result<(Arc<dyn SecretStore>, Arc<dyn BlobStore>)> {
    match &cfg.data_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir).map_err(Error::backend)?;
            let secrets = LocalStore::open(&dir.join("secrets.redb"))?;
            let blobs: Arc<dyn BlobStore> = Arc::new(LocalBlobStore::open(dir)?);
            secrets
                .clone()
                .spawn_sweep(cfg.sweep_interval, Arc::clone(&blobs));
            info!(data_dir = %dir.display(), "using local storage (redb + filesystem blobs)");
            Ok((Arc::new(secrets), blobs))
        }
        None => {
            let store = MemoryStore::new();
            store.clone().spawn_sweep(cfg.sweep_interval);
            info!("no data directory configured, using in-memory storage");
            Ok((Arc::new(store.clone()), Arc::new(store)))
        }
    }
}

/// Convenience constructor: backend pair plus lifecycle engine in one call.
pub fn build_lifecycle(cfg: &EngineConfig) -> Result<Lifecycle> {
    let (secrets, blobs) = build_stores(cfg)?;
    Ok(Lifecycle::new(secrets, blobs, cfg.policy, cfg.op_timeout))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Bounds;
    use tempfile::tempdir;

    #[tokio::test]
    async fn local_backend_round_trip() {
        let dir = tempdir().unwrap();
        let cfg = EngineConfig {
            data_dir: Some(dir.path().to_owned()),
            default_ttl: Duration::from_secs(7 * 86400),
            sweep_interval: Duration::from_secs(300),
            op_timeout: Duration::from_secs(5),
            policy: BoundsPolicy::RequireBoth,
        };
        let lc = build_lifecycle(&cfg).unwrap();

        let created = lc
            .create(
                b"persisted",
                Bounds::Both {
                    views: 1,
                    ttl: Duration::from_secs(3600),
                },
            )
            .await
            .unwrap();
        let got = lc.consume(&created.id, &created.credential).await.unwrap();
        assert_eq!(got.data, b"persisted");
    }

    #[test]
    fn default_bounds_combine_views_with_configured_ttl() {
        let cfg = EngineConfig {
            data_dir: None,
            default_ttl: Duration::from_secs(7 * 86400),
            sweep_interval: Duration::from_secs(300),
            op_timeout: Duration::from_secs(5),
            policy: BoundsPolicy::RequireBoth,
        };
        let bounds = cfg.default_bounds(3);
        assert!(bounds.validate(cfg.policy).is_ok());
        assert_eq!(bounds.views(), Some(3));
    }

    #[tokio::test]
    async fn memory_backend_is_default_without_data_dir() {
        let cfg = EngineConfig {
            data_dir: None,
            default_ttl: Duration::from_secs(7 * 86400),
            sweep_interval: Duration::from_secs(300),
            op_timeout: Duration::from_secs(5),
            policy: BoundsPolicy::AllowEither,
        };
        let lc = build_lifecycle(&cfg).unwrap();
        let created = lc.create(b"ephemeral", Bounds::Views(1)).await.unwrap();
        assert_eq!(
            lc.consume(&created.id, &created.credential).await.unwrap().data,
            b"ephemeral"
        );
    }
}
