//! Encrypted, self-destructing secrets.
//!
//! A sender seals a text or file secret under a freshly generated passphrase,
//! receives a random identifier, and hands both to the receiver out of band.
//! The receiver can decrypt the secret a bounded number of times before the
//! record is irreversibly deleted, or it expires after its TTL window,
//! whichever comes first.
//!
//! The [`Lifecycle`] engine enforces the consume-or-expire protocol on top of
//! two narrow storage traits ([`SecretStore`] and [`BlobStore`]) so that
//! heterogeneous backends stay interchangeable. Two adapters ship in-tree: an
//! in-process reference store and a redb + filesystem pair for single-node
//! deployments.

pub mod config;
pub mod crypto;
pub mod error;
pub mod ident;
pub mod lifecycle;
pub mod model;
pub mod store;

pub use config::{build_lifecycle, build_stores, EngineConfig};
pub use error::{Error, Result};
pub use lifecycle::{Consumed, Created, Lifecycle};
pub use model::{Bounds, BoundsPolicy, FileMeta, SecretRecord};
pub use store::{BlobStore, LocalBlobStore, LocalStore, MemoryStore, SecretStore};
