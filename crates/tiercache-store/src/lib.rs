//! # tiercache-store: The Two Storage Tiers
//!
//! - [`LocalStore`]: fast local tier. Writes are atomic (temp file, fsync,
//!   rename) and every write reports the content checksum.
//! - [`ObjectStore`]: the port an S3-compatible client implements. The
//!   cache never authenticates; it is handed an already-scoped client.
//! - [`MemoryObjectStore`] and [`FsObjectStore`]: backends shipped with the
//!   crate, for tests and for running against a directory that emulates a
//!   bucket.
//! - [`RemoteStore`]: the remote tier as the cache sees it. Adds the key
//!   namespace, checksum metadata, per-call timeouts, and failure
//!   classification on top of an `ObjectStore`.
//!
//! Stores are stateless services. Which artifacts exist, and where, is
//! decided by the registry in `tiercache-cache`.

pub mod error;
pub mod fs;
pub mod local;
pub mod memory;
pub mod object;
pub mod remote;

pub use error::{LocalStoreError, TransferClass, TransferError};
pub use fs::FsObjectStore;
pub use local::{FileStat, LocalStore};
pub use memory::MemoryObjectStore;
pub use object::{BucketSettings, LifecycleRule, ListPage, ObjectStore, ObjectSummary, PutObject};
pub use remote::{
    BucketUsage, ObjectListing, RemoteStore, TypeUsage, UploadResult, DEFAULT_PRESIGN_TTL,
    META_CACHE_KEY, META_CHECKSUM,
};
