//! # tiercache-cache: The Tiered Asset Cache
//!
//! Keeps generated artifacts reusable across sessions and campaigns by
//! tracking them in a persisted registry and moving them between a local
//! tier and a remote object-storage tier.
//!
//! ## Components
//!
//! - [`MetadataRegistry`]: key → entry index, persisted atomically after
//!   every mutation batch. The only mutable shared state; all mutations are
//!   serialized behind one lock.
//! - [`TierManager`]: promote, demote and recency-based rebalance.
//! - [`MigrationPlanner`]: plan, execute and validate bulk uploads.
//! - [`AssetCache`]: the facade holding all of the above.
//!
//! ## Error Model
//!
//! Single-artifact operations return [`CacheError`]. Bulk operations
//! (batch download, migration, validation, rebalance, clear) return reports
//! that carry every per-item failure with its key and classification.

pub mod cache;
pub mod error;
pub mod migration;
pub mod registry;
pub mod tier;

pub use cache::{
    AssetCache, CacheStats, ClearFailure, ClearReport, DiscoveredAsset, DiscoveryReport,
    DownloadResult,
};
pub use error::{CacheError, MismatchKind};
pub use migration::{
    ChecksumMismatch, FailedItem, MigrationPlan, MigrationPlanner, MigrationResult, PlanItem,
    SizeMismatch, ValidationReport,
};
pub use registry::{
    Counter, Counters, EntryCursor, EntryUpdate, MetadataRegistry, Registration,
};
pub use tier::{
    remote_metadata, remote_tags, RebalanceFailure, RebalanceReport, TierAction, TierManager,
    ASSET_TAG,
};
