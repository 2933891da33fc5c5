//! # tiercache-core: Foundational Types for the Tiered Asset Cache
//!
//! Defines the vocabulary shared by every other `tiercache-*` crate:
//!
//! - [`Checksum`]: SHA-256 content hash, the integrity anchor for every
//!   artifact moving between tiers.
//! - [`SemanticPath`]: structured classification of an asset from which
//!   both the local and the remote location are derived deterministically.
//! - [`CacheEntry`]: one registered artifact with its tier and upload state.
//! - [`CacheConfig`]: explicit configuration handed to constructors. There
//!   is no process-wide client or global state.
//! - [`PriceTable`]: per-storage-class pricing used for migration estimates.
//!
//! ## Crate Policy
//!
//! - No dependencies on other `tiercache-*` crates (leaf of the DAG).
//! - No I/O beyond reading a configuration file and hashing a reader.
//! - No `.unwrap()` outside tests.

pub mod checksum;
pub mod config;
pub mod entry;
pub mod error;
pub mod pricing;
pub mod semantic;

pub use checksum::Checksum;
pub use config::{CacheConfig, ConfigError, StorageClass};
pub use entry::{CacheEntry, EntryFilter, TierState, UploadStatus};
pub use error::CoreError;
pub use pricing::{CostEstimate, PriceTable};
pub use semantic::{slugify, AssetType, Season, SemanticPath};
