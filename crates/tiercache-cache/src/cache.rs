//! # Asset Cache
//!
//! [`AssetCache`] wires the registry, both tiers, the batch engine, the
//! tier manager and the migration planner together from one
//! [`CacheConfig`]. It is what the CLI and embedding applications hold.
//!
//! Retrieval goes through [`AssetCache::get_path`], which counts hits and
//! misses and re-materializes remote-only entries on demand.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tiercache_core::{CacheConfig, CacheEntry, Checksum, EntryFilter, SemanticPath, TierState};
use tiercache_store::{
    BucketUsage, LocalStore, ObjectStore, RemoteStore, TransferClass, META_CACHE_KEY,
    META_CHECKSUM,
};
use tiercache_transfer::{BatchTransferEngine, ItemStatus, Progress, RetryPolicy, TransferJob};
use url::Url;

use crate::error::CacheError;
use crate::migration::{FailedItem, MigrationPlanner};
use crate::registry::{Counter, Counters, EntryUpdate, MetadataRegistry, Registration};
use crate::tier::TierManager;

#[derive(Debug, Clone, Serialize)]
pub struct DownloadResult {
    pub downloaded: usize,
    pub failures: Vec<FailedItem>,
    pub progress: Progress,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ClearReport {
    pub removed: Vec<String>,
    pub failures: Vec<ClearFailure>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ClearFailure {
    pub key: String,
    pub error: String,
}

/// Registry totals plus, optionally, remote usage.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CacheStats {
    pub total_entries: usize,
    pub local_only: usize,
    pub remote_only: usize,
    pub both: usize,
    /// Bytes held by entries with a local copy.
    pub local_bytes: u64,
    pub pending_uploads: usize,
    pub failed_uploads: usize,
    pub by_type: BTreeMap<String, usize>,
    pub counters: Counters,
    pub hit_rate: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote: Option<BucketUsage>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DiscoveredAsset {
    pub key: String,
    pub remote_key: String,
    pub semantic_path: SemanticPath,
    pub size: u64,
    /// Already in the registry before discovery.
    pub known: bool,
    /// Added to the registry by this discovery.
    pub added: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DiscoveryReport {
    pub assets: Vec<DiscoveredAsset>,
    pub added: usize,
    /// Objects that do not follow the semantic layout.
    pub unrecognized: usize,
    /// Unknown objects that could not be registered for lack of a checksum.
    pub skipped: usize,
}

/// The tiered cache.
#[derive(Debug)]
pub struct AssetCache {
    config: CacheConfig,
    registry: Arc<MetadataRegistry>,
    engine: BatchTransferEngine,
    tiers: TierManager,
    planner: MigrationPlanner,
}

impl AssetCache {
    /// Open the cache described by `config` over an already-scoped client.
    pub fn open(config: CacheConfig, client: Arc<dyn ObjectStore>) -> Result<Self, CacheError> {
        config.validate()?;
        let local = LocalStore::new(&config.cache_dir);
        let registry = Arc::new(MetadataRegistry::open(local.clone(), &config.prefix)?);
        let remote = RemoteStore::new(client, local, &config);
        let engine = BatchTransferEngine::from_config(remote.clone(), &config);
        let tiers = TierManager::new(registry.clone(), remote, RetryPolicy::from_config(&config));
        let planner = MigrationPlanner::new(
            registry.clone(),
            engine.clone(),
            config.storage_class,
            config.metadata_index_key(),
        );
        tracing::info!(
            cache_dir = %config.cache_dir.display(),
            bucket = %config.bucket_name,
            entries = registry.len(),
            "cache opened"
        );
        Ok(Self {
            config,
            registry,
            engine,
            tiers,
            planner,
        })
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn registry(&self) -> &MetadataRegistry {
        &self.registry
    }

    pub fn remote(&self) -> &RemoteStore {
        self.engine.remote()
    }

    pub fn engine(&self) -> &BatchTransferEngine {
        &self.engine
    }

    pub fn tiers(&self) -> &TierManager {
        &self.tiers
    }

    pub fn planner(&self) -> &MigrationPlanner {
        &self.planner
    }

    pub fn register(&self, registration: Registration) -> Result<CacheEntry, CacheError> {
        self.registry.register(registration)
    }

    pub fn lookup(&self, key: &str) -> Option<CacheEntry> {
        self.registry.lookup(key)
    }

    // -----------------------------------------------------------------------
    // Retrieval
    // -----------------------------------------------------------------------

    /// Usable local path for `key`, or `None` on a miss.
    ///
    /// A remote-only entry is downloaded first when `auto_download` is set
    /// and counts as a miss otherwise.
    pub async fn get_path(&self, key: &str, auto_download: bool) -> Result<Option<PathBuf>, CacheError> {
        let Some(entry) = self.registry.lookup(key) else {
            self.registry.bump(Counter::Miss, 1)?;
            tracing::debug!(key, "cache miss");
            return Ok(None);
        };
        let path = self.registry.local_path(&entry)?;
        let present = entry.tier_state.has_local() && self.registry.local().exists(&path);
        if !present {
            if !auto_download {
                self.registry.bump(Counter::Miss, 1)?;
                tracing::debug!(key, tier = %entry.tier_state, "cache miss, not downloading");
                return Ok(None);
            }
            self.tiers.promote(key).await?;
        }
        self.registry.record_hit(key)?;
        tracing::debug!(key, "cache hit");
        Ok(Some(path))
    }

    /// Download every remote-only entry under `filter` in one batch.
    pub async fn download(&self, filter: &EntryFilter) -> Result<DownloadResult, CacheError> {
        let targets: Vec<CacheEntry> = self
            .registry
            .list(filter)
            .filter(|e| e.tier_state == TierState::RemoteOnly)
            .collect();
        let mut jobs = Vec::with_capacity(targets.len());
        for entry in &targets {
            jobs.push(TransferJob::download(
                &entry.remote_key,
                self.registry.local_path(entry)?,
            ));
        }

        let outcome = self.engine.run_all(jobs).await;
        let mut updates = Vec::new();
        let mut failures = Vec::new();
        for (result, entry) in outcome.results.iter().zip(&targets) {
            match &result.status {
                ItemStatus::Succeeded { checksum, .. } if *checksum == Some(entry.checksum) => {
                    updates.push(EntryUpdate::new(&entry.key).tier(TierState::Both));
                }
                ItemStatus::Succeeded { checksum, .. } => {
                    self.registry.local().remove(&result.local_path)?;
                    failures.push(FailedItem {
                        key: entry.key.clone(),
                        class: TransferClass::Other,
                        message: format!(
                            "checksum mismatch: registered {}, downloaded {}",
                            entry.checksum,
                            checksum.as_ref().map(|c| c.to_string()).unwrap_or_default()
                        ),
                    });
                }
                ItemStatus::Failed(e) => failures.push(FailedItem {
                    key: entry.key.clone(),
                    class: e.class,
                    message: e.message.clone(),
                }),
                ItemStatus::Cancelled => {}
            }
        }
        self.registry.apply(&updates)?;
        self.registry.bump(Counter::Download, updates.len() as u64)?;
        Ok(DownloadResult {
            downloaded: updates.len(),
            failures,
            progress: outcome.progress,
        })
    }

    pub async fn presign(&self, key: &str, ttl: Duration) -> Result<Url, CacheError> {
        let entry = self
            .registry
            .lookup(key)
            .ok_or_else(|| CacheError::NotFound(key.to_string()))?;
        self.remote()
            .get_presigned_url(&entry.remote_key, ttl)
            .await
            .map_err(|e| CacheError::transfer(key, e))
    }

    // -----------------------------------------------------------------------
    // Removal
    // -----------------------------------------------------------------------

    /// Remove an artifact from both tiers, then from the registry.
    pub async fn delete(&self, key: &str) -> Result<CacheEntry, CacheError> {
        let entry = self
            .registry
            .lookup(key)
            .ok_or_else(|| CacheError::NotFound(key.to_string()))?;
        if entry.tier_state.has_remote() || entry.upload_status.is_some() {
            self.remote()
                .try_delete(&entry.remote_key)
                .await
                .map_err(|e| CacheError::transfer(key, e))?;
        }
        let path = self.registry.local_path(&entry)?;
        self.registry.local().remove(&path)?;
        let removed = self.registry.remove(key)?;
        tracing::info!(key, "deleted asset");
        Ok(removed)
    }

    pub async fn clear(&self, filter: &EntryFilter) -> ClearReport {
        let mut report = ClearReport::default();
        for entry in self.registry.list(filter) {
            match self.delete(&entry.key).await {
                Ok(_) => report.removed.push(entry.key),
                Err(e) => {
                    tracing::warn!(key = %entry.key, "delete failed: {e}");
                    report.failures.push(ClearFailure {
                        key: entry.key,
                        error: e.to_string(),
                    });
                }
            }
        }
        report
    }

    // -----------------------------------------------------------------------
    // Reporting
    // -----------------------------------------------------------------------

    pub async fn stats(&self, include_remote: bool) -> Result<CacheStats, CacheError> {
        let mut stats = CacheStats::default();
        for entry in self.registry.list(&EntryFilter::all()) {
            stats.total_entries += 1;
            match entry.tier_state {
                TierState::LocalOnly => stats.local_only += 1,
                TierState::RemoteOnly => stats.remote_only += 1,
                TierState::Both => stats.both += 1,
            }
            if entry.tier_state.has_local() {
                stats.local_bytes += entry.size_bytes;
            }
            match &entry.upload_status {
                Some(tiercache_core::UploadStatus::Pending) => stats.pending_uploads += 1,
                Some(tiercache_core::UploadStatus::Failed { .. }) => stats.failed_uploads += 1,
                _ => {}
            }
            *stats
                .by_type
                .entry(entry.asset_type().to_string())
                .or_default() += 1;
        }
        stats.counters = self.registry.counters();
        stats.hit_rate = stats.counters.hit_rate();
        if include_remote {
            let usage = self
                .remote()
                .bucket_usage()
                .await
                .map_err(|e| CacheError::transfer(self.remote().prefix(), e))?;
            stats.remote = Some(usage);
        }
        Ok(stats)
    }

    /// List remote objects and map them back to semantic paths.
    ///
    /// With `sync`, objects unknown to the registry are added as
    /// `REMOTE_ONLY` entries, keyed by their recorded cache key.
    pub async fn discover(&self, prefix: Option<&str>, sync: bool) -> Result<DiscoveryReport, CacheError> {
        let remote = self.remote();
        let listing = match prefix {
            Some(prefix) => remote.list(prefix, None),
            None => remote.list_namespace(),
        };
        let objects = listing
            .collect_all()
            .await
            .map_err(|e| CacheError::transfer(prefix.unwrap_or(remote.prefix()), e))?;

        let mut report = DiscoveryReport::default();
        for object in objects {
            let Some(semantic_path) = SemanticPath::parse_remote_key(remote.prefix(), &object.key) else {
                report.unrecognized += 1;
                continue;
            };
            let key = match object.metadata.get(META_CACHE_KEY) {
                Some(key) => key.clone(),
                None => semantic_path.derive_key()?,
            };
            let known = self.registry.contains(&key);
            let mut added = false;
            if sync && !known {
                let checksum = object
                    .metadata
                    .get(META_CHECKSUM)
                    .and_then(|hex| Checksum::from_hex(hex).ok());
                match checksum {
                    Some(checksum) => {
                        let entry = CacheEntry::new(
                            &key,
                            semantic_path.clone(),
                            checksum,
                            object.size,
                            &object.key,
                            object.last_modified,
                        );
                        added = self.registry.insert_remote(entry)?;
                    }
                    None => {
                        tracing::warn!(key = %object.key, "remote object has no checksum, not registering");
                        report.skipped += 1;
                    }
                }
            }
            if added {
                report.added += 1;
            }
            report.assets.push(DiscoveredAsset {
                key,
                remote_key: object.key,
                semantic_path,
                size: object.size,
                known,
                added,
            });
        }
        tracing::info!(
            found = report.assets.len(),
            added = report.added,
            unrecognized = report.unrecognized,
            "remote discovery finished"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tiercache_core::UploadStatus;
    use tiercache_store::MemoryObjectStore;

    struct Fixture {
        dir: tempfile::TempDir,
        client: Arc<MemoryObjectStore>,
        cache: AssetCache,
    }

    fn config(dir: &std::path::Path) -> CacheConfig {
        CacheConfig {
            bucket_name: "bucket".to_string(),
            prefix: "assets".to_string(),
            cache_dir: dir.join("cache"),
            retry_base_delay_ms: 1,
            ..CacheConfig::default()
        }
    }

    impl Fixture {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let client = Arc::new(MemoryObjectStore::new("bucket"));
            let cache = AssetCache::open(config(dir.path()), client.clone()).unwrap();
            Self { dir, client, cache }
        }

        fn register(&self, name: &str, body: &[u8]) -> CacheEntry {
            let src = self.dir.path().join(format!("{name}.png"));
            std::fs::write(&src, body).unwrap();
            self.cache
                .register(Registration::new(SemanticPath::product("care", name, true), src))
                .unwrap()
        }
    }

    #[test]
    fn open_requires_a_bucket() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = config(dir.path());
        cfg.bucket_name.clear();
        let err = AssetCache::open(cfg, Arc::new(MemoryObjectStore::new("b"))).unwrap_err();
        assert!(matches!(err, CacheError::Config(_)));
    }

    #[tokio::test]
    async fn get_path_counts_hits_and_misses() {
        let fx = Fixture::new();
        let entry = fx.register("soap", b"x");
        let path = fx.cache.get_path(&entry.key, false).await.unwrap().unwrap();
        assert_eq!(std::fs::read(path).unwrap(), b"x");
        assert!(fx.cache.get_path("unknown", true).await.unwrap().is_none());

        let counters = fx.cache.registry().counters();
        assert_eq!((counters.cache_hits, counters.cache_misses), (1, 1));
        assert_eq!(fx.cache.lookup(&entry.key).unwrap().access_count, 1);
    }

    #[tokio::test]
    async fn get_path_rematerializes_remote_only_entries() {
        let fx = Fixture::new();
        let entry = fx.register("soap", b"content");
        fx.cache.tiers().demote(&entry.key).await.unwrap();

        assert!(fx.cache.get_path(&entry.key, false).await.unwrap().is_none());
        let path = fx.cache.get_path(&entry.key, true).await.unwrap().unwrap();
        assert_eq!(std::fs::read(path).unwrap(), b"content");
        assert_eq!(fx.cache.lookup(&entry.key).unwrap().tier_state, TierState::Both);
    }

    #[tokio::test]
    async fn batch_download_restores_local_copies() {
        let fx = Fixture::new();
        let a = fx.register("a", b"aaa");
        let b = fx.register("b", b"bb");
        fx.cache.tiers().demote(&a.key).await.unwrap();
        fx.cache.tiers().demote(&b.key).await.unwrap();
        fx.client.replace_body(&b.remote_key, b"BB".to_vec());

        let result = fx.cache.download(&EntryFilter::all()).await.unwrap();
        assert_eq!(result.downloaded, 1);
        assert_eq!(result.failures.len(), 1);
        assert_eq!(result.failures[0].key, b.key);
        assert_eq!(fx.cache.lookup(&a.key).unwrap().tier_state, TierState::Both);
        assert_eq!(fx.cache.lookup(&b.key).unwrap().tier_state, TierState::RemoteOnly);
        assert!(!fx.cache.registry().local_path(&b).unwrap().exists());
    }

    #[tokio::test]
    async fn delete_removes_both_tiers_then_entry() {
        let fx = Fixture::new();
        let entry = fx.register("soap", b"x");
        fx.cache.tiers().upload(&entry.key).await.unwrap();
        let local = fx.cache.registry().local_path(&entry).unwrap();

        fx.cache.delete(&entry.key).await.unwrap();
        assert!(!local.exists());
        assert_eq!(fx.client.object_count(), 0);
        assert!(fx.cache.lookup(&entry.key).is_none());
        assert!(matches!(
            fx.cache.delete(&entry.key).await.unwrap_err(),
            CacheError::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn clear_honors_filter() {
        let fx = Fixture::new();
        fx.register("a", b"a");
        let bg_src = fx.dir.path().join("bg.jpg");
        std::fs::write(&bg_src, b"bg").unwrap();
        let bg = fx
            .cache
            .register(Registration::new(SemanticPath::background("studio", None, None), bg_src))
            .unwrap();

        let report = fx
            .cache
            .clear(&EntryFilter::all().asset_type(tiercache_core::AssetType::ProductTransparent))
            .await;
        assert_eq!(report.removed.len(), 1);
        assert!(report.failures.is_empty());
        assert_eq!(fx.cache.registry().len(), 1);
        assert!(fx.cache.lookup(&bg.key).is_some());
    }

    #[tokio::test]
    async fn stats_summarize_tiers() {
        let fx = Fixture::new();
        let a = fx.register("a", b"aaaa");
        let b = fx.register("b", b"bb");
        fx.cache.tiers().demote(&a.key).await.unwrap();
        fx.cache
            .registry()
            .set_upload_status(&b.key, UploadStatus::Pending)
            .unwrap();

        let stats = fx.cache.stats(true).await.unwrap();
        assert_eq!(stats.total_entries, 2);
        assert_eq!((stats.local_only, stats.remote_only, stats.both), (1, 1, 0));
        assert_eq!(stats.local_bytes, 2);
        assert_eq!(stats.pending_uploads, 1);
        assert_eq!(stats.by_type["product_transparent"], 2);
        let remote = stats.remote.unwrap();
        assert_eq!(remote.object_count, 1);
        assert_eq!(remote.total_bytes, 4);
    }

    #[tokio::test]
    async fn discover_registers_objects_from_other_sessions() {
        let fx = Fixture::new();
        let entry = fx.register("soap", b"shared");
        fx.cache.tiers().upload(&entry.key).await.unwrap();

        // A second session over the same bucket with an empty cache.
        let other_dir = tempfile::tempdir().unwrap();
        let other = AssetCache::open(config(other_dir.path()), fx.client.clone()).unwrap();
        let dry = other.discover(None, false).await.unwrap();
        assert_eq!(dry.assets.len(), 1);
        assert_eq!(dry.added, 0);
        assert!(other.lookup(&entry.key).is_none());

        let synced = other.discover(None, true).await.unwrap();
        assert_eq!(synced.added, 1);
        let found = other.lookup(&entry.key).unwrap();
        assert_eq!(found.tier_state, TierState::RemoteOnly);
        assert_eq!(found.checksum, entry.checksum);

        let path = other.get_path(&entry.key, true).await.unwrap().unwrap();
        assert_eq!(std::fs::read(path).unwrap(), b"shared");

        let again = other.discover(None, true).await.unwrap();
        assert_eq!(again.added, 0);
        assert!(again.assets[0].known);
    }

    #[tokio::test]
    async fn presign_unknown_key_is_not_found() {
        let fx = Fixture::new();
        assert!(matches!(
            fx.cache.presign("nope", Duration::from_secs(60)).await.unwrap_err(),
            CacheError::NotFound(_)
        ));
    }
}
