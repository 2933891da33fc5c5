//! # Migration Planning and Validation
//!
//! Bulk moves to the remote tier happen in three explicit steps:
//!
//! 1. [`MigrationPlanner::plan`] scans the registry (no I/O) for entries
//!    that have a local copy but are not yet uploaded, and prices the move.
//! 2. [`MigrationPlanner::execute`] runs the plan through the batch engine
//!    and records each outcome in the registry, then publishes the registry
//!    index to `{prefix}/metadata/index.json`.
//! 3. [`MigrationPlanner::validate`] checks every uploaded entry against the
//!    remote tier and reports drift. Nothing is repaired.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tiercache_core::{
    CacheEntry, Checksum, CostEstimate, EntryFilter, PriceTable, StorageClass, TierState,
    UploadStatus,
};
use tiercache_store::{TransferClass, META_CHECKSUM};
use tiercache_transfer::{BatchTransferEngine, CancelSignal, ItemResult, ItemStatus, Progress, TransferJob};

use crate::error::{CacheError, MismatchKind};
use crate::registry::{Counter, EntryUpdate, MetadataRegistry};
use crate::tier::{remote_metadata, remote_tags};

// ---------------------------------------------------------------------------
// Plan
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct PlanItem {
    pub key: String,
    pub local_path: PathBuf,
    pub remote_key: String,
    pub size_bytes: u64,
}

/// What a migration would move and what it would cost.
#[derive(Debug, Clone, Serialize)]
pub struct MigrationPlan {
    pub items: Vec<PlanItem>,
    pub total_size: u64,
    /// Monthly cost of the moved data in the configured storage class.
    pub estimated_cost: CostEstimate,
}

impl MigrationPlan {
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Execution result
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct FailedItem {
    pub key: String,
    pub class: TransferClass,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct MigrationResult {
    pub uploaded: usize,
    pub failed: usize,
    /// Items never started because the run was cancelled.
    pub cancelled: usize,
    pub bytes_uploaded: u64,
    /// Percentage of planned items uploaded.
    pub success_rate: f64,
    pub duration: Duration,
    pub failures: Vec<FailedItem>,
    /// Whether the registry index was published afterwards.
    pub index_uploaded: bool,
}

impl MigrationResult {
    pub fn is_complete(&self) -> bool {
        self.failed == 0 && self.cancelled == 0
    }
}

// ---------------------------------------------------------------------------
// Validation report
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SizeMismatch {
    pub key: String,
    pub expected: u64,
    pub actual: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChecksumMismatch {
    pub key: String,
    pub expected: Checksum,
    pub actual: Checksum,
}

/// Drift between the registry and the remote tier.
///
/// Each entry appears in at most one list, by priority missing, then size,
/// then checksum.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ValidationReport {
    /// Entries examined.
    pub checked: usize,
    pub missing: Vec<String>,
    pub size_mismatches: Vec<SizeMismatch>,
    pub checksum_mismatches: Vec<ChecksumMismatch>,
    /// Entries whose remote copy carries no checksum and were not downloaded.
    pub unverified: Vec<String>,
    /// Entries that could not be checked at all.
    pub errors: Vec<FailedItem>,
}

impl ValidationReport {
    pub fn mismatch_count(&self) -> usize {
        self.missing.len() + self.size_mismatches.len() + self.checksum_mismatches.len()
    }

    pub fn is_clean(&self) -> bool {
        self.mismatch_count() == 0 && self.errors.is_empty()
    }

    /// The mismatch recorded for `key`, if any.
    pub fn mismatch_for(&self, key: &str) -> Option<MismatchKind> {
        if self.missing.iter().any(|k| k == key) {
            Some(MismatchKind::Missing)
        } else if self.size_mismatches.iter().any(|m| m.key == key) {
            Some(MismatchKind::Size)
        } else if self.checksum_mismatches.iter().any(|m| m.key == key) {
            Some(MismatchKind::Checksum)
        } else {
            None
        }
    }
}

// ---------------------------------------------------------------------------
// Planner
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct MigrationPlanner {
    registry: Arc<MetadataRegistry>,
    engine: BatchTransferEngine,
    prices: PriceTable,
    storage_class: StorageClass,
    index_key: String,
}

impl MigrationPlanner {
    pub fn new(
        registry: Arc<MetadataRegistry>,
        engine: BatchTransferEngine,
        storage_class: StorageClass,
        index_key: impl Into<String>,
    ) -> Self {
        Self {
            registry,
            engine,
            prices: PriceTable::default(),
            storage_class,
            index_key: index_key.into(),
        }
    }

    pub fn with_prices(mut self, prices: PriceTable) -> Self {
        self.prices = prices;
        self
    }

    pub fn prices(&self) -> &PriceTable {
        &self.prices
    }

    /// Entries under `filter` that have a local copy and are not uploaded.
    pub fn plan(&self, filter: &EntryFilter) -> Result<MigrationPlan, CacheError> {
        let mut items = Vec::new();
        for entry in self.registry.list(filter) {
            if !entry.tier_state.has_local() || entry.is_uploaded() {
                continue;
            }
            items.push(PlanItem {
                local_path: self.registry.local_path(&entry)?,
                key: entry.key,
                remote_key: entry.remote_key,
                size_bytes: entry.size_bytes,
            });
        }
        let total_size = items.iter().map(|i| i.size_bytes).sum();
        Ok(MigrationPlan {
            estimated_cost: self.prices.estimate(total_size, self.storage_class),
            items,
            total_size,
        })
    }

    /// Cost of a plan in every priced storage class, most expensive first.
    pub fn estimate_all(&self, plan: &MigrationPlan) -> Vec<CostEstimate> {
        self.prices.estimate_all(plan.total_size)
    }

    pub async fn execute<F>(&self, plan: &MigrationPlan, on_item: F) -> Result<MigrationResult, CacheError>
    where
        F: FnMut(&Progress, &ItemResult),
    {
        self.execute_with(plan, &CancelSignal::new(), on_item).await
    }

    /// Upload every planned item, calling `on_item` after each one.
    ///
    /// Per-item failures are recorded on the entry as `FAILED` and in the
    /// result; only registry errors abort the run.
    pub async fn execute_with<F>(
        &self,
        plan: &MigrationPlan,
        cancel: &CancelSignal,
        on_item: F,
    ) -> Result<MigrationResult, CacheError>
    where
        F: FnMut(&Progress, &ItemResult),
    {
        let started = Instant::now();
        let mut jobs = Vec::with_capacity(plan.len());
        let mut entries: Vec<CacheEntry> = Vec::with_capacity(plan.len());
        for item in &plan.items {
            let entry = self
                .registry
                .lookup(&item.key)
                .ok_or_else(|| CacheError::NotFound(item.key.clone()))?;
            jobs.push(
                TransferJob::upload(&item.local_path, &item.remote_key, remote_metadata(&entry))
                    .with_tags(remote_tags(&entry)),
            );
            entries.push(entry);
        }

        let pending: Vec<EntryUpdate> = entries
            .iter()
            .map(|e| EntryUpdate::new(&e.key).upload(UploadStatus::Pending))
            .collect();
        self.registry.apply(&pending)?;

        tracing::info!(items = plan.len(), total_bytes = plan.total_size, "starting migration");
        let outcome = self.engine.run(jobs, cancel, on_item).await;

        let mut updates = Vec::new();
        let mut failures = Vec::new();
        for (result, entry) in outcome.results.iter().zip(&entries) {
            match &result.status {
                ItemStatus::Succeeded { .. } => updates.push(
                    EntryUpdate::new(&entry.key)
                        .tier(TierState::Both)
                        .upload(UploadStatus::Uploaded),
                ),
                ItemStatus::Failed(e) => {
                    updates.push(EntryUpdate::new(&entry.key).upload(UploadStatus::Failed {
                        error: e.message.clone(),
                    }));
                    failures.push(FailedItem {
                        key: entry.key.clone(),
                        class: e.class,
                        message: e.message.clone(),
                    });
                }
                ItemStatus::Cancelled => {}
            }
        }
        self.registry.apply(&updates)?;
        self.registry.bump(Counter::Upload, outcome.progress.completed as u64)?;

        let index_uploaded = self.publish_index().await;
        let result = MigrationResult {
            uploaded: outcome.progress.completed,
            failed: outcome.progress.failed,
            cancelled: outcome.progress.cancelled,
            bytes_uploaded: outcome.progress.bytes_transferred,
            success_rate: outcome.success_rate(),
            duration: started.elapsed(),
            failures,
            index_uploaded,
        };
        tracing::info!(
            uploaded = result.uploaded,
            failed = result.failed,
            cancelled = result.cancelled,
            "migration finished"
        );
        Ok(result)
    }

    async fn publish_index(&self) -> bool {
        let body = match self.registry.index_bytes() {
            Ok(body) => body,
            Err(e) => {
                tracing::warn!("could not encode registry index: {e}");
                return false;
            }
        };
        match self
            .engine
            .remote()
            .put_bytes(&self.index_key, body, "application/json")
            .await
        {
            Ok(_) => true,
            Err(e) => {
                tracing::warn!(key = %self.index_key, class = %e.class, "index upload failed: {}", e.message);
                false
            }
        }
    }

    /// Compare every uploaded entry under `filter` with its remote copy.
    ///
    /// Checksums come from the `sha256` object metadata; with `deep` the
    /// object is downloaded and hashed instead.
    pub async fn validate(&self, filter: &EntryFilter, deep: bool) -> ValidationReport {
        let remote = self.engine.remote();
        let mut report = ValidationReport::default();
        for entry in self.registry.list(filter) {
            if !entry.is_uploaded() {
                continue;
            }
            report.checked += 1;
            let key = entry.key;
            let summary = match remote.stat(&entry.remote_key).await {
                Ok(Some(summary)) => summary,
                Ok(None) => {
                    report.missing.push(key);
                    continue;
                }
                Err(e) => {
                    report.errors.push(FailedItem {
                        key,
                        class: e.class,
                        message: e.message,
                    });
                    continue;
                }
            };
            if summary.size != entry.size_bytes {
                report.size_mismatches.push(SizeMismatch {
                    key,
                    expected: entry.size_bytes,
                    actual: summary.size,
                });
                continue;
            }

            let recorded = summary
                .metadata
                .get(META_CHECKSUM)
                .and_then(|hex| Checksum::from_hex(hex).ok());
            let actual = match (deep, recorded) {
                (false, Some(recorded)) => recorded,
                (false, None) => {
                    report.unverified.push(key);
                    continue;
                }
                (true, _) => match remote.fetch(&entry.remote_key).await {
                    Ok(body) => Checksum::of_bytes(&body),
                    Err(e) => {
                        report.errors.push(FailedItem {
                            key,
                            class: e.class,
                            message: e.message,
                        });
                        continue;
                    }
                },
            };
            if actual != entry.checksum {
                report.checksum_mismatches.push(ChecksumMismatch {
                    key,
                    expected: entry.checksum,
                    actual,
                });
            }
        }
        if report.is_clean() {
            tracing::info!(checked = report.checked, "validation passed");
        } else {
            tracing::warn!(
                checked = report.checked,
                missing = report.missing.len(),
                size = report.size_mismatches.len(),
                checksum = report.checksum_mismatches.len(),
                errors = report.errors.len(),
                "validation found drift"
            );
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tiercache_core::{CacheConfig, SemanticPath};
    use tiercache_store::{LocalStore, MemoryObjectStore, ObjectStore, RemoteStore};
    use tiercache_transfer::RetryPolicy;

    use crate::registry::Registration;

    struct Fixture {
        dir: tempfile::TempDir,
        client: Arc<MemoryObjectStore>,
        registry: Arc<MetadataRegistry>,
        planner: MigrationPlanner,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let config = CacheConfig {
                bucket_name: "bucket".to_string(),
                prefix: "assets".to_string(),
                cache_dir: dir.path().join("cache"),
                ..CacheConfig::default()
            };
            let client = Arc::new(MemoryObjectStore::new("bucket"));
            let registry = Arc::new(MetadataRegistry::from_config(&config).unwrap());
            let remote = RemoteStore::new(client.clone(), LocalStore::new(&config.cache_dir), &config);
            let engine = BatchTransferEngine::new(remote, 4, RetryPolicy::none());
            let planner = MigrationPlanner::new(
                registry.clone(),
                engine,
                config.storage_class,
                config.metadata_index_key(),
            );
            Self {
                dir,
                client,
                registry,
                planner,
            }
        }

        fn register(&self, name: &str, body: &[u8]) -> CacheEntry {
            let src = self.dir.path().join(format!("{name}.png"));
            std::fs::write(&src, body).unwrap();
            self.registry
                .register(Registration::new(SemanticPath::product("care", name, true), src))
                .unwrap()
        }
    }

    #[tokio::test]
    async fn plan_covers_only_local_unuploaded_entries() {
        let fx = Fixture::new();
        let a = fx.register("a", b"12345");
        fx.register("b", b"123");
        fx.registry.set_upload_status(&a.key, UploadStatus::Uploaded).unwrap();

        let plan = fx.planner.plan(&EntryFilter::all()).unwrap();
        assert_eq!(plan.len(), 1);
        assert_eq!(plan.total_size, 3);
        assert_eq!(plan.estimated_cost.storage_class, StorageClass::Standard);
        assert_eq!(fx.planner.estimate_all(&plan).len(), StorageClass::ALL.len());
    }

    #[tokio::test]
    async fn failed_upload_stays_in_the_plan() {
        let fx = Fixture::new();
        let e = fx.register("a", b"1");
        fx.registry
            .set_upload_status(&e.key, UploadStatus::Failed { error: "boom".into() })
            .unwrap();
        assert_eq!(fx.planner.plan(&EntryFilter::all()).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn execute_records_outcomes_and_publishes_index() {
        let fx = Fixture::new();
        let good = fx.register("good", b"good");
        let bad = fx.register("bad", b"bad");
        std::fs::remove_file(fx.registry.local_path(&bad).unwrap()).unwrap();

        let plan = fx.planner.plan(&EntryFilter::all()).unwrap();
        let mut seen = 0;
        let result = fx.planner.execute(&plan, |_, _| seen += 1).await.unwrap();
        assert_eq!(seen, 2);
        assert_eq!(result.uploaded, 1);
        assert_eq!(result.failed, 1);
        assert_eq!(result.failures[0].key, bad.key);
        assert_eq!(result.failures[0].class, TransferClass::NotFound);
        assert_eq!(result.success_rate, 50.0);
        assert!(result.index_uploaded);

        let good_now = fx.registry.lookup(&good.key).unwrap();
        assert!(good_now.is_uploaded());
        assert_eq!(good_now.tier_state, TierState::Both);
        assert!(matches!(
            fx.registry.lookup(&bad.key).unwrap().upload_status,
            Some(UploadStatus::Failed { .. })
        ));
        let index = fx.client.body("assets/metadata/index.json").unwrap();
        let parsed: serde_json::Value = serde_json::from_slice(&index).unwrap();
        assert_eq!(parsed["version"], 1);
        assert_eq!(fx.registry.counters().uploads, 1);
    }

    #[tokio::test]
    async fn cancelled_run_leaves_items_pending() {
        let fx = Fixture::new();
        let e = fx.register("a", b"a");
        let plan = fx.planner.plan(&EntryFilter::all()).unwrap();
        let cancel = CancelSignal::new();
        cancel.cancel();
        let result = fx.planner.execute_with(&plan, &cancel, |_, _| {}).await.unwrap();
        assert_eq!(result.cancelled, 1);
        assert!(!result.is_complete());
        assert_eq!(
            fx.registry.lookup(&e.key).unwrap().upload_status,
            Some(UploadStatus::Pending)
        );
    }

    #[tokio::test]
    async fn validate_reports_one_mismatch_per_entry() {
        let fx = Fixture::new();
        let intact = fx.register("intact", b"intact");
        let resized = fx.register("resized", b"resized");
        let gone = fx.register("gone", b"gone");
        let swapped = fx.register("swapped", b"swap");
        let plan = fx.planner.plan(&EntryFilter::all()).unwrap();
        fx.planner.execute(&plan, |_, _| {}).await.unwrap();

        fx.client.replace_body(&resized.remote_key, b"resized!!".to_vec());
        fx.client.delete_object(&gone.remote_key).await.unwrap();
        fx.client.replace_body(&swapped.remote_key, b"SWAP".to_vec());

        let shallow = fx.planner.validate(&EntryFilter::all(), false).await;
        assert_eq!(shallow.checked, 4);
        assert_eq!(shallow.missing, vec![gone.key.clone()]);
        assert_eq!(shallow.size_mismatches.len(), 1);
        assert_eq!(shallow.mismatch_for(&resized.key), Some(MismatchKind::Size));
        // Same size and stale metadata checksum: only a download notices.
        assert_eq!(shallow.mismatch_for(&swapped.key), None);
        assert_eq!(shallow.mismatch_for(&intact.key), None);

        let deep = fx.planner.validate(&EntryFilter::all(), true).await;
        assert_eq!(deep.mismatch_for(&swapped.key), Some(MismatchKind::Checksum));
        assert_eq!(deep.mismatch_count(), 3);
        assert!(!deep.is_clean());
    }
}
