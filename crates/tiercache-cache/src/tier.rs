//! # Tier Manager
//!
//! Moves artifacts between tiers and keeps the registry in step.
//!
//! - `promote` re-materializes a `REMOTE_ONLY` artifact locally and checks
//!   the downloaded content against the registered checksum before the
//!   entry becomes `BOTH`.
//! - `demote` uploads if needed, confirms the remote copy exists with the
//!   registered size, and only then deletes the local file.
//! - `rebalance` applies an access-recency policy to every entry. Entries
//!   already in the state the policy wants are left alone, so running it
//!   twice changes nothing the second time.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tiercache_core::{CacheEntry, EntryFilter, TierState, UploadStatus};
use tiercache_store::{LocalStoreError, RemoteStore, META_CACHE_KEY};
use tiercache_transfer::RetryPolicy;

use crate::error::{CacheError, MismatchKind};
use crate::registry::{Counter, EntryUpdate, MetadataRegistry};

/// Tag value identifying objects written by the cache.
pub const ASSET_TAG: &str = "semantic-asset";

/// Object metadata recorded with every upload.
pub fn remote_metadata(entry: &CacheEntry) -> BTreeMap<String, String> {
    let mut meta = entry.metadata.clone();
    meta.insert(META_CACHE_KEY.to_string(), entry.key.clone());
    meta.insert("asset-type".to_string(), entry.asset_type().to_string());
    meta.insert("created-at".to_string(), entry.created_at.to_rfc3339());
    if !entry.campaign_refs.is_empty() {
        let campaigns: Vec<&str> = entry.campaign_refs.iter().map(String::as_str).collect();
        meta.insert("campaigns".to_string(), campaigns.join(","));
    }
    meta
}

pub fn remote_tags(entry: &CacheEntry) -> BTreeMap<String, String> {
    BTreeMap::from([
        ("type".to_string(), ASSET_TAG.to_string()),
        ("asset-type".to_string(), entry.asset_type().to_string()),
    ])
}

/// Outcome of a rebalance pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RebalanceReport {
    pub promoted: Vec<String>,
    pub demoted: Vec<String>,
    /// Entries already where the policy wants them.
    pub unchanged: usize,
    pub failures: Vec<RebalanceFailure>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RebalanceFailure {
    pub key: String,
    pub action: TierAction,
    pub error: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TierAction {
    Promote,
    Demote,
}

impl RebalanceReport {
    pub fn changed(&self) -> usize {
        self.promoted.len() + self.demoted.len()
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Promotes and demotes registry entries.
#[derive(Debug, Clone)]
pub struct TierManager {
    registry: Arc<MetadataRegistry>,
    remote: RemoteStore,
    retry: RetryPolicy,
}

impl TierManager {
    pub fn new(registry: Arc<MetadataRegistry>, remote: RemoteStore, retry: RetryPolicy) -> Self {
        Self {
            registry,
            remote,
            retry,
        }
    }

    fn entry(&self, key: &str) -> Result<CacheEntry, CacheError> {
        self.registry
            .lookup(key)
            .ok_or_else(|| CacheError::NotFound(key.to_string()))
    }

    /// Ensure a usable local copy exists.
    pub async fn promote(&self, key: &str) -> Result<CacheEntry, CacheError> {
        let entry = self.entry(key)?;
        let path = self.registry.local_path(&entry)?;
        let local = self.registry.local();
        if entry.tier_state.has_local() {
            if local.exists(&path) {
                return Ok(entry);
            }
            if !entry.is_uploaded() {
                return Err(LocalStoreError::NotFound(path).into());
            }
        }

        let (result, attempts) = self
            .retry
            .run(key, || true, || self.remote.try_download(&entry.remote_key, &path))
            .await;
        let (checksum, _) = result.map_err(|e| CacheError::transfer(key, e))?;
        if checksum != entry.checksum {
            local.remove(&path)?;
            return Err(CacheError::mismatch(
                key,
                MismatchKind::Checksum,
                format!("registered {}, downloaded {checksum}", entry.checksum),
            ));
        }

        let updated = self.registry.update_tier_state(key, TierState::Both)?;
        self.registry.bump(Counter::Download, 1)?;
        tracing::info!(key, attempts, "promoted to local tier");
        Ok(updated)
    }

    /// Upload an entry unless it is already uploaded.
    pub async fn upload(&self, key: &str) -> Result<CacheEntry, CacheError> {
        let entry = self.entry(key)?;
        if entry.is_uploaded() {
            return Ok(entry);
        }
        self.upload_entry(&entry).await
    }

    async fn upload_entry(&self, entry: &CacheEntry) -> Result<CacheEntry, CacheError> {
        let key = entry.key.as_str();
        let path = self.registry.local_path(entry)?;
        let metadata = remote_metadata(entry);
        let tags = remote_tags(entry);
        let (result, attempts) = self
            .retry
            .run(key, || true, || {
                self.remote
                    .try_upload(&path, &entry.remote_key, &metadata, &tags)
            })
            .await;
        match result {
            Ok(summary) => {
                let updated = self.registry.update(
                    EntryUpdate::new(key)
                        .tier(TierState::Both)
                        .upload(UploadStatus::Uploaded),
                )?;
                self.registry.bump(Counter::Upload, 1)?;
                tracing::info!(key, size = summary.size, attempts, "uploaded to remote tier");
                Ok(updated)
            }
            Err(e) => {
                self.registry.set_upload_status(
                    key,
                    UploadStatus::Failed {
                        error: e.message.clone(),
                    },
                )?;
                Err(CacheError::transfer(key, e))
            }
        }
    }

    /// Make the artifact remote-only, uploading first if necessary.
    pub async fn demote(&self, key: &str) -> Result<CacheEntry, CacheError> {
        let entry = self.entry(key)?;
        if entry.tier_state == TierState::RemoteOnly {
            return Ok(entry);
        }
        let entry = if entry.is_uploaded() {
            entry
        } else {
            self.upload_entry(&entry).await?
        };

        let summary = self
            .remote
            .stat(&entry.remote_key)
            .await
            .map_err(|e| CacheError::transfer(key, e))?
            .ok_or_else(|| {
                CacheError::mismatch(key, MismatchKind::Missing, "remote copy not found")
            })?;
        if summary.size != entry.size_bytes {
            return Err(CacheError::mismatch(
                key,
                MismatchKind::Size,
                format!("registered {} bytes, remote has {}", entry.size_bytes, summary.size),
            ));
        }

        let path = self.registry.local_path(&entry)?;
        self.registry.local().remove(&path)?;
        let updated = self.registry.update_tier_state(key, TierState::RemoteOnly)?;
        tracing::info!(key, "demoted to remote tier");
        Ok(updated)
    }

    /// Rebalance with `cold_days` as the recency threshold.
    pub async fn rebalance(&self, cold_days: u32, promote_hot: bool, demote_cold: bool) -> RebalanceReport {
        self.rebalance_at(
            Utc::now(),
            chrono::Duration::days(i64::from(cold_days)),
            promote_hot,
            demote_cold,
        )
        .await
    }

    /// Rebalance as if the current time were `now`.
    pub async fn rebalance_at(
        &self,
        now: DateTime<Utc>,
        threshold: chrono::Duration,
        promote_hot: bool,
        demote_cold: bool,
    ) -> RebalanceReport {
        let mut report = RebalanceReport::default();
        for entry in self.registry.list(&EntryFilter::all()) {
            let cold = entry.is_cold(now, threshold);
            let action = match entry.tier_state {
                TierState::LocalOnly | TierState::Both if cold && demote_cold => TierAction::Demote,
                TierState::RemoteOnly if !cold && promote_hot => TierAction::Promote,
                _ => {
                    report.unchanged += 1;
                    continue;
                }
            };
            let result = match action {
                TierAction::Promote => self.promote(&entry.key).await,
                TierAction::Demote => self.demote(&entry.key).await,
            };
            match (result, action) {
                (Ok(_), TierAction::Promote) => report.promoted.push(entry.key),
                (Ok(_), TierAction::Demote) => report.demoted.push(entry.key),
                (Err(e), action) => {
                    tracing::warn!(key = %entry.key, ?action, "rebalance step failed: {e}");
                    report.failures.push(RebalanceFailure {
                        key: entry.key,
                        action,
                        error: e.to_string(),
                    });
                }
            }
        }
        tracing::info!(
            promoted = report.promoted.len(),
            demoted = report.demoted.len(),
            unchanged = report.unchanged,
            failed = report.failures.len(),
            "rebalance finished"
        );
        report
    }
}
