//! # Cache Entries
//!
//! A [`CacheEntry`] is the registry's record of one artifact: what it is,
//! what it hashes to, and which tiers currently hold it.
//!
//! ## Tier State Machine
//!
//! ```text
//!   register ──► LOCAL_ONLY ──upload──► BOTH ──demote──► REMOTE_ONLY
//!                                        ▲                   │
//!                                        └──────promote──────┘
//! ```
//!
//! `REMOTE_ONLY` means the local file is gone; anything handing out a
//! usable path must re-materialize it first.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::checksum::Checksum;
use crate::semantic::{AssetType, SemanticPath};

/// Which tiers hold a copy of an artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TierState {
    LocalOnly,
    RemoteOnly,
    Both,
}

impl TierState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LocalOnly => "LOCAL_ONLY",
            Self::RemoteOnly => "REMOTE_ONLY",
            Self::Both => "BOTH",
        }
    }

    /// Whether a local file is expected to exist.
    pub fn has_local(&self) -> bool {
        matches!(self, Self::LocalOnly | Self::Both)
    }

    /// Whether a remote object is expected to exist.
    pub fn has_remote(&self) -> bool {
        matches!(self, Self::RemoteOnly | Self::Both)
    }
}

impl std::fmt::Display for TierState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of the most recent upload attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UploadStatus {
    Pending,
    Uploaded,
    Failed {
        /// Message from the last failed attempt.
        error: String,
    },
}

impl std::fmt::Display for UploadStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => f.write_str("PENDING"),
            Self::Uploaded => f.write_str("UPLOADED"),
            Self::Failed { error } => write!(f, "FAILED ({error})"),
        }
    }
}

/// One registered artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Unique semantic key.
    pub key: String,
    pub semantic_path: SemanticPath,
    pub checksum: Checksum,
    pub size_bytes: u64,
    pub created_at: DateTime<Utc>,
    pub last_accessed_at: DateTime<Utc>,
    #[serde(default)]
    pub access_count: u64,
    pub tier_state: TierState,
    /// Campaigns that reused this entry. Ordered for stable snapshots.
    #[serde(default)]
    pub campaign_refs: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upload_status: Option<UploadStatus>,
    /// Object key in the remote tier, fixed at registration.
    pub remote_key: String,
    /// Caller-supplied descriptive metadata.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
}

impl CacheEntry {
    /// A freshly registered, local-only entry.
    pub fn new(
        key: impl Into<String>,
        semantic_path: SemanticPath,
        checksum: Checksum,
        size_bytes: u64,
        remote_key: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            key: key.into(),
            semantic_path,
            checksum,
            size_bytes,
            created_at: now,
            last_accessed_at: now,
            access_count: 0,
            tier_state: TierState::LocalOnly,
            campaign_refs: BTreeSet::new(),
            upload_status: None,
            remote_key: remote_key.into(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn asset_type(&self) -> AssetType {
        self.semantic_path.asset_type
    }

    pub fn is_uploaded(&self) -> bool {
        matches!(self.upload_status, Some(UploadStatus::Uploaded))
    }

    /// Whether the entry has not been touched for longer than `threshold`.
    pub fn is_cold(&self, now: DateTime<Utc>, threshold: chrono::Duration) -> bool {
        now.signed_duration_since(self.last_accessed_at) > threshold
    }

    pub fn matches(&self, filter: &EntryFilter) -> bool {
        filter.matches(self)
    }
}

/// Conjunctive filter over registry entries. Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryFilter {
    #[serde(default)]
    pub asset_type: Option<AssetType>,
    #[serde(default)]
    pub region: Option<String>,
    /// Matches the entry's own campaign id or any campaign that reused it.
    #[serde(default)]
    pub campaign: Option<String>,
}

impl EntryFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn asset_type(mut self, asset_type: AssetType) -> Self {
        self.asset_type = Some(asset_type);
        self
    }

    pub fn region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    pub fn campaign(mut self, campaign: impl Into<String>) -> Self {
        self.campaign = Some(campaign.into());
        self
    }

    pub fn matches(&self, entry: &CacheEntry) -> bool {
        if let Some(t) = self.asset_type {
            if entry.semantic_path.asset_type != t {
                return false;
            }
        }
        if let Some(region) = &self.region {
            if entry.semantic_path.region.as_deref() != Some(region.as_str()) {
                return false;
            }
        }
        if let Some(campaign) = &self.campaign {
            let own = entry.semantic_path.campaign_id.as_deref() == Some(campaign.as_str());
            if !own && !entry.campaign_refs.contains(campaign) {
                return false;
            }
        }
        true
    }
}
