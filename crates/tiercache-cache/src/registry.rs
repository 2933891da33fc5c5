//! # Metadata Registry
//!
//! The single source of truth for which artifacts exist and which tiers
//! hold them. Entries are keyed by semantic key; lookups are O(1) and never
//! touch either storage tier.
//!
//! ## Persistence
//!
//! The whole registry is snapshotted to `{cache_dir}/index.json` after every
//! mutation batch, through the local tier's atomic write (sibling temp file,
//! fsync, rename). Mutations are applied to a copy of the state and only
//! swapped in once the snapshot is durable, so a failed write leaves the
//! in-memory registry unchanged.
//!
//! ## Load-time Reconciliation
//!
//! Entries that claim a local copy whose file is gone are reconciled when
//! the index is opened: uploaded entries become `REMOTE_ONLY`, anything
//! else is dropped. Each reconciliation is logged at `warn`.
//!
//! An index that cannot be read or parsed fails with
//! [`CacheError::RegistryCorruption`]. It is never silently reset.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tiercache_core::{
    CacheConfig, CacheEntry, Checksum, CoreError, EntryFilter, SemanticPath, TierState,
    UploadStatus,
};
use tiercache_store::{LocalStore, LocalStoreError};

use crate::error::{CacheError, MismatchKind};

const INDEX_FILE: &str = "index.json";
const INDEX_VERSION: u32 = 1;

// ---------------------------------------------------------------------------
// Counters
// ---------------------------------------------------------------------------

/// Operation counters persisted alongside the entries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counters {
    #[serde(default)]
    pub uploads: u64,
    #[serde(default)]
    pub downloads: u64,
    #[serde(default)]
    pub cache_hits: u64,
    #[serde(default)]
    pub cache_misses: u64,
}

impl Counters {
    /// Hits as a percentage of lookups; 0 before any lookup.
    pub fn hit_rate(&self) -> f64 {
        let lookups = self.cache_hits + self.cache_misses;
        if lookups == 0 {
            return 0.0;
        }
        self.cache_hits as f64 / lookups as f64 * 100.0
    }

    fn bump(&mut self, counter: Counter, by: u64) {
        let slot = match counter {
            Counter::Upload => &mut self.uploads,
            Counter::Download => &mut self.downloads,
            Counter::Hit => &mut self.cache_hits,
            Counter::Miss => &mut self.cache_misses,
        };
        *slot += by;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Counter {
    Upload,
    Download,
    Hit,
    Miss,
}

// ---------------------------------------------------------------------------
// Inputs
// ---------------------------------------------------------------------------

/// A request to register an artifact.
#[derive(Debug, Clone)]
pub struct Registration {
    /// Explicit key. Derived from the semantic path when absent.
    pub key: Option<String>,
    pub semantic_path: SemanticPath,
    /// File to materialize in the local tier.
    pub source: PathBuf,
    /// Expected checksum of `source`. Registration fails if it disagrees
    /// with the content.
    pub checksum: Option<Checksum>,
    pub metadata: BTreeMap<String, String>,
    pub campaign_id: Option<String>,
    /// Replace an existing entry whose content differs.
    pub overwrite: bool,
}

impl Registration {
    pub fn new(semantic_path: SemanticPath, source: impl Into<PathBuf>) -> Self {
        Self {
            key: None,
            semantic_path,
            source: source.into(),
            checksum: None,
            metadata: BTreeMap::new(),
            campaign_id: None,
            overwrite: false,
        }
    }

    pub fn key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn checksum(mut self, checksum: Checksum) -> Self {
        self.checksum = Some(checksum);
        self
    }

    pub fn metadata(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(name.into(), value.into());
        self
    }

    pub fn campaign(mut self, campaign_id: impl Into<String>) -> Self {
        self.campaign_id = Some(campaign_id.into());
        self
    }

    pub fn overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }
}

/// One change in a mutation batch. Unset fields are left alone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryUpdate {
    pub key: String,
    pub tier_state: Option<TierState>,
    pub upload_status: Option<UploadStatus>,
}

impl EntryUpdate {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            tier_state: None,
            upload_status: None,
        }
    }

    pub fn tier(mut self, state: TierState) -> Self {
        self.tier_state = Some(state);
        self
    }

    pub fn upload(mut self, status: UploadStatus) -> Self {
        self.upload_status = Some(status);
        self
    }
}

// ---------------------------------------------------------------------------
// Cursor
// ---------------------------------------------------------------------------

/// Finite, restartable cursor over a registry snapshot, ordered by key.
///
/// The snapshot is taken when the cursor is created; later mutations are
/// not observed.
#[derive(Debug, Clone)]
pub struct EntryCursor {
    entries: Vec<CacheEntry>,
    position: usize,
}

impl EntryCursor {
    pub fn restart(&mut self) {
        self.position = 0;
    }

    /// Entries in the snapshot, consumed or not.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Iterator for EntryCursor {
    type Item = CacheEntry;

    fn next(&mut self) -> Option<CacheEntry> {
        let entry = self.entries.get(self.position)?.clone();
        self.position += 1;
        Some(entry)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = self.entries.len() - self.position;
        (left, Some(left))
    }
}

// ---------------------------------------------------------------------------
// Index file
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct IndexFile {
    version: u32,
    #[serde(default)]
    entries: BTreeMap<String, CacheEntry>,
    #[serde(default)]
    counters: Counters,
}

#[derive(Serialize)]
struct IndexRef<'a> {
    version: u32,
    entries: BTreeMap<&'a str, &'a CacheEntry>,
    counters: Counters,
}

#[derive(Debug, Clone, Default)]
struct State {
    entries: HashMap<String, CacheEntry>,
    /// Relative local path to the key that owns it.
    paths: HashMap<String, String>,
    counters: Counters,
}

impl State {
    fn insert(&mut self, entry: CacheEntry, rel: String) {
        self.paths.insert(rel, entry.key.clone());
        self.entries.insert(entry.key.clone(), entry);
    }

    fn remove(&mut self, key: &str) -> Option<CacheEntry> {
        let entry = self.entries.remove(key)?;
        if let Ok(rel) = entry.semantic_path.relative_path() {
            self.paths.remove(&rel);
        }
        Some(entry)
    }

    fn entry_mut(&mut self, key: &str) -> Result<&mut CacheEntry, CacheError> {
        self.entries
            .get_mut(key)
            .ok_or_else(|| CacheError::NotFound(key.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// The persisted key → entry index.
pub struct MetadataRegistry {
    local: LocalStore,
    prefix: String,
    state: Mutex<State>,
}

impl std::fmt::Debug for MetadataRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetadataRegistry")
            .field("root", &self.local.root())
            .field("prefix", &self.prefix)
            .field("entries", &self.len())
            .finish()
    }
}

impl MetadataRegistry {
    /// Open (or create) the registry rooted at the local tier.
    pub fn open(local: LocalStore, prefix: &str) -> Result<Self, CacheError> {
        let (state, reconciled) = load(&local)?;
        let registry = Self {
            local,
            prefix: prefix.trim_matches('/').to_string(),
            state: Mutex::new(state),
        };
        if reconciled > 0 {
            let snapshot = registry.state.lock().clone();
            registry.persist(&snapshot)?;
        }
        tracing::debug!(entries = registry.len(), reconciled, "registry opened");
        Ok(registry)
    }

    pub fn from_config(config: &CacheConfig) -> Result<Self, CacheError> {
        Self::open(LocalStore::new(&config.cache_dir), &config.prefix)
    }

    pub fn local(&self) -> &LocalStore {
        &self.local
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn index_path(&self) -> PathBuf {
        self.local.resolve(Path::new(INDEX_FILE))
    }

    /// Where `entry` lives in the local tier.
    pub fn local_path(&self, entry: &CacheEntry) -> Result<PathBuf, CacheError> {
        let rel = entry.semantic_path.relative_path()?;
        Ok(self.local.resolve(Path::new(&rel)))
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn counters(&self) -> Counters {
        self.state.lock().counters
    }

    // -----------------------------------------------------------------------
    // Registration
    // -----------------------------------------------------------------------

    /// Register an artifact, materializing it at its semantic local path.
    ///
    /// Same key and same content is a no-op apart from recording the
    /// campaign. Different content fails with
    /// [`CacheError::ChecksumConflict`] unless `overwrite` is set; nothing
    /// on disk or in the registry changes in that case.
    pub fn register(&self, registration: Registration) -> Result<CacheEntry, CacheError> {
        let Registration {
            key,
            semantic_path,
            source,
            checksum,
            metadata,
            campaign_id,
            overwrite,
        } = registration;

        semantic_path.validate()?;
        let key = match key {
            Some(key) => key,
            None => semantic_path.derive_key()?,
        };
        if key.trim().is_empty() {
            return Err(CoreError::InvalidSemanticPath("cache key must not be empty".into()).into());
        }
        let rel = semantic_path.relative_path()?;
        let remote_key = semantic_path.remote_key(&self.prefix)?;
        let source = absolute(&source)?;

        let content = self.local.checksum(&source)?;
        if let Some(expected) = checksum {
            if expected != content {
                return Err(CacheError::mismatch(
                    &key,
                    MismatchKind::Checksum,
                    format!("expected {expected}, source hashes to {content}"),
                ));
            }
        }

        self.mutate(|state| {
            let mut campaign_refs = BTreeSet::new();
            let mut replaced_rel = None;
            let mut had_remote = false;
            if let Some(existing) = state.entries.get_mut(&key) {
                if existing.checksum == content {
                    if let Some(campaign) = campaign_id {
                        existing.campaign_refs.insert(campaign);
                    }
                    return Ok(existing.clone());
                }
                if !overwrite {
                    return Err(CacheError::ChecksumConflict {
                        key: key.clone(),
                        existing: existing.checksum,
                        offered: content,
                    });
                }
                campaign_refs = existing.campaign_refs.clone();
                had_remote = existing.tier_state.has_remote() || existing.upload_status.is_some();
                let old_rel = existing.semantic_path.relative_path()?;
                if old_rel != rel {
                    replaced_rel = Some(old_rel);
                }
            }
            if let Some(owner) = state.paths.get(&rel) {
                if *owner != key {
                    return Err(CacheError::PathInUse {
                        path: rel.clone(),
                        owner: owner.clone(),
                    });
                }
            }

            let (written, size) = self.local.copy_in(&source, Path::new(&rel))?;
            if written != content {
                return Err(CacheError::mismatch(
                    &key,
                    MismatchKind::Checksum,
                    "source changed during registration",
                ));
            }
            if let Some(old_rel) = replaced_rel {
                self.local.remove(Path::new(&old_rel))?;
            }

            state.remove(&key);
            let mut entry = CacheEntry::new(&key, semantic_path, content, size, remote_key, Utc::now());
            entry.metadata = metadata;
            entry.campaign_refs = campaign_refs;
            if let Some(campaign) = campaign_id {
                entry.campaign_refs.insert(campaign);
            }
            // The stale remote copy must stay reachable by upload and delete.
            if had_remote {
                entry.upload_status = Some(UploadStatus::Pending);
            }
            state.insert(entry.clone(), rel);
            tracing::info!(key = %entry.key, size = entry.size_bytes, checksum = %entry.checksum, "registered asset");
            Ok(entry)
        })
    }

    /// Add an entry found in the remote tier but unknown locally.
    ///
    /// Returns `false` without changes when the key or its path is taken.
    pub fn insert_remote(&self, mut entry: CacheEntry) -> Result<bool, CacheError> {
        entry.semantic_path.validate()?;
        let rel = entry.semantic_path.relative_path()?;
        entry.tier_state = TierState::RemoteOnly;
        entry.upload_status = Some(UploadStatus::Uploaded);
        self.mutate(|state| {
            if state.entries.contains_key(&entry.key) || state.paths.contains_key(&rel) {
                return Ok(false);
            }
            state.insert(entry, rel);
            Ok(true)
        })
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    pub fn lookup(&self, key: &str) -> Option<CacheEntry> {
        self.state.lock().entries.get(key).cloned()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.state.lock().entries.contains_key(key)
    }

    /// Key that owns a relative local path, if any.
    pub fn owner_of(&self, relative_path: &str) -> Option<String> {
        self.state.lock().paths.get(relative_path).cloned()
    }

    /// Snapshot cursor over the entries matching `filter`.
    pub fn list(&self, filter: &EntryFilter) -> EntryCursor {
        let mut entries: Vec<CacheEntry> = self
            .state
            .lock()
            .entries
            .values()
            .filter(|e| e.matches(filter))
            .cloned()
            .collect();
        entries.sort_by(|a, b| a.key.cmp(&b.key));
        EntryCursor {
            entries,
            position: 0,
        }
    }

    /// The persisted form of the registry, as published remotely.
    pub fn index_bytes(&self) -> Result<Vec<u8>, CacheError> {
        let state = self.state.lock();
        self.encode(&state)
    }

    // -----------------------------------------------------------------------
    // Mutations
    // -----------------------------------------------------------------------

    pub fn update_tier_state(&self, key: &str, tier_state: TierState) -> Result<CacheEntry, CacheError> {
        self.mutate(|state| {
            let entry = state.entry_mut(key)?;
            entry.tier_state = tier_state;
            Ok(entry.clone())
        })
    }

    pub fn set_upload_status(&self, key: &str, status: UploadStatus) -> Result<CacheEntry, CacheError> {
        self.mutate(|state| {
            let entry = state.entry_mut(key)?;
            entry.upload_status = Some(status);
            Ok(entry.clone())
        })
    }

    pub fn record_access(&self, key: &str) -> Result<CacheEntry, CacheError> {
        self.record_access_at(key, Utc::now())
    }

    /// Record an access at an explicit time.
    pub fn record_access_at(&self, key: &str, at: DateTime<Utc>) -> Result<CacheEntry, CacheError> {
        self.mutate(|state| {
            let entry = state.entry_mut(key)?;
            entry.last_accessed_at = at;
            entry.access_count += 1;
            Ok(entry.clone())
        })
    }

    /// Record an access and a cache hit in one snapshot.
    pub fn record_hit(&self, key: &str) -> Result<CacheEntry, CacheError> {
        self.mutate(|state| {
            let entry = state.entry_mut(key)?;
            entry.last_accessed_at = Utc::now();
            entry.access_count += 1;
            let entry = entry.clone();
            state.counters.bump(Counter::Hit, 1);
            Ok(entry)
        })
    }

    pub fn bump(&self, counter: Counter, by: u64) -> Result<(), CacheError> {
        if by == 0 {
            return Ok(());
        }
        self.mutate(|state| {
            state.counters.bump(counter, by);
            Ok(())
        })
    }

    pub fn add_campaign_ref(&self, key: &str, campaign_id: &str) -> Result<CacheEntry, CacheError> {
        self.mutate(|state| {
            let entry = state.entry_mut(key)?;
            entry.campaign_refs.insert(campaign_id.to_string());
            Ok(entry.clone())
        })
    }

    /// Drop an entry. Content in either tier is left alone.
    pub fn remove(&self, key: &str) -> Result<CacheEntry, CacheError> {
        self.mutate(|state| {
            state
                .remove(key)
                .ok_or_else(|| CacheError::NotFound(key.to_string()))
        })
    }

    pub fn update(&self, update: EntryUpdate) -> Result<CacheEntry, CacheError> {
        let key = update.key.clone();
        self.apply(std::slice::from_ref(&update))?
            .pop()
            .ok_or(CacheError::NotFound(key))
    }

    /// Apply a batch of updates with a single snapshot.
    ///
    /// All or nothing: an unknown key fails the batch before anything is
    /// applied.
    pub fn apply(&self, updates: &[EntryUpdate]) -> Result<Vec<CacheEntry>, CacheError> {
        if updates.is_empty() {
            return Ok(Vec::new());
        }
        self.mutate(|state| {
            let mut out = Vec::with_capacity(updates.len());
            for update in updates {
                let entry = state.entry_mut(&update.key)?;
                if let Some(tier_state) = update.tier_state {
                    entry.tier_state = tier_state;
                }
                if let Some(status) = &update.upload_status {
                    entry.upload_status = Some(status.clone());
                }
                out.push(entry.clone());
            }
            Ok(out)
        })
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    fn mutate<R>(&self, f: impl FnOnce(&mut State) -> Result<R, CacheError>) -> Result<R, CacheError> {
        let mut state = self.state.lock();
        let mut next = state.clone();
        let out = f(&mut next)?;
        self.persist(&next)?;
        *state = next;
        Ok(out)
    }

    fn persist(&self, state: &State) -> Result<(), CacheError> {
        let bytes = self.encode(state)?;
        self.local.write(Path::new(INDEX_FILE), &bytes)?;
        Ok(())
    }

    fn encode(&self, state: &State) -> Result<Vec<u8>, CacheError> {
        let index = IndexRef {
            version: INDEX_VERSION,
            entries: state
                .entries
                .iter()
                .map(|(k, v)| (k.as_str(), v))
                .collect(),
            counters: state.counters,
        };
        serde_json::to_vec_pretty(&index).map_err(|e| CacheError::RegistryCorruption {
            path: self.index_path(),
            message: format!("failed to encode index: {e}"),
        })
    }
}

fn load(local: &LocalStore) -> Result<(State, usize), CacheError> {
    let path = local.resolve(Path::new(INDEX_FILE));
    let corrupt = |message: String| CacheError::RegistryCorruption {
        path: path.clone(),
        message,
    };

    let bytes = match local.read(Path::new(INDEX_FILE)) {
        Ok(bytes) => bytes,
        Err(e) if e.is_not_found() => return Ok((State::default(), 0)),
        Err(e) => return Err(corrupt(e.to_string())),
    };
    let index: IndexFile = serde_json::from_slice(&bytes).map_err(|e| corrupt(e.to_string()))?;
    if index.version != INDEX_VERSION {
        return Err(corrupt(format!("unsupported index version {}", index.version)));
    }

    let mut state = State {
        counters: index.counters,
        ..State::default()
    };
    let mut reconciled = 0;
    for (key, mut entry) in index.entries {
        if entry.key != key {
            return Err(corrupt(format!("entry stored under {key:?} is keyed {:?}", entry.key)));
        }
        let rel = entry
            .semantic_path
            .relative_path()
            .map_err(|e| corrupt(format!("entry {key:?}: {e}")))?;
        if entry.tier_state.has_local() && !local.exists(Path::new(&rel)) {
            reconciled += 1;
            if entry.is_uploaded() {
                tracing::warn!(key = %key, "local copy missing, entry is now REMOTE_ONLY");
                entry.tier_state = TierState::RemoteOnly;
            } else {
                tracing::warn!(key = %key, "local copy missing and never uploaded, dropping entry");
                continue;
            }
        }
        if let Some(owner) = state.paths.get(&rel) {
            return Err(corrupt(format!("{key:?} and {owner:?} share path {rel}")));
        }
        state.insert(entry, rel);
    }
    Ok((state, reconciled))
}

fn absolute(path: &Path) -> Result<PathBuf, CacheError> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    let cwd = std::env::current_dir().map_err(|source| LocalStoreError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(cwd.join(path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tiercache_core::{AssetType, Season};

    struct Fixture {
        dir: tempfile::TempDir,
        registry: MetadataRegistry,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let registry = MetadataRegistry::open(LocalStore::new(dir.path().join("cache")), "assets").unwrap();
            Self { dir, registry }
        }

        fn source(&self, name: &str, body: &[u8]) -> PathBuf {
            let path = self.dir.path().join("incoming").join(name);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(&path, body).unwrap();
            path
        }

        fn reopen(&self) -> Result<MetadataRegistry, CacheError> {
            MetadataRegistry::open(LocalStore::new(self.dir.path().join("cache")), "assets")
        }
    }

    fn soap() -> SemanticPath {
        SemanticPath::product("Laundry Care", "Tide Pods", true)
    }

    #[test]
    fn register_materializes_at_semantic_path() {
        let fx = Fixture::new();
        let src = fx.source("a.png", b"soap");
        let entry = fx.registry.register(Registration::new(soap(), &src)).unwrap();
        assert_eq!(entry.key, "product_transparent:laundry-care:tide-pods");
        assert_eq!(entry.remote_key, "assets/products/transparent/laundry-care/tide-pods/product.png");
        assert_eq!(entry.tier_state, TierState::LocalOnly);
        assert_eq!(entry.size_bytes, 4);
        let local = fx.registry.local_path(&entry).unwrap();
        assert_eq!(std::fs::read(local).unwrap(), b"soap");
        assert_eq!(fx.registry.lookup(&entry.key), Some(entry));
    }

    #[test]
    fn reregistering_same_content_is_idempotent() {
        let fx = Fixture::new();
        let src = fx.source("a.png", b"soap");
        let first = fx.registry.register(Registration::new(soap(), &src)).unwrap();
        let second = fx
            .registry
            .register(Registration::new(soap(), &src).campaign("spring-24"))
            .unwrap();
        assert_eq!(fx.registry.len(), 1);
        assert_eq!(second.created_at, first.created_at);
        assert_eq!(second.checksum, first.checksum);
        assert!(second.campaign_refs.contains("spring-24"));
    }

    #[test]
    fn conflicting_content_leaves_everything_untouched() {
        let fx = Fixture::new();
        let original = fx.registry.register(Registration::new(soap(), fx.source("a.png", b"v1"))).unwrap();
        let index_before = std::fs::read(fx.registry.index_path()).unwrap();

        let err = fx
            .registry
            .register(Registration::new(soap(), fx.source("b.png", b"v2")))
            .unwrap_err();
        assert!(matches!(err, CacheError::ChecksumConflict { .. }));
        assert_eq!(fx.registry.lookup(&original.key), Some(original.clone()));
        let local = fx.registry.local_path(&original).unwrap();
        assert_eq!(std::fs::read(local).unwrap(), b"v1");
        assert_eq!(std::fs::read(fx.registry.index_path()).unwrap(), index_before);
    }

    #[test]
    fn overwrite_replaces_content_and_resets_tiers() {
        let fx = Fixture::new();
        let first = fx
            .registry
            .register(Registration::new(soap(), fx.source("a.png", b"v1")).campaign("c1"))
            .unwrap();
        fx.registry.set_upload_status(&first.key, UploadStatus::Uploaded).unwrap();
        fx.registry.update_tier_state(&first.key, TierState::Both).unwrap();

        let second = fx
            .registry
            .register(Registration::new(soap(), fx.source("b.png", b"v22")).overwrite(true))
            .unwrap();
        assert_eq!(second.checksum, Checksum::of_bytes(b"v22"));
        assert_eq!(second.tier_state, TierState::LocalOnly);
        // The superseded remote object is still there to be replaced or deleted.
        assert_eq!(second.upload_status, Some(UploadStatus::Pending));
        assert!(second.campaign_refs.contains("c1"));
        assert_eq!(std::fs::read(fx.registry.local_path(&second).unwrap()).unwrap(), b"v22");
    }

    #[test]
    fn overwrite_of_local_only_entry_stays_unscheduled() {
        let fx = Fixture::new();
        fx.registry
            .register(Registration::new(soap(), fx.source("a.png", b"v1")))
            .unwrap();
        let second = fx
            .registry
            .register(Registration::new(soap(), fx.source("b.png", b"v2")).overwrite(true))
            .unwrap();
        assert!(second.upload_status.is_none());
    }

    #[test]
    fn two_keys_cannot_share_a_path() {
        let fx = Fixture::new();
        let src = fx.source("a.png", b"soap");
        fx.registry.register(Registration::new(soap(), &src).key("first")).unwrap();
        let err = fx
            .registry
            .register(Registration::new(soap(), &src).key("second"))
            .unwrap_err();
        match err {
            CacheError::PathInUse { owner, .. } => assert_eq!(owner, "first"),
            other => panic!("unexpected error {other:?}"),
        }
        assert!(!fx.registry.contains("second"));
    }

    #[test]
    fn wrong_expected_checksum_is_rejected() {
        let fx = Fixture::new();
        let src = fx.source("a.png", b"soap");
        let err = fx
            .registry
            .register(Registration::new(soap(), &src).checksum(Checksum::of_bytes(b"other")))
            .unwrap_err();
        assert!(matches!(
            err,
            CacheError::ValidationMismatch {
                kind: MismatchKind::Checksum,
                ..
            }
        ));
        assert!(fx.registry.is_empty());
    }

    #[test]
    fn invalid_semantic_path_is_rejected() {
        let fx = Fixture::new();
        let src = fx.source("a.png", b"x");
        let mut path = soap();
        path.category = None;
        let err = fx.registry.register(Registration::new(path, &src)).unwrap_err();
        assert!(matches!(err, CacheError::InvalidMetadata(_)));
    }

    #[test]
    fn entries_and_counters_survive_reopen() {
        let fx = Fixture::new();
        let entry = fx.registry.register(Registration::new(soap(), fx.source("a.png", b"soap"))).unwrap();
        fx.registry.record_hit(&entry.key).unwrap();
        fx.registry.bump(Counter::Miss, 1).unwrap();

        let reopened = fx.reopen().unwrap();
        let loaded = reopened.lookup(&entry.key).unwrap();
        assert_eq!(loaded.access_count, 1);
        assert_eq!(reopened.counters().cache_hits, 1);
        assert_eq!(reopened.counters().hit_rate(), 50.0);
    }

    #[test]
    fn reopen_reconciles_missing_local_files() {
        let fx = Fixture::new();
        let uploaded = fx.registry.register(Registration::new(soap(), fx.source("a.png", b"a"))).unwrap();
        let local_only = fx
            .registry
            .register(Registration::new(SemanticPath::background("studio", None, Some(Season::Fall)), fx.source("b.jpg", b"b")))
            .unwrap();
        fx.registry
            .apply(&[EntryUpdate::new(&uploaded.key)
                .tier(TierState::Both)
                .upload(UploadStatus::Uploaded)])
            .unwrap();
        std::fs::remove_file(fx.registry.local_path(&uploaded).unwrap()).unwrap();
        std::fs::remove_file(fx.registry.local_path(&local_only).unwrap()).unwrap();

        let reopened = fx.reopen().unwrap();
        assert_eq!(reopened.lookup(&uploaded.key).unwrap().tier_state, TierState::RemoteOnly);
        assert!(reopened.lookup(&local_only.key).is_none());
        // The reconciled state was persisted.
        assert_eq!(fx.reopen().unwrap().len(), 1);
    }

    #[test]
    fn malformed_index_is_corruption() {
        let fx = Fixture::new();
        fx.registry.register(Registration::new(soap(), fx.source("a.png", b"a"))).unwrap();
        std::fs::write(fx.registry.index_path(), b"{ not json").unwrap();
        let err = fx.reopen().unwrap_err();
        assert!(matches!(err, CacheError::RegistryCorruption { .. }));
        // Never reset.
        assert_eq!(std::fs::read(fx.registry.index_path()).unwrap(), b"{ not json");
    }

    #[test]
    fn future_index_version_is_corruption() {
        let fx = Fixture::new();
        std::fs::create_dir_all(fx.dir.path().join("cache")).unwrap();
        std::fs::write(fx.registry.index_path(), br#"{"version": 7, "entries": {}}"#).unwrap();
        assert!(matches!(fx.reopen().unwrap_err(), CacheError::RegistryCorruption { .. }));
    }

    #[test]
    fn list_filters_and_restarts() {
        let fx = Fixture::new();
        fx.registry.register(Registration::new(soap(), fx.source("a.png", b"a"))).unwrap();
        fx.registry
            .register(Registration::new(SemanticPath::background("studio", Some("emea"), None), fx.source("b.jpg", b"b")))
            .unwrap();
        fx.registry
            .register(
                Registration::new(SemanticPath::composite("spring-24", "Tide Pods", "1:1"), fx.source("c.jpg", b"c"))
                    .campaign("spring-24"),
            )
            .unwrap();

        let mut cursor = fx.registry.list(&EntryFilter::all());
        assert_eq!(cursor.len(), 3);
        let keys: Vec<String> = cursor.by_ref().map(|e| e.key).collect();
        let mut sorted = keys.clone();
        sorted.sort();
        assert_eq!(keys, sorted);
        assert!(cursor.next().is_none());
        cursor.restart();
        assert!(cursor.next().is_some());

        let backgrounds = fx
            .registry
            .list(&EntryFilter::all().asset_type(AssetType::SceneBackground).region("emea"));
        assert_eq!(backgrounds.count(), 1);
        assert_eq!(fx.registry.list(&EntryFilter::all().campaign("spring-24")).count(), 1);
        assert_eq!(fx.registry.list(&EntryFilter::all().region("apac")).count(), 0);
    }

    #[test]
    fn batch_with_unknown_key_applies_nothing() {
        let fx = Fixture::new();
        let entry = fx.registry.register(Registration::new(soap(), fx.source("a.png", b"a"))).unwrap();
        let err = fx
            .registry
            .apply(&[
                EntryUpdate::new(&entry.key).tier(TierState::Both),
                EntryUpdate::new("ghost").tier(TierState::Both),
            ])
            .unwrap_err();
        assert!(matches!(err, CacheError::NotFound(k) if k == "ghost"));
        assert_eq!(fx.registry.lookup(&entry.key).unwrap().tier_state, TierState::LocalOnly);
    }

    #[test]
    fn insert_remote_refuses_taken_keys() {
        let fx = Fixture::new();
        let entry = fx.registry.register(Registration::new(soap(), fx.source("a.png", b"a"))).unwrap();
        assert!(!fx.registry.insert_remote(entry.clone()).unwrap());

        let path = SemanticPath::product("care", "bleach", false);
        let remote = CacheEntry::new(
            path.derive_key().unwrap(),
            path.clone(),
            Checksum::of_bytes(b"z"),
            1,
            path.remote_key("assets").unwrap(),
            Utc::now(),
        );
        assert!(fx.registry.insert_remote(remote.clone()).unwrap());
        let stored = fx.registry.lookup(&remote.key).unwrap();
        assert_eq!(stored.tier_state, TierState::RemoteOnly);
        assert!(stored.is_uploaded());
    }

    #[test]
    fn remove_frees_the_path() {
        let fx = Fixture::new();
        let src = fx.source("a.png", b"a");
        let entry = fx.registry.register(Registration::new(soap(), &src).key("one")).unwrap();
        fx.registry.remove(&entry.key).unwrap();
        assert!(fx.registry.remove(&entry.key).is_err());
        fx.registry.register(Registration::new(soap(), &src).key("two")).unwrap();
    }
}
