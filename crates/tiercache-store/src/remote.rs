//! # Remote Store
//!
//! The remote tier as the cache sees it: an [`ObjectStore`] plus the
//! namespace prefix, storage class, and encryption intent from
//! configuration.
//!
//! ## Guarantees
//!
//! - Every client call is bounded by the configured timeout. A timeout is
//!   classified as `network` and is therefore retryable.
//! - Uploads record the content SHA-256 in object metadata under
//!   [`META_CHECKSUM`], so validation can compare checksums without
//!   downloading.
//! - Downloads land through the [`LocalStore`], so a failed download never
//!   leaves a partial file at the destination.
//! - Presigning and listing never mutate remote state. Applying a
//!   lifecycle policy is idempotent.

use std::collections::{BTreeMap, VecDeque};
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tiercache_core::{CacheConfig, Checksum, SemanticPath, StorageClass};
use url::Url;

use crate::error::{TransferClass, TransferError};
use crate::local::LocalStore;
use crate::object::{BucketSettings, LifecycleRule, ObjectStore, ObjectSummary, PutObject};

/// Object metadata key holding the content checksum (hex).
pub const META_CHECKSUM: &str = "sha256";

/// Object metadata key holding the cache key an object was uploaded for.
pub const META_CACHE_KEY: &str = "cachekey";

/// Default lifetime of a presigned URL.
pub const DEFAULT_PRESIGN_TTL: Duration = Duration::from_secs(3600);

/// Remote metadata values are capped at this many characters.
const METADATA_VALUE_LIMIT: usize = 1024;

const LIFECYCLE_RULE_ID: &str = "transition-to-archive";

const LIST_PAGE_SIZE: usize = 1000;

/// Outcome of a single upload.
#[derive(Debug, Clone)]
pub struct UploadResult {
    pub success: bool,
    pub remote_key: String,
    pub size: u64,
    pub duration: Duration,
    pub error: Option<TransferError>,
}

/// Object totals under the namespace prefix.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BucketUsage {
    pub object_count: u64,
    pub total_bytes: u64,
    /// Keyed by layout folder (`products`, `backgrounds`, `composites`,
    /// `metadata`, or `other`).
    pub by_type: BTreeMap<String, TypeUsage>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TypeUsage {
    pub objects: u64,
    pub bytes: u64,
}

/// The remote tier.
#[derive(Clone)]
pub struct RemoteStore {
    client: Arc<dyn ObjectStore>,
    local: LocalStore,
    prefix: String,
    storage_class: StorageClass,
    encryption: bool,
    versioning: bool,
    timeout: Duration,
}

impl std::fmt::Debug for RemoteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteStore")
            .field("client", &self.client.name())
            .field("prefix", &self.prefix)
            .field("storage_class", &self.storage_class)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl RemoteStore {
    pub fn new(client: Arc<dyn ObjectStore>, local: LocalStore, config: &CacheConfig) -> Self {
        Self {
            client,
            local,
            prefix: config.prefix.trim_matches('/').to_string(),
            storage_class: config.storage_class,
            encryption: config.enable_encryption,
            versioning: config.enable_versioning,
            timeout: config.request_timeout(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn client(&self) -> &Arc<dyn ObjectStore> {
        &self.client
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn local(&self) -> &LocalStore {
        &self.local
    }

    async fn call<T, F>(&self, op: &str, key: &str, fut: F) -> Result<T, TransferError>
    where
        F: Future<Output = Result<T, TransferError>>,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(TransferError::network(format!(
                "{op} {key} timed out after {:?}",
                self.timeout
            ))),
        }
    }

    // -----------------------------------------------------------------------
    // Upload
    // -----------------------------------------------------------------------

    /// Upload a local file, failing with a classified error.
    pub async fn try_upload(
        &self,
        local_path: &Path,
        remote_key: &str,
        metadata: &BTreeMap<String, String>,
        tags: &BTreeMap<String, String>,
    ) -> Result<ObjectSummary, TransferError> {
        let local = self.local.clone();
        let path = local_path.to_path_buf();
        let body = tokio::task::spawn_blocking(move || local.read(&path))
            .await
            .map_err(|e| TransferError::other(format!("read task failed: {e}")))??;

        let mut meta = clean_metadata(metadata);
        meta.insert(
            META_CHECKSUM.to_string(),
            Checksum::of_bytes(&body).to_hex(),
        );
        let request = PutObject {
            key: remote_key.to_string(),
            body,
            content_type: guess_content_type(local_path).to_string(),
            metadata: meta,
            tags: tags.clone(),
            storage_class: self.storage_class,
            server_side_encryption: self.encryption,
        };
        let summary = self
            .call("upload", remote_key, self.client.put_object(request))
            .await?;
        tracing::debug!(key = remote_key, size = summary.size, "uploaded object");
        Ok(summary)
    }

    /// Upload a local file and report the outcome instead of failing.
    pub async fn upload(
        &self,
        local_path: &Path,
        remote_key: &str,
        metadata: &BTreeMap<String, String>,
        tags: &BTreeMap<String, String>,
    ) -> UploadResult {
        let started = Instant::now();
        match self.try_upload(local_path, remote_key, metadata, tags).await {
            Ok(summary) => UploadResult {
                success: true,
                remote_key: remote_key.to_string(),
                size: summary.size,
                duration: started.elapsed(),
                error: None,
            },
            Err(e) => {
                tracing::warn!(key = remote_key, class = %e.class, "upload failed: {}", e.message);
                UploadResult {
                    success: false,
                    remote_key: remote_key.to_string(),
                    size: 0,
                    duration: started.elapsed(),
                    error: Some(e),
                }
            }
        }
    }

    /// Upload an in-memory document such as the registry index.
    pub async fn put_bytes(
        &self,
        remote_key: &str,
        body: Vec<u8>,
        content_type: &str,
    ) -> Result<ObjectSummary, TransferError> {
        let metadata = BTreeMap::from([(
            META_CHECKSUM.to_string(),
            Checksum::of_bytes(&body).to_hex(),
        )]);
        let request = PutObject {
            key: remote_key.to_string(),
            body,
            content_type: content_type.to_string(),
            metadata,
            tags: BTreeMap::new(),
            storage_class: self.storage_class,
            server_side_encryption: self.encryption,
        };
        self.call("upload", remote_key, self.client.put_object(request))
            .await
    }

    // -----------------------------------------------------------------------
    // Download
    // -----------------------------------------------------------------------

    /// Fetch an object's body.
    pub async fn fetch(&self, remote_key: &str) -> Result<Vec<u8>, TransferError> {
        self.call("download", remote_key, self.client.get_object(remote_key))
            .await
    }

    /// Download into `local_path`, returning the checksum and size written.
    pub async fn try_download(
        &self,
        remote_key: &str,
        local_path: &Path,
    ) -> Result<(Checksum, u64), TransferError> {
        let body = self.fetch(remote_key).await?;
        let size = body.len() as u64;
        let local = self.local.clone();
        let path = local_path.to_path_buf();
        let checksum = tokio::task::spawn_blocking(move || local.write(&path, &body))
            .await
            .map_err(|e| TransferError::other(format!("write task failed: {e}")))??;
        tracing::debug!(key = remote_key, size, "downloaded object");
        Ok((checksum, size))
    }

    /// Download into `local_path`; `false` on any failure, which is logged.
    pub async fn download(&self, remote_key: &str, local_path: &Path) -> bool {
        match self.try_download(remote_key, local_path).await {
            Ok(_) => true,
            Err(e) => {
                tracing::warn!(key = remote_key, class = %e.class, "download failed: {}", e.message);
                false
            }
        }
    }

    // -----------------------------------------------------------------------
    // Inspection and deletion
    // -----------------------------------------------------------------------

    pub async fn stat(&self, remote_key: &str) -> Result<Option<ObjectSummary>, TransferError> {
        self.call("stat", remote_key, self.client.head_object(remote_key))
            .await
    }

    pub async fn try_delete(&self, remote_key: &str) -> Result<(), TransferError> {
        self.call("delete", remote_key, self.client.delete_object(remote_key))
            .await
    }

    /// Delete an object; `false` on failure, which is logged.
    pub async fn delete(&self, remote_key: &str) -> bool {
        match self.try_delete(remote_key).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(key = remote_key, class = %e.class, "delete failed: {}", e.message);
                false
            }
        }
    }

    /// Lazy cursor over objects under `prefix`, at most `max_results` of them.
    pub fn list(&self, prefix: &str, max_results: Option<usize>) -> ObjectListing<'_> {
        ObjectListing {
            remote: self,
            prefix: prefix.to_string(),
            max_results,
            buffer: VecDeque::new(),
            token: None,
            done: false,
            yielded: 0,
        }
    }

    /// Cursor over everything under the namespace prefix.
    pub fn list_namespace(&self) -> ObjectListing<'_> {
        let prefix = if self.prefix.is_empty() {
            String::new()
        } else {
            format!("{}/", self.prefix)
        };
        self.list(&prefix, None)
    }

    /// Time-bounded read access to one object. Never mutates state.
    pub async fn get_presigned_url(&self, remote_key: &str, ttl: Duration) -> Result<Url, TransferError> {
        let url = self
            .call("presign", remote_key, self.client.presign_get(remote_key, ttl))
            .await?;
        tracing::debug!(key = remote_key, ttl_secs = ttl.as_secs(), "issued presigned URL");
        Ok(url)
    }

    // -----------------------------------------------------------------------
    // Bucket configuration
    // -----------------------------------------------------------------------

    /// Install the namespace-wide archive rule.
    ///
    /// Returns `false` without writing when an identical rule is already
    /// installed. Rules for other ids are preserved.
    pub async fn set_lifecycle_policy(
        &self,
        transition_days: u32,
        archive_class: StorageClass,
        expiration_days: Option<u32>,
    ) -> Result<bool, TransferError> {
        let rule = LifecycleRule {
            id: LIFECYCLE_RULE_ID.to_string(),
            prefix: if self.prefix.is_empty() {
                String::new()
            } else {
                format!("{}/", self.prefix)
            },
            transition_days,
            transition_class: archive_class,
            expiration_days,
        };
        let existing = self
            .call("get-lifecycle", LIFECYCLE_RULE_ID, self.client.get_lifecycle())
            .await?;
        if existing.contains(&rule) {
            tracing::debug!(transition_days, %archive_class, "lifecycle policy already in place");
            return Ok(false);
        }
        let mut rules: Vec<LifecycleRule> =
            existing.into_iter().filter(|r| r.id != rule.id).collect();
        rules.push(rule);
        self.call("put-lifecycle", LIFECYCLE_RULE_ID, self.client.put_lifecycle(rules))
            .await?;
        tracing::info!(transition_days, %archive_class, ?expiration_days, "lifecycle policy configured");
        Ok(true)
    }

    /// Push configured versioning and encryption flags to the bucket.
    pub async fn apply_bucket_settings(&self) -> Result<(), TransferError> {
        let settings = BucketSettings {
            versioning: self.versioning,
            encryption: self.encryption,
        };
        self.call("bucket-settings", "", self.client.put_bucket_settings(settings))
            .await?;
        tracing::info!(versioning = self.versioning, encryption = self.encryption, "bucket settings applied");
        Ok(())
    }

    /// Totals under the namespace prefix, grouped by layout folder.
    pub async fn bucket_usage(&self) -> Result<BucketUsage, TransferError> {
        let mut usage = BucketUsage::default();
        let mut listing = self.list_namespace();
        while let Some(obj) = listing.next().await? {
            let kind = match SemanticPath::parse_remote_key(&self.prefix, &obj.key) {
                Some(path) => path.asset_type.folder().to_string(),
                None if obj.key.ends_with("metadata/index.json") => "metadata".to_string(),
                None => "other".to_string(),
            };
            usage.object_count += 1;
            usage.total_bytes += obj.size;
            let entry = usage.by_type.entry(kind).or_default();
            entry.objects += 1;
            entry.bytes += obj.size;
        }
        Ok(usage)
    }
}

// ---------------------------------------------------------------------------
// Listing cursor
// ---------------------------------------------------------------------------

/// Finite, restartable cursor over a remote listing.
///
/// Pages are fetched on demand; continuation tokens are handled internally.
pub struct ObjectListing<'a> {
    remote: &'a RemoteStore,
    prefix: String,
    max_results: Option<usize>,
    buffer: VecDeque<ObjectSummary>,
    token: Option<String>,
    done: bool,
    yielded: usize,
}

impl<'a> ObjectListing<'a> {
    pub async fn next(&mut self) -> Result<Option<ObjectSummary>, TransferError> {
        if self.max_results.is_some_and(|max| self.yielded >= max) {
            return Ok(None);
        }
        loop {
            if let Some(obj) = self.buffer.pop_front() {
                self.yielded += 1;
                return Ok(Some(obj));
            }
            if self.done {
                return Ok(None);
            }
            let page_size = match self.max_results {
                Some(max) => (max - self.yielded).min(LIST_PAGE_SIZE),
                None => LIST_PAGE_SIZE,
            };
            let page = self
                .remote
                .call(
                    "list",
                    &self.prefix,
                    self.remote
                        .client
                        .list_page(&self.prefix, self.token.as_deref(), page_size),
                )
                .await?;
            self.done = page.next_token.is_none();
            self.token = page.next_token;
            self.buffer.extend(page.objects);
        }
    }

    /// Start over from the first key.
    pub fn restart(&mut self) {
        self.buffer.clear();
        self.token = None;
        self.done = false;
        self.yielded = 0;
    }

    pub async fn collect_all(mut self) -> Result<Vec<ObjectSummary>, TransferError> {
        let mut out = Vec::new();
        while let Some(obj) = self.next().await? {
            out.push(obj);
        }
        Ok(out)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Lowercase alphanumeric keys, values capped at 1024 characters.
pub fn clean_metadata(metadata: &BTreeMap<String, String>) -> BTreeMap<String, String> {
    metadata
        .iter()
        .filter_map(|(k, v)| {
            let key: String = k
                .chars()
                .filter(char::is_ascii_alphanumeric)
                .map(|c| c.to_ascii_lowercase())
                .collect();
            if key.is_empty() {
                return None;
            }
            Some((key, v.chars().take(METADATA_VALUE_LIMIT).collect()))
        })
        .collect()
}

/// Content type from the file extension.
pub fn guess_content_type(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "svg" => "image/svg+xml",
        "json" => "application/json",
        "txt" => "text/plain",
        _ => "application/octet-stream",
    }
}

/// Whether an error means the object is simply absent.
pub fn is_not_found(err: &TransferError) -> bool {
    err.class == TransferClass::NotFound
}
