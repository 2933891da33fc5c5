//! # Filesystem Object Store
//!
//! Emulates an S3 bucket inside a directory so the CLI and integration
//! tests can exercise the remote tier without network access.
//!
//! ## Layout
//!
//! ```text
//! {root}/objects/{key}          object body
//! {root}/meta/{key}.json        ObjectSummary sidecar (metadata, tags, class)
//! {root}/bucket/lifecycle.json  lifecycle rules
//! {root}/bucket/settings.json   versioning and encryption flags
//! ```
//!
//! Keys are validated so that no key resolves outside `objects/`.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tempfile::NamedTempFile;
use url::Url;

use crate::error::{TransferClass, TransferError};
use crate::object::{
    append_presign_query, paginate, BucketSettings, LifecycleRule, ListPage, ObjectStore,
    ObjectSummary, PutObject,
};

/// A bucket emulated on the local filesystem.
#[derive(Debug, Clone)]
pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn object_path(&self, key: &str) -> Result<PathBuf, TransferError> {
        validate_key(key)?;
        Ok(self.root.join("objects").join(key))
    }

    fn meta_path(&self, key: &str) -> Result<PathBuf, TransferError> {
        validate_key(key)?;
        Ok(self.root.join("meta").join(format!("{key}.json")))
    }

    fn bucket_path(&self, name: &str) -> PathBuf {
        self.root.join("bucket").join(name)
    }
}

fn validate_key(key: &str) -> Result<(), TransferError> {
    let clean = !key.is_empty()
        && !key.contains('\\')
        && key
            .split('/')
            .all(|segment| !segment.is_empty() && segment != "." && segment != "..");
    if clean {
        Ok(())
    } else {
        Err(TransferError::other(format!("invalid object key {key:?}")))
    }
}

fn classify_io(context: &str, err: std::io::Error) -> TransferError {
    let class = match err.kind() {
        std::io::ErrorKind::NotFound => TransferClass::NotFound,
        std::io::ErrorKind::PermissionDenied => TransferClass::Auth,
        std::io::ErrorKind::TimedOut | std::io::ErrorKind::Interrupted => TransferClass::Network,
        _ => TransferClass::Other,
    };
    TransferError::new(class, format!("{context}: {err}"))
}

/// Write through a `NamedTempFile` beside `path` and persist it over `path`.
async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), TransferError> {
    let path = path.to_path_buf();
    let bytes = bytes.to_vec();
    tokio::task::spawn_blocking(move || {
        let parent = path
            .parent()
            .ok_or_else(|| TransferError::other(format!("no parent for {}", path.display())))?;
        std::fs::create_dir_all(parent).map_err(|e| classify_io("create directory", e))?;
        let temp = NamedTempFile::new_in(parent).map_err(|e| classify_io("create temp file", e))?;
        temp.as_file()
            .write_all(&bytes)
            .map_err(|e| classify_io("write object", e))?;
        temp.as_file()
            .sync_all()
            .map_err(|e| classify_io("sync object", e))?;
        temp.persist(&path)
            .map_err(|e| classify_io("commit object", e.error))?;
        Ok(())
    })
    .await
    .map_err(|e| TransferError::other(format!("write task failed: {e}")))?
}

async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, TransferError> {
    match tokio::fs::read(path).await {
        Ok(bytes) => serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| TransferError::other(format!("corrupt sidecar {}: {e}", path.display()))),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(classify_io("read sidecar", e)),
    }
}

async fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), TransferError> {
    let bytes = serde_json::to_vec_pretty(value)
        .map_err(|e| TransferError::other(format!("serialize sidecar: {e}")))?;
    write_atomic(path, &bytes).await
}

/// Every sidecar under `meta_root`, parsed.
fn scan_sidecars(meta_root: &Path) -> Result<Vec<ObjectSummary>, TransferError> {
    let mut out = Vec::new();
    let mut stack = vec![meta_root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let entries = match std::fs::read_dir(&dir) {
            Ok(rd) => rd,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
            Err(e) => return Err(classify_io("list objects", e)),
        };
        for entry in entries {
            let entry = entry.map_err(|e| classify_io("list objects", e))?;
            let path = entry.path();
            if path.is_dir() {
                stack.push(path);
            } else if path.extension().is_some_and(|ext| ext == "json") {
                let bytes = std::fs::read(&path).map_err(|e| classify_io("read sidecar", e))?;
                let summary: ObjectSummary = serde_json::from_slice(&bytes).map_err(|e| {
                    TransferError::other(format!("corrupt sidecar {}: {e}", path.display()))
                })?;
                out.push(summary);
            }
        }
    }
    Ok(out)
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    fn name(&self) -> &str {
        "fs"
    }

    async fn put_object(&self, request: PutObject) -> Result<ObjectSummary, TransferError> {
        let object_path = self.object_path(&request.key)?;
        let meta_path = self.meta_path(&request.key)?;
        write_atomic(&object_path, &request.body).await?;
        let summary = ObjectSummary {
            key: request.key,
            size: request.body.len() as u64,
            last_modified: Utc::now(),
            storage_class: request.storage_class,
            content_type: request.content_type,
            metadata: request.metadata,
            tags: request.tags,
        };
        write_json(&meta_path, &summary).await?;
        Ok(summary)
    }

    async fn get_object(&self, key: &str) -> Result<Vec<u8>, TransferError> {
        let path = self.object_path(key)?;
        tokio::fs::read(&path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                TransferError::not_found(key)
            } else {
                classify_io("read object", e)
            }
        })
    }

    async fn head_object(&self, key: &str) -> Result<Option<ObjectSummary>, TransferError> {
        let meta_path = self.meta_path(key)?;
        let Some(mut summary) = read_json::<ObjectSummary>(&meta_path).await? else {
            return Ok(None);
        };
        // The body is authoritative for size if it was changed out of band.
        match tokio::fs::metadata(self.object_path(key)?).await {
            Ok(meta) => {
                summary.size = meta.len();
                Ok(Some(summary))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(classify_io("stat object", e)),
        }
    }

    async fn delete_object(&self, key: &str) -> Result<(), TransferError> {
        for path in [self.object_path(key)?, self.meta_path(key)?] {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(classify_io("delete object", e)),
            }
        }
        Ok(())
    }

    async fn list_page(
        &self,
        prefix: &str,
        continuation: Option<&str>,
        max_keys: usize,
    ) -> Result<ListPage, TransferError> {
        let meta_root = self.root.join("meta");
        let mut all = tokio::task::spawn_blocking(move || scan_sidecars(&meta_root))
            .await
            .map_err(|e| TransferError::other(format!("listing task failed: {e}")))??;
        all.retain(|o| o.key.starts_with(prefix));
        all.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(paginate(all, continuation, max_keys))
    }

    async fn presign_get(&self, key: &str, ttl: Duration) -> Result<Url, TransferError> {
        let path = self.object_path(key)?;
        let absolute = tokio::fs::canonicalize(&path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                TransferError::not_found(key)
            } else {
                classify_io("resolve object", e)
            }
        })?;
        let mut url = Url::from_file_path(&absolute)
            .map_err(|()| TransferError::other(format!("not a file URL: {}", absolute.display())))?;
        append_presign_query(&mut url, ttl, Utc::now());
        Ok(url)
    }

    async fn get_lifecycle(&self) -> Result<Vec<LifecycleRule>, TransferError> {
        Ok(read_json(&self.bucket_path("lifecycle.json"))
            .await?
            .unwrap_or_default())
    }

    async fn put_lifecycle(&self, rules: Vec<LifecycleRule>) -> Result<(), TransferError> {
        write_json(&self.bucket_path("lifecycle.json"), &rules).await
    }

    async fn put_bucket_settings(&self, settings: BucketSettings) -> Result<(), TransferError> {
        write_json(&self.bucket_path("settings.json"), &settings).await
    }
}
