//! In-memory [`ObjectStore`] for tests and dry runs.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use tiercache_core::StorageClass;
use url::Url;

use crate::error::TransferError;
use crate::object::{
    append_presign_query, paginate, BucketSettings, LifecycleRule, ListPage, ObjectStore,
    ObjectSummary, PutObject,
};

struct StoredObject {
    summary: ObjectSummary,
    body: Vec<u8>,
}

/// A bucket held in process memory.
pub struct MemoryObjectStore {
    bucket: String,
    objects: Mutex<BTreeMap<String, StoredObject>>,
    lifecycle: Mutex<Vec<LifecycleRule>>,
    settings: Mutex<Option<BucketSettings>>,
    lifecycle_writes: AtomicUsize,
}

impl MemoryObjectStore {
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            objects: Mutex::new(BTreeMap::new()),
            lifecycle: Mutex::new(Vec::new()),
            settings: Mutex::new(None),
            lifecycle_writes: AtomicUsize::new(0),
        }
    }

    pub fn object_count(&self) -> usize {
        self.objects.lock().len()
    }

    pub fn keys(&self) -> Vec<String> {
        self.objects.lock().keys().cloned().collect()
    }

    pub fn body(&self, key: &str) -> Option<Vec<u8>> {
        self.objects.lock().get(key).map(|o| o.body.clone())
    }

    /// Replace an object's bytes while keeping its metadata, as a
    /// corrupted or externally modified object would look.
    pub fn replace_body(&self, key: &str, body: Vec<u8>) -> bool {
        let mut objects = self.objects.lock();
        match objects.get_mut(key) {
            Some(obj) => {
                obj.summary.size = body.len() as u64;
                obj.body = body;
                true
            }
            None => false,
        }
    }

    /// How many times the lifecycle configuration was written.
    pub fn lifecycle_writes(&self) -> usize {
        self.lifecycle_writes.load(Ordering::SeqCst)
    }

    pub fn bucket_settings(&self) -> Option<BucketSettings> {
        *self.settings.lock()
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn put_object(&self, request: PutObject) -> Result<ObjectSummary, TransferError> {
        let summary = ObjectSummary {
            key: request.key.clone(),
            size: request.body.len() as u64,
            last_modified: Utc::now(),
            storage_class: request.storage_class,
            content_type: request.content_type,
            metadata: request.metadata,
            tags: request.tags,
        };
        self.objects.lock().insert(
            request.key,
            StoredObject {
                summary: summary.clone(),
                body: request.body,
            },
        );
        Ok(summary)
    }

    async fn get_object(&self, key: &str) -> Result<Vec<u8>, TransferError> {
        self.body(key).ok_or_else(|| TransferError::not_found(key))
    }

    async fn head_object(&self, key: &str) -> Result<Option<ObjectSummary>, TransferError> {
        Ok(self.objects.lock().get(key).map(|o| o.summary.clone()))
    }

    async fn delete_object(&self, key: &str) -> Result<(), TransferError> {
        self.objects.lock().remove(key);
        Ok(())
    }

    async fn list_page(
        &self,
        prefix: &str,
        continuation: Option<&str>,
        max_keys: usize,
    ) -> Result<ListPage, TransferError> {
        let matching: Vec<ObjectSummary> = self
            .objects
            .lock()
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(_, o)| o.summary.clone())
            .collect();
        Ok(paginate(matching, continuation, max_keys))
    }

    async fn presign_get(&self, key: &str, ttl: Duration) -> Result<Url, TransferError> {
        if !self.objects.lock().contains_key(key) {
            return Err(TransferError::not_found(key));
        }
        let mut url = Url::parse(&format!("memory://{}/", self.bucket))
            .and_then(|base| base.join(key))
            .map_err(|e| TransferError::other(format!("cannot build URL for {key}: {e}")))?;
        append_presign_query(&mut url, ttl, Utc::now());
        Ok(url)
    }

    async fn get_lifecycle(&self) -> Result<Vec<LifecycleRule>, TransferError> {
        Ok(self.lifecycle.lock().clone())
    }

    async fn put_lifecycle(&self, rules: Vec<LifecycleRule>) -> Result<(), TransferError> {
        *self.lifecycle.lock() = rules;
        self.lifecycle_writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn put_bucket_settings(&self, settings: BucketSettings) -> Result<(), TransferError> {
        *self.settings.lock() = Some(settings);
        Ok(())
    }
}

impl std::fmt::Debug for MemoryObjectStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryObjectStore")
            .field("bucket", &self.bucket)
            .field("objects", &self.object_count())
            .finish()
    }
}
