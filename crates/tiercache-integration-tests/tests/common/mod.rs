//! Shared scaffolding for the scenario tests: an instrumented object store
//! that counts concurrent transfers and injects failures, and a harness
//! that opens an [`AssetCache`] over it in a scratch directory.

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use url::Url;

use tiercache_cache::{AssetCache, Registration};
use tiercache_core::{CacheConfig, CacheEntry, SemanticPath};
use tiercache_store::{
    BucketSettings, LifecycleRule, ListPage, MemoryObjectStore, ObjectStore, ObjectSummary,
    PutObject, TransferClass, TransferError,
};

/// Failure injected for keys containing a pattern.
#[derive(Debug, Clone, Copy)]
pub enum Fault {
    /// Every transfer fails.
    Always(TransferClass),
    /// The next `n` transfers fail, later ones succeed.
    Times(TransferClass, u32),
}

/// [`MemoryObjectStore`] wrapper that records peak concurrency of
/// `put_object`/`get_object` and fails the keys it is told to.
pub struct FaultyStore {
    inner: MemoryObjectStore,
    latency: Duration,
    faults: Mutex<Vec<(String, Fault)>>,
    transfers: Mutex<HashMap<String, u32>>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl FaultyStore {
    pub fn new() -> Self {
        Self::with_latency(Duration::ZERO)
    }

    /// Every transfer sleeps for `latency` while counted as in flight.
    pub fn with_latency(latency: Duration) -> Self {
        Self {
            inner: MemoryObjectStore::new("test-bucket"),
            latency,
            faults: Mutex::new(Vec::new()),
            transfers: Mutex::new(HashMap::new()),
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    pub fn inner(&self) -> &MemoryObjectStore {
        &self.inner
    }

    pub fn fail(&self, pattern: &str, fault: Fault) {
        self.faults.lock().push((pattern.to_string(), fault));
    }

    pub fn peak_in_flight(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    /// Transfer attempts made against keys containing `pattern`.
    pub fn attempts(&self, pattern: &str) -> u32 {
        self.transfers
            .lock()
            .iter()
            .filter(|(key, _)| key.contains(pattern))
            .map(|(_, n)| *n)
            .sum()
    }

    fn enter(&self) -> InFlight<'_> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        InFlight(&self.in_flight)
    }

    async fn transfer(&self, key: &str) -> Result<InFlight<'_>, TransferError> {
        let guard = self.enter();
        *self.transfers.lock().entry(key.to_string()).or_default() += 1;
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        let mut faults = self.faults.lock();
        for (pattern, fault) in faults.iter_mut() {
            if !key.contains(pattern.as_str()) {
                continue;
            }
            match fault {
                Fault::Always(class) => {
                    return Err(TransferError::new(*class, format!("injected failure for {key}")));
                }
                Fault::Times(class, remaining) if *remaining > 0 => {
                    *remaining -= 1;
                    return Err(TransferError::new(*class, format!("injected transient failure for {key}")));
                }
                Fault::Times(..) => {}
            }
        }
        Ok(guard)
    }
}

#[async_trait]
impl ObjectStore for FaultyStore {
    fn name(&self) -> &str {
        "faulty"
    }

    async fn put_object(&self, request: PutObject) -> Result<ObjectSummary, TransferError> {
        let _guard = self.transfer(&request.key).await?;
        self.inner.put_object(request).await
    }

    async fn get_object(&self, key: &str) -> Result<Vec<u8>, TransferError> {
        let _guard = self.transfer(key).await?;
        self.inner.get_object(key).await
    }

    async fn head_object(&self, key: &str) -> Result<Option<ObjectSummary>, TransferError> {
        self.inner.head_object(key).await
    }

    async fn delete_object(&self, key: &str) -> Result<(), TransferError> {
        self.inner.delete_object(key).await
    }

    async fn list_page(
        &self,
        prefix: &str,
        continuation: Option<&str>,
        max_keys: usize,
    ) -> Result<ListPage, TransferError> {
        self.inner.list_page(prefix, continuation, max_keys).await
    }

    async fn presign_get(&self, key: &str, ttl: Duration) -> Result<Url, TransferError> {
        self.inner.presign_get(key, ttl).await
    }

    async fn get_lifecycle(&self) -> Result<Vec<LifecycleRule>, TransferError> {
        self.inner.get_lifecycle().await
    }

    async fn put_lifecycle(&self, rules: Vec<LifecycleRule>) -> Result<(), TransferError> {
        self.inner.put_lifecycle(rules).await
    }

    async fn put_bucket_settings(&self, settings: BucketSettings) -> Result<(), TransferError> {
        self.inner.put_bucket_settings(settings).await
    }
}

/// A cache in a scratch directory over a [`FaultyStore`].
pub struct Harness {
    pub dir: tempfile::TempDir,
    pub store: Arc<FaultyStore>,
    pub cache: AssetCache,
}

impl Harness {
    pub fn new() -> Self {
        Self::build(FaultyStore::new(), |_| {})
    }

    pub fn build(store: FaultyStore, configure: impl FnOnce(&mut CacheConfig)) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config(&dir.path().join("cache"));
        configure(&mut config);
        let store = Arc::new(store);
        let cache = AssetCache::open(config, store.clone()).unwrap();
        Self { dir, store, cache }
    }

    /// A second cache over the same directory and bucket, as a new process
    /// would see it.
    pub fn reopen(&self) -> AssetCache {
        AssetCache::open(self.cache.config().clone(), self.store.clone()).unwrap()
    }

    pub fn write_file(&self, name: &str, contents: &[u8]) -> PathBuf {
        let path = self.dir.path().join("incoming").join(name);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, contents).unwrap();
        path
    }

    /// Register a transparent product named `name` with `contents`.
    pub fn product(&self, name: &str, contents: &[u8]) -> CacheEntry {
        let source = self.write_file(&format!("{name}.png"), contents);
        let path = SemanticPath::product("test-category", name, true);
        self.cache.register(Registration::new(path, source)).unwrap()
    }

    /// Absolute local-tier path of an entry.
    pub fn local_path(&self, entry: &CacheEntry) -> PathBuf {
        self.cache.registry().local_path(entry).unwrap()
    }
}

pub fn config(cache_dir: &std::path::Path) -> CacheConfig {
    CacheConfig {
        bucket_name: "test-bucket".to_string(),
        prefix: "assets".to_string(),
        cache_dir: cache_dir.to_path_buf(),
        retry_base_delay_ms: 1,
        ..CacheConfig::default()
    }
}
