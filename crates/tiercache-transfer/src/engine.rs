//! # Batch Transfer Engine
//!
//! Runs many uploads or downloads against the remote tier in parallel.
//!
//! ## Guarantees
//!
//! - **Bounded concurrency.** An engine-wide semaphore with `N` permits is
//!   held for the duration of every attempt, so no more than `N` transfers
//!   are in flight across all batches sharing the engine.
//! - **Isolation.** Items are independent tasks. A failure is recorded in
//!   that item's result and never cancels or blocks its siblings.
//! - **Single aggregator.** The driver loop owns the [`Progress`] value and
//!   updates it as each task joins; observers see consistent snapshots.
//! - **Cancellation.** A cancelled batch starts no new transfers. In-flight
//!   ones complete, and items never started come back as `Cancelled`.
//!
//! Results are returned in input order regardless of completion order.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tiercache_core::{CacheConfig, Checksum};
use tiercache_store::{RemoteStore, TransferError, META_CHECKSUM};
use tokio::sync::{watch, Semaphore};
use tokio::task::{JoinHandle, JoinSet};

use crate::progress::Progress;
use crate::retry::RetryPolicy;

/// Progress is logged every this many finished items.
const LOG_EVERY: usize = 10;

/// One unit of work.
#[derive(Debug, Clone)]
pub enum TransferJob {
    Upload {
        local_path: PathBuf,
        remote_key: String,
        metadata: BTreeMap<String, String>,
        tags: BTreeMap<String, String>,
    },
    Download {
        remote_key: String,
        local_path: PathBuf,
    },
}

impl TransferJob {
    pub fn upload(
        local_path: impl Into<PathBuf>,
        remote_key: impl Into<String>,
        metadata: BTreeMap<String, String>,
    ) -> Self {
        Self::Upload {
            local_path: local_path.into(),
            remote_key: remote_key.into(),
            metadata,
            tags: BTreeMap::new(),
        }
    }

    pub fn download(remote_key: impl Into<String>, local_path: impl Into<PathBuf>) -> Self {
        Self::Download {
            remote_key: remote_key.into(),
            local_path: local_path.into(),
        }
    }

    pub fn with_tags(mut self, new_tags: BTreeMap<String, String>) -> Self {
        if let Self::Upload { tags, .. } = &mut self {
            *tags = new_tags;
        }
        self
    }

    pub fn remote_key(&self) -> &str {
        match self {
            Self::Upload { remote_key, .. } | Self::Download { remote_key, .. } => remote_key,
        }
    }

    pub fn local_path(&self) -> &PathBuf {
        match self {
            Self::Upload { local_path, .. } | Self::Download { local_path, .. } => local_path,
        }
    }
}

/// Final state of one item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemStatus {
    Succeeded {
        bytes: u64,
        /// Checksum of the transferred content, when known.
        checksum: Option<Checksum>,
    },
    Failed(TransferError),
    Cancelled,
}

/// Per-item result, reported in input order.
#[derive(Debug, Clone)]
pub struct ItemResult {
    /// Position of the job in the submitted batch.
    pub index: usize,
    pub remote_key: String,
    pub local_path: PathBuf,
    pub status: ItemStatus,
    pub attempts: u32,
    pub duration: Duration,
}

impl ItemResult {
    fn unstarted(index: usize, job: &TransferJob, status: ItemStatus) -> Self {
        Self {
            index,
            remote_key: job.remote_key().to_string(),
            local_path: job.local_path().clone(),
            status,
            attempts: 0,
            duration: Duration::ZERO,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.status, ItemStatus::Succeeded { .. })
    }

    pub fn error(&self) -> Option<&TransferError> {
        match &self.status {
            ItemStatus::Failed(e) => Some(e),
            _ => None,
        }
    }

    pub fn bytes(&self) -> u64 {
        match self.status {
            ItemStatus::Succeeded { bytes, .. } => bytes,
            _ => 0,
        }
    }
}

/// Everything a finished batch reports.
#[derive(Debug, Clone)]
pub struct BatchOutcome {
    pub results: Vec<ItemResult>,
    pub progress: Progress,
}

impl BatchOutcome {
    pub fn succeeded(&self) -> usize {
        self.progress.completed
    }

    pub fn failures(&self) -> impl Iterator<Item = &ItemResult> {
        self.results.iter().filter(|r| r.error().is_some())
    }

    /// Share of items that succeeded, as a percentage. Empty batches report 0.
    pub fn success_rate(&self) -> f64 {
        if self.progress.total == 0 {
            return 0.0;
        }
        self.progress.completed as f64 / self.progress.total as f64 * 100.0
    }
}

/// Cooperative cancellation flag shared between a caller and a batch.
#[derive(Debug, Clone, Default)]
pub struct CancelSignal(Arc<AtomicBool>);

impl CancelSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// A batch running in the background.
pub struct BatchHandle {
    /// Latest progress snapshot; updated after every item.
    pub progress: watch::Receiver<Progress>,
    pub cancel: CancelSignal,
    task: JoinHandle<BatchOutcome>,
}

impl BatchHandle {
    pub async fn wait(self) -> Result<BatchOutcome, tokio::task::JoinError> {
        self.task.await
    }
}

/// Parallel transfer executor over a [`RemoteStore`].
#[derive(Debug, Clone)]
pub struct BatchTransferEngine {
    remote: RemoteStore,
    permits: Arc<Semaphore>,
    max_in_flight: usize,
    retry: RetryPolicy,
}

impl BatchTransferEngine {
    pub fn new(remote: RemoteStore, max_in_flight: usize, retry: RetryPolicy) -> Self {
        let max_in_flight = max_in_flight.max(1);
        Self {
            remote,
            permits: Arc::new(Semaphore::new(max_in_flight)),
            max_in_flight,
            retry,
        }
    }

    pub fn from_config(remote: RemoteStore, config: &CacheConfig) -> Self {
        Self::new(
            remote,
            config.max_parallel_transfers,
            RetryPolicy::from_config(config),
        )
    }

    pub fn remote(&self) -> &RemoteStore {
        &self.remote
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight
    }

    /// Run a batch to completion.
    pub async fn run_all(&self, jobs: Vec<TransferJob>) -> BatchOutcome {
        self.run(jobs, &CancelSignal::new(), |_, _| {}).await
    }

    /// Run a batch, invoking `observer` synchronously after each item.
    pub async fn run<F>(
        &self,
        jobs: Vec<TransferJob>,
        cancel: &CancelSignal,
        mut observer: F,
    ) -> BatchOutcome
    where
        F: FnMut(&Progress, &ItemResult),
    {
        let started = Instant::now();
        let total = jobs.len();
        let mut progress = Progress::new(total);
        let mut results: Vec<Option<ItemResult>> = (0..total).map(|_| None).collect();
        let mut spawned = vec![false; total];
        let mut pending = jobs.iter().cloned().enumerate();
        let mut tasks = JoinSet::new();
        let mut exhausted = false;

        tracing::info!(items = total, max_in_flight = self.max_in_flight, "starting transfer batch");

        loop {
            while !exhausted && tasks.len() < self.max_in_flight && !cancel.is_cancelled() {
                match pending.next() {
                    Some((index, job)) => {
                        spawned[index] = true;
                        let worker = Worker {
                            remote: self.remote.clone(),
                            permits: Arc::clone(&self.permits),
                            retry: self.retry,
                            cancel: cancel.clone(),
                        };
                        tasks.spawn(async move { worker.execute(index, job).await });
                    }
                    None => exhausted = true,
                }
            }

            match tasks.join_next().await {
                Some(Ok(result)) => {
                    match &result.status {
                        ItemStatus::Succeeded { bytes, .. } => {
                            progress.completed += 1;
                            progress.bytes_transferred += bytes;
                        }
                        ItemStatus::Failed(_) => progress.failed += 1,
                        ItemStatus::Cancelled => progress.cancelled += 1,
                    }
                    progress.elapsed = started.elapsed();
                    observer(&progress, &result);
                    if progress.processed() % LOG_EVERY == 0 {
                        tracing::info!("transfer progress: {progress}");
                    }
                    let index = result.index;
                    results[index] = Some(result);
                }
                Some(Err(e)) => {
                    // The task's index is lost; it is filled in below.
                    tracing::error!("transfer task aborted: {e}");
                }
                None => break,
            }
        }

        let results: Vec<ItemResult> = results
            .into_iter()
            .enumerate()
            .map(|(index, slot)| match slot {
                Some(result) => result,
                None => {
                    let job = &jobs[index];
                    if spawned[index] {
                        progress.failed += 1;
                        ItemResult::unstarted(
                            index,
                            job,
                            ItemStatus::Failed(TransferError::other("transfer task aborted")),
                        )
                    } else {
                        progress.cancelled += 1;
                        ItemResult::unstarted(index, job, ItemStatus::Cancelled)
                    }
                }
            })
            .collect();
        progress.elapsed = started.elapsed();

        tracing::info!(
            completed = progress.completed,
            failed = progress.failed,
            cancelled = progress.cancelled,
            "transfer batch finished: {progress}"
        );
        BatchOutcome { results, progress }
    }

    /// Start a batch in the background with a pollable progress channel.
    pub fn spawn(&self, jobs: Vec<TransferJob>) -> BatchHandle {
        let (tx, rx) = watch::channel(Progress::new(jobs.len()));
        let cancel = CancelSignal::new();
        let engine = self.clone();
        let task_cancel = cancel.clone();
        let task = tokio::spawn(async move {
            let outcome = engine
                .run(jobs, &task_cancel, |progress, _| {
                    let _ = tx.send(*progress);
                })
                .await;
            let _ = tx.send(outcome.progress);
            outcome
        });
        BatchHandle {
            progress: rx,
            cancel,
            task,
        }
    }
}

/// State moved into each spawned transfer task.
struct Worker {
    remote: RemoteStore,
    permits: Arc<Semaphore>,
    retry: RetryPolicy,
    cancel: CancelSignal,
}

impl Worker {
    async fn execute(self, index: usize, job: TransferJob) -> ItemResult {
        let started = Instant::now();
        if self.cancel.is_cancelled() {
            return ItemResult::unstarted(index, &job, ItemStatus::Cancelled);
        }
        let cancel = self.cancel.clone();
        let (result, attempts) = self
            .retry
            .run(job.remote_key(), || !cancel.is_cancelled(), || self.attempt(&job))
            .await;
        let status = match result {
            Ok((bytes, checksum)) => ItemStatus::Succeeded { bytes, checksum },
            Err(e) => {
                tracing::warn!(key = job.remote_key(), class = %e.class, attempts, "transfer failed: {}", e.message);
                ItemStatus::Failed(e)
            }
        };
        ItemResult {
            index,
            remote_key: job.remote_key().to_string(),
            local_path: job.local_path().clone(),
            status,
            attempts,
            duration: started.elapsed(),
        }
    }

    /// One attempt, holding an engine permit throughout.
    async fn attempt(&self, job: &TransferJob) -> Result<(u64, Option<Checksum>), TransferError> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| TransferError::other("transfer engine closed"))?;
        match job {
            TransferJob::Upload {
                local_path,
                remote_key,
                metadata,
                tags,
            } => {
                let summary = self
                    .remote
                    .try_upload(local_path, remote_key, metadata, tags)
                    .await?;
                let checksum = summary
                    .metadata
                    .get(META_CHECKSUM)
                    .and_then(|hex| Checksum::from_hex(hex).ok());
                Ok((summary.size, checksum))
            }
            TransferJob::Download {
                remote_key,
                local_path,
            } => {
                let (checksum, size) = self.remote.try_download(remote_key, local_path).await?;
                Ok((size, Some(checksum)))
            }
        }
    }
}
