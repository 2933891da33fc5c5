//! # tiercache-transfer: Batch Transfers
//!
//! Moves many artifacts between the local and remote tiers at once.
//!
//! - [`RetryPolicy`]: exponential backoff for transient failures only.
//! - [`Progress`]: batch counters and throughput.
//! - [`BatchTransferEngine`]: runs a batch with a fixed bound on in-flight
//!   transfers, isolating per-item failures and honoring cancellation.
//!
//! The engine never touches the registry. Callers apply results.

pub mod engine;
pub mod progress;
pub mod retry;

pub use engine::{
    BatchHandle, BatchOutcome, BatchTransferEngine, CancelSignal, ItemResult, ItemStatus,
    TransferJob,
};
pub use progress::Progress;
pub use retry::RetryPolicy;
