//! Batch transfer scenarios against an instrumented object store.

mod common;

use std::time::Duration;

use common::{Fault, FaultyStore, Harness};
use tiercache_core::{Checksum, EntryFilter, TierState, UploadStatus};
use tiercache_store::{TransferClass, TransferError};
use tiercache_transfer::{CancelSignal, ItemStatus, TransferJob};

fn register_batch(h: &Harness, n: usize) -> Vec<tiercache_core::CacheEntry> {
    (0..n)
        .map(|i| h.product(&format!("item-{i:02}"), format!("payload {i}").as_bytes()))
        .collect()
}

#[tokio::test]
async fn upload_then_download_round_trips_checksums() {
    let h = Harness::new();
    let entry = h.product("round-trip", b"\x89PNG fake image bytes");
    let plan = h.cache.planner().plan(&EntryFilter::all()).unwrap();
    let result = h.cache.planner().execute(&plan, |_, _| {}).await.unwrap();
    assert!(result.is_complete());

    let target = h.dir.path().join("copy.png");
    let (checksum, size) = h
        .cache
        .remote()
        .try_download(&entry.remote_key, &target)
        .await
        .unwrap();
    assert_eq!(checksum, entry.checksum);
    assert_eq!(size, entry.size_bytes);
    assert_eq!(Checksum::of_bytes(&std::fs::read(&target).unwrap()), entry.checksum);
}

#[tokio::test]
async fn in_flight_transfers_never_exceed_the_limit() {
    let store = FaultyStore::with_latency(Duration::from_millis(15));
    let h = Harness::build(store, |c| c.max_parallel_transfers = 4);
    register_batch(&h, 20);

    let plan = h.cache.planner().plan(&EntryFilter::all()).unwrap();
    assert_eq!(plan.len(), 20);
    let result = h.cache.planner().execute(&plan, |_, _| {}).await.unwrap();

    assert_eq!(result.uploaded, 20);
    let peak = h.store.peak_in_flight();
    assert!(peak <= 4, "peak in-flight transfers was {peak}");
    assert!(peak >= 2, "transfers never overlapped (peak {peak})");
}

#[tokio::test]
async fn failures_are_isolated_to_their_items() {
    let store = FaultyStore::new();
    store.fail("item-03", Fault::Always(TransferClass::Auth));
    store.fail("item-07", Fault::Always(TransferClass::Other));
    let h = Harness::build(store, |_| {});
    let entries = register_batch(&h, 10);

    let plan = h.cache.planner().plan(&EntryFilter::all()).unwrap();
    let result = h.cache.planner().execute(&plan, |_, _| {}).await.unwrap();

    assert_eq!(result.uploaded, 8);
    assert_eq!(result.failed, 2);
    assert!(!result.is_complete());
    let mut failed: Vec<&str> = result.failures.iter().map(|f| f.key.as_str()).collect();
    failed.sort_unstable();
    assert_eq!(failed, vec![entries[3].key.as_str(), entries[7].key.as_str()]);
    let auth = result.failures.iter().find(|f| f.key == entries[3].key).unwrap();
    assert_eq!(auth.class, TransferClass::Auth);

    for (i, entry) in entries.iter().enumerate() {
        let now = h.cache.lookup(&entry.key).unwrap();
        if i == 3 || i == 7 {
            assert!(matches!(now.upload_status, Some(UploadStatus::Failed { .. })));
            assert_eq!(now.tier_state, TierState::LocalOnly);
        } else {
            assert_eq!(now.upload_status, Some(UploadStatus::Uploaded));
            assert_eq!(now.tier_state, TierState::Both);
        }
    }
    // Permanent failures are not retried.
    assert_eq!(h.store.attempts("item-03"), 1);

    // Failed items are planned again on the next run.
    let retry_plan = h.cache.planner().plan(&EntryFilter::all()).unwrap();
    assert_eq!(retry_plan.len(), 2);
}

#[tokio::test]
async fn transient_failures_are_retried_within_budget() {
    let store = FaultyStore::new();
    store.fail("item-01", Fault::Times(TransferClass::Throttled, 2));
    store.fail("item-02", Fault::Times(TransferClass::Network, 5));
    let h = Harness::build(store, |c| c.retry_attempts = 3);
    let entries = register_batch(&h, 3);

    let plan = h.cache.planner().plan(&EntryFilter::all()).unwrap();
    let result = h.cache.planner().execute(&plan, |_, _| {}).await.unwrap();

    assert_eq!(result.uploaded, 2);
    assert_eq!(h.store.attempts("item-01"), 3);
    assert_eq!(h.store.attempts("item-02"), 3);
    assert!(h.cache.lookup(&entries[1].key).unwrap().is_uploaded());
    let failure = &result.failures[0];
    assert_eq!(failure.key, entries[2].key);
    assert_eq!(failure.class, TransferClass::Network);
}

#[tokio::test]
async fn cancellation_leaves_unstarted_items_pending() {
    let h = Harness::build(FaultyStore::new(), |c| c.max_parallel_transfers = 1);
    register_batch(&h, 6);
    let plan = h.cache.planner().plan(&EntryFilter::all()).unwrap();

    let cancel = CancelSignal::new();
    let trigger = cancel.clone();
    let result = h
        .cache
        .planner()
        .execute_with(&plan, &cancel, move |progress, _| {
            if progress.processed() == 2 {
                trigger.cancel();
            }
        })
        .await
        .unwrap();

    assert_eq!(result.uploaded, 2);
    assert_eq!(result.cancelled, 4);
    assert_eq!(result.failed, 0);
    let pending = h
        .cache
        .registry()
        .list(&EntryFilter::all())
        .filter(|e| e.upload_status == Some(UploadStatus::Pending))
        .count();
    assert_eq!(pending, 4);
    // A later run picks the cancelled items up.
    assert_eq!(h.cache.planner().plan(&EntryFilter::all()).unwrap().len(), 4);
}

#[tokio::test]
async fn engine_reports_results_in_submission_order() {
    let store = FaultyStore::with_latency(Duration::from_millis(5));
    store.fail("item-02", Fault::Always(TransferClass::NotFound));
    let h = Harness::build(store, |_| {});
    let entries = register_batch(&h, 5);
    let jobs: Vec<TransferJob> = entries
        .iter()
        .map(|e| TransferJob::upload(h.local_path(e), &e.remote_key, Default::default()))
        .collect();

    let outcome = h.cache.engine().run_all(jobs).await;

    let keys: Vec<&str> = outcome.results.iter().map(|r| r.remote_key.as_str()).collect();
    let expected: Vec<&str> = entries.iter().map(|e| e.remote_key.as_str()).collect();
    assert_eq!(keys, expected);
    assert_eq!(outcome.succeeded(), 4);
    assert!(matches!(
        &outcome.results[2].status,
        ItemStatus::Failed(TransferError { class: TransferClass::NotFound, .. })
    ));
    assert_eq!(outcome.progress.completed, 4);
    assert_eq!(outcome.progress.failed, 1);
}
