//! # Migration Subcommands
//!
//! Bulk movement between the local and remote tiers.
//!
//! ## Subcommands
//!
//! - `upload`: Plan and upload every local entry not yet in the bucket.
//! - `download`: Fetch every remote-only entry into the local tier.
//! - `validate`: Compare the registry against the bucket; exits 1 on drift.
//! - `estimate`: Monthly and yearly storage cost of the pending uploads.
//!
//! `upload` installs a Ctrl-C handler: unstarted items are cancelled and stay
//! pending so a later run picks them up.

use anyhow::{Context, Result};
use clap::Args;

use tiercache_cache::{AssetCache, FailedItem, MigrationPlan};
use tiercache_transfer::{CancelSignal, ItemStatus};

use crate::{format_bytes, print_json, FilterArgs};

/// Arguments for `tiercache upload`.
#[derive(Args, Debug)]
pub struct UploadArgs {
    #[command(flatten)]
    pub filter: FilterArgs,

    /// Print the plan and its estimated cost without uploading.
    #[arg(long)]
    pub dry_run: bool,

    /// Output as JSON.
    #[arg(long)]
    pub json: bool,
}

pub async fn run_upload(args: &UploadArgs, cache: &AssetCache) -> Result<u8> {
    let filter = args.filter.to_filter()?;
    let planner = cache.planner();
    let plan = planner.plan(&filter).context("failed to build migration plan")?;

    if args.dry_run {
        if args.json {
            print_json(&plan)?;
        } else {
            print_plan(&plan);
        }
        return Ok(0);
    }
    if plan.is_empty() {
        println!("Nothing to upload.");
        return Ok(0);
    }
    if !args.json {
        print_plan_summary(&plan);
    }

    let cancel = CancelSignal::new();
    let interrupt = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("interrupted; cancelling uploads that have not started");
                cancel.cancel();
            }
        })
    };
    let quiet = args.json;
    let result = planner
        .execute_with(&plan, &cancel, |progress, item| {
            if let ItemStatus::Failed(err) = &item.status {
                tracing::debug!(remote_key = %item.remote_key, error = %err, "upload failed");
            }
            if !quiet {
                eprintln!("[{:>5.1}%] {}", progress.percent_complete(), progress);
            }
        })
        .await;
    interrupt.abort();
    let result = result.context("migration aborted")?;

    if args.json {
        print_json(&result)?;
    } else {
        println!(
            "Uploaded {} of {} ({}) in {:.1}s, success rate {:.1}%",
            result.uploaded,
            plan.len(),
            format_bytes(result.bytes_uploaded),
            result.duration.as_secs_f64(),
            result.success_rate * 100.0
        );
        if result.cancelled > 0 {
            println!("Cancelled: {} (still pending)", result.cancelled);
        }
        print_failures(&result.failures);
        if !result.index_uploaded {
            println!("WARNING: metadata index was not uploaded");
        }
    }
    Ok(if result.is_complete() { 0 } else { 1 })
}

fn print_plan_summary(plan: &MigrationPlan) {
    let cost = &plan.estimated_cost;
    println!(
        "Plan: {} assets, {}, ~${:.2}/month in {}",
        plan.len(),
        format_bytes(plan.total_size),
        cost.monthly_usd,
        cost.storage_class.as_str()
    );
}

fn print_plan(plan: &MigrationPlan) {
    print_plan_summary(plan);
    for item in &plan.items {
        println!("  {:>10}  {} -> {}", format_bytes(item.size_bytes), item.key, item.remote_key);
    }
}

fn print_failures(failures: &[FailedItem]) {
    if failures.is_empty() {
        return;
    }
    println!("Failures ({}):", failures.len());
    for f in failures {
        println!("  {} [{}] {}", f.key, f.class.as_str(), f.message);
    }
}

/// Arguments for `tiercache download`.
#[derive(Args, Debug)]
pub struct DownloadArgs {
    #[command(flatten)]
    pub filter: FilterArgs,

    /// Output as JSON.
    #[arg(long)]
    pub json: bool,
}

pub async fn run_download(args: &DownloadArgs, cache: &AssetCache) -> Result<u8> {
    let filter = args.filter.to_filter()?;
    let result = cache.download(&filter).await.context("download aborted")?;
    if args.json {
        print_json(&result)?;
    } else {
        println!(
            "Downloaded {} of {} ({})",
            result.downloaded,
            result.progress.total,
            format_bytes(result.progress.bytes_transferred)
        );
        print_failures(&result.failures);
    }
    Ok(if result.failures.is_empty() { 0 } else { 1 })
}

/// Arguments for `tiercache validate`.
#[derive(Args, Debug)]
pub struct ValidateArgs {
    #[command(flatten)]
    pub filter: FilterArgs,

    /// Download objects whose metadata carries no checksum and hash them.
    #[arg(long)]
    pub deep: bool,

    /// Output as JSON.
    #[arg(long)]
    pub json: bool,
}

pub async fn run_validate(args: &ValidateArgs, cache: &AssetCache) -> Result<u8> {
    let filter = args.filter.to_filter()?;
    let report = cache.planner().validate(&filter, args.deep).await;
    if args.json {
        print_json(&report)?;
    } else {
        println!("Checked {} uploaded entries", report.checked);
        for key in &report.missing {
            println!("  MISSING   {key}");
        }
        for m in &report.size_mismatches {
            println!("  SIZE      {} (expected {}, found {})", m.key, m.expected, m.actual);
        }
        for m in &report.checksum_mismatches {
            println!("  CHECKSUM  {} (expected {}, found {})", m.key, m.expected, m.actual);
        }
        for key in &report.unverified {
            println!("  UNVERIFIED {key}");
        }
        print_failures(&report.errors);
        if report.is_clean() {
            println!("OK: registry and remote tier agree");
        } else {
            println!("FAIL: {} mismatches", report.mismatch_count());
        }
    }
    Ok(if report.is_clean() { 0 } else { 1 })
}

/// Arguments for `tiercache estimate`.
#[derive(Args, Debug)]
pub struct EstimateArgs {
    #[command(flatten)]
    pub filter: FilterArgs,

    /// Output as JSON.
    #[arg(long)]
    pub json: bool,
}

pub fn run_estimate(args: &EstimateArgs, cache: &AssetCache) -> Result<u8> {
    let filter = args.filter.to_filter()?;
    let planner = cache.planner();
    let plan = planner.plan(&filter).context("failed to build migration plan")?;
    let estimates = planner.estimate_all(&plan);
    if args.json {
        print_json(&estimates)?;
        return Ok(0);
    }
    println!("{} pending assets, {}", plan.len(), format_bytes(plan.total_size));
    println!("{:<20} {:>12} {:>12}", "STORAGE CLASS", "MONTHLY", "YEARLY");
    for e in &estimates {
        println!(
            "{:<20} {:>12} {:>12}",
            e.storage_class.as_str(),
            format!("${:.4}", e.monthly_usd),
            format!("${:.4}", e.yearly_usd)
        );
    }
    Ok(0)
}
