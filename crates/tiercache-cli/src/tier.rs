//! # Tier-Manage Subcommand
//!
//! Moves entries between tiers. With `--promote` or `--demote` only the
//! named keys move; otherwise every entry is rebalanced by recency:
//! entries untouched for `--cold-days` leave the local tier, recently used
//! remote-only entries come back.

use anyhow::{Context, Result};
use clap::Args;

use tiercache_cache::{AssetCache, RebalanceFailure, RebalanceReport, TierAction};

use crate::print_json;

/// Arguments for `tiercache tier-manage`.
#[derive(Args, Debug)]
pub struct TierManageArgs {
    /// Days without access after which an entry is cold.
    /// Defaults to `cold_threshold_days` from the configuration.
    #[arg(long)]
    pub cold_days: Option<u32>,

    /// Do not bring hot remote-only entries back to the local tier.
    #[arg(long)]
    pub no_promote: bool,

    /// Do not move cold entries off the local tier.
    #[arg(long)]
    pub no_demote: bool,

    /// Promote only this key. Repeatable.
    #[arg(long, value_name = "KEY")]
    pub promote: Vec<String>,

    /// Demote only this key. Repeatable.
    #[arg(long, value_name = "KEY")]
    pub demote: Vec<String>,

    /// Output as JSON.
    #[arg(long)]
    pub json: bool,
}

pub async fn run_tier_manage(args: &TierManageArgs, cache: &AssetCache) -> Result<u8> {
    let report = if !args.promote.is_empty() || !args.demote.is_empty() {
        move_named(args, cache).await
    } else {
        let cold_days = args.cold_days.unwrap_or(cache.config().cold_threshold_days);
        cache
            .tiers()
            .rebalance(cold_days, !args.no_promote, !args.no_demote)
            .await
    };

    if args.json {
        print_json(&report)?;
    } else {
        for key in &report.promoted {
            println!("  PROMOTED  {key}");
        }
        for key in &report.demoted {
            println!("  DEMOTED   {key}");
        }
        for f in &report.failures {
            let action = match f.action {
                TierAction::Promote => "promote",
                TierAction::Demote => "demote",
            };
            println!("  FAILED    {} ({action}): {}", f.key, f.error);
        }
        println!(
            "{} promoted, {} demoted, {} unchanged, {} failed",
            report.promoted.len(),
            report.demoted.len(),
            report.unchanged,
            report.failures.len()
        );
    }
    Ok(if report.is_clean() { 0 } else { 1 })
}

async fn move_named(args: &TierManageArgs, cache: &AssetCache) -> RebalanceReport {
    let mut report = RebalanceReport::default();
    let moves = args
        .promote
        .iter()
        .map(|k| (k, TierAction::Promote))
        .chain(args.demote.iter().map(|k| (k, TierAction::Demote)));
    for (key, action) in moves {
        let result = match action {
            TierAction::Promote => cache.tiers().promote(key).await,
            TierAction::Demote => cache.tiers().demote(key).await,
        };
        match result.with_context(|| format!("cannot move {key}")) {
            Ok(_) if action == TierAction::Promote => report.promoted.push(key.clone()),
            Ok(_) => report.demoted.push(key.clone()),
            Err(e) => report.failures.push(RebalanceFailure {
                key: key.clone(),
                action,
                error: format!("{e:#}"),
            }),
        }
    }
    report
}
