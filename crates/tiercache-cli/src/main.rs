//! # tiercache CLI entry point
//!
//! Parses command-line arguments, installs logging, opens the cache and
//! dispatches to subcommand handlers. Logs go to stderr so that `--json`
//! output on stdout stays machine-readable.

use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use tiercache_cli::asset::{
    run_clear, run_delete, run_get, run_list, run_register, run_stats, ClearArgs, DeleteArgs,
    GetArgs, ListArgs, RegisterArgs, StatsArgs,
};
use tiercache_cli::migrate::{
    run_download, run_estimate, run_upload, run_validate, DownloadArgs, EstimateArgs, UploadArgs,
    ValidateArgs,
};
use tiercache_cli::remote::{
    run_discover, run_lifecycle, run_presign, DiscoverArgs, LifecycleArgs, PresignArgs,
};
use tiercache_cli::tier::{run_tier_manage, TierManageArgs};
use tiercache_cli::CacheOptions;

/// Semantic, tiered cache for generated creative assets.
///
/// Assets live in a local tier under a semantic directory layout and are
/// migrated to an S3-compatible bucket with the same layout. The registry
/// index tracks which tier holds each asset.
#[derive(Parser, Debug)]
#[command(name = "tiercache", version, about, long_about = None)]
struct Cli {
    /// Enable verbose output. Repeat for more verbosity (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(flatten)]
    cache: CacheOptions,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Copy a file into the local tier under its semantic path.
    Register(RegisterArgs),

    /// Print a usable local path for a key, downloading it if needed.
    Get(GetArgs),

    /// List registry entries or remote objects.
    List(ListArgs),

    /// Entry counts per tier, counters and hit rate.
    Stats(StatsArgs),

    /// Upload pending local entries to the remote tier.
    Upload(UploadArgs),

    /// Download remote-only entries into the local tier.
    Download(DownloadArgs),

    /// Check remote objects against the registry. Exits 1 on drift.
    Validate(ValidateArgs),

    /// Storage cost of pending uploads in every storage class.
    Estimate(EstimateArgs),

    /// Promote, demote or rebalance entries between tiers.
    TierManage(TierManageArgs),

    /// Map remote objects back to semantic paths and optionally register them.
    Discover(DiscoverArgs),

    /// Configure the bucket's archive lifecycle rule.
    Lifecycle(LifecycleArgs),

    /// Time-limited read URL for an entry.
    Presign(PresignArgs),

    /// Remove entries from both tiers.
    Delete(DeleteArgs),

    /// Remove every entry matching a filter from both tiers.
    Clear(ClearArgs),
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.log_json);

    tracing::debug!(version = env!("CARGO_PKG_VERSION"), "tiercache starting");

    let cache = match cli.cache.open() {
        Ok(cache) => cache,
        Err(e) => {
            tracing::error!("{e:#}");
            return ExitCode::from(1);
        }
    };

    let result = match &cli.command {
        Commands::Register(args) => run_register(args, &cache),
        Commands::Get(args) => run_get(args, &cache).await,
        Commands::List(args) => run_list(args, &cache).await,
        Commands::Stats(args) => run_stats(args, &cache).await,
        Commands::Upload(args) => run_upload(args, &cache).await,
        Commands::Download(args) => run_download(args, &cache).await,
        Commands::Validate(args) => run_validate(args, &cache).await,
        Commands::Estimate(args) => run_estimate(args, &cache),
        Commands::TierManage(args) => run_tier_manage(args, &cache).await,
        Commands::Discover(args) => run_discover(args, &cache).await,
        Commands::Lifecycle(args) => run_lifecycle(args, &cache).await,
        Commands::Presign(args) => run_presign(args, &cache).await,
        Commands::Delete(args) => run_delete(args, &cache).await,
        Commands::Clear(args) => run_clear(args, &cache).await,
    };

    match result {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            tracing::error!("{e:#}");
            ExitCode::from(1)
        }
    }
}

fn init_tracing(verbose: u8, json: bool) {
    let filter = match verbose {
        0 => EnvFilter::new("warn"),
        1 => EnvFilter::new("info"),
        2 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };
    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .init();
    }
}
