//! # Asset Subcommands
//!
//! Registry-level commands that work on one entry or on the registry as a
//! whole.
//!
//! ## Subcommands
//!
//! - `register`: Copy a file into the local tier under its semantic path.
//! - `get`: Print a usable local path, downloading remote-only entries.
//! - `list`: List registry entries, or remote objects with `--remote`.
//! - `stats`: Entry counts per tier, hit rate and optional bucket usage.
//! - `delete` / `clear`: Remove entries from both tiers and the registry.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Args, ValueEnum};
use serde::Serialize;

use tiercache_cache::{AssetCache, Registration};
use tiercache_core::{CacheEntry, Checksum, Season, SemanticPath, UploadStatus};

use crate::{format_bytes, parse_pair, print_json, FilterArgs};

/// Which layout a registered asset follows.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetKind {
    /// Product image, cut-out (`--transparent`) or original.
    Product,
    /// Scene background, optionally regional and seasonal.
    Background,
    /// Final campaign creative.
    Composite,
}

/// Arguments for `tiercache register`.
#[derive(Args, Debug)]
pub struct RegisterArgs {
    /// File to copy into the local tier.
    pub file: PathBuf,

    /// Asset layout.
    #[arg(long, value_enum)]
    pub kind: AssetKind,

    /// Product category (products).
    #[arg(long)]
    pub category: Option<String>,

    /// Product name (products and composites).
    #[arg(long)]
    pub product: Option<String>,

    /// Register the background-removed cut-out instead of the original.
    #[arg(long)]
    pub transparent: bool,

    /// Background style (backgrounds).
    #[arg(long)]
    pub style: Option<String>,

    /// Background region; omitted means global.
    #[arg(long)]
    pub region: Option<String>,

    /// Background season.
    #[arg(long)]
    pub season: Option<String>,

    /// Aspect ratio, e.g. "16:9" (composites).
    #[arg(long)]
    pub aspect_ratio: Option<String>,

    /// Campaign the asset is produced for. Required for composites.
    #[arg(long)]
    pub campaign: Option<String>,

    /// Explicit cache key instead of the derived one.
    #[arg(long)]
    pub key: Option<String>,

    /// Expected SHA-256 of the file (hex).
    #[arg(long)]
    pub checksum: Option<String>,

    /// Descriptive metadata, repeatable (`--meta source=studio`).
    #[arg(long = "meta", value_name = "KEY=VALUE")]
    pub metadata: Vec<String>,

    /// Replace an existing entry whose content differs.
    #[arg(long)]
    pub overwrite: bool,

    /// Print the resulting entry as JSON.
    #[arg(long)]
    pub json: bool,
}

impl RegisterArgs {
    pub fn semantic_path(&self) -> Result<SemanticPath> {
        let path = match self.kind {
            AssetKind::Product => SemanticPath::product(
                required(&self.category, "--category")?,
                required(&self.product, "--product")?,
                self.transparent,
            ),
            AssetKind::Background => {
                let season = self
                    .season
                    .as_deref()
                    .map(|s| s.parse::<Season>())
                    .transpose()
                    .context("invalid --season")?;
                SemanticPath::background(
                    required(&self.style, "--style")?,
                    self.region.as_deref(),
                    season,
                )
            }
            AssetKind::Composite => SemanticPath::composite(
                required(&self.campaign, "--campaign")?,
                required(&self.product, "--product")?,
                required(&self.aspect_ratio, "--aspect-ratio")?,
            ),
        };
        Ok(path)
    }

    pub fn registration(&self) -> Result<Registration> {
        let mut registration =
            Registration::new(self.semantic_path()?, &self.file).overwrite(self.overwrite);
        if let Some(key) = &self.key {
            registration = registration.key(key.as_str());
        }
        if let Some(hex) = &self.checksum {
            let checksum = Checksum::from_hex(hex).context("invalid --checksum")?;
            registration = registration.checksum(checksum);
        }
        if let Some(campaign) = &self.campaign {
            registration = registration.campaign(campaign.as_str());
        }
        for raw in &self.metadata {
            let (name, value) = parse_pair(raw)?;
            registration = registration.metadata(name, value);
        }
        Ok(registration)
    }
}

fn required<'a>(value: &'a Option<String>, flag: &str) -> Result<&'a str> {
    value
        .as_deref()
        .with_context(|| format!("{flag} is required for this asset kind"))
}

pub fn run_register(args: &RegisterArgs, cache: &AssetCache) -> Result<u8> {
    let registration = args.registration()?;
    let entry = cache
        .register(registration)
        .with_context(|| format!("failed to register {}", args.file.display()))?;
    if args.json {
        print_json(&entry)?;
    } else {
        let path = cache.registry().local_path(&entry)?;
        println!("OK: registered {}", entry.key);
        println!("  path:     {}", path.display());
        println!("  checksum: {}", entry.checksum);
        println!("  size:     {}", format_bytes(entry.size_bytes));
        println!("  remote:   {}", entry.remote_key);
    }
    Ok(0)
}

/// Arguments for `tiercache get`.
#[derive(Args, Debug)]
pub struct GetArgs {
    /// Cache key.
    pub key: String,

    /// Report a miss instead of downloading remote-only entries.
    #[arg(long)]
    pub no_download: bool,
}

pub async fn run_get(args: &GetArgs, cache: &AssetCache) -> Result<u8> {
    match cache.get_path(&args.key, !args.no_download).await? {
        Some(path) => {
            println!("{}", path.display());
            Ok(0)
        }
        None => {
            eprintln!("MISS: {}", args.key);
            Ok(1)
        }
    }
}

/// Arguments for `tiercache list`.
#[derive(Args, Debug)]
pub struct ListArgs {
    #[command(flatten)]
    pub filter: FilterArgs,

    /// List objects in the remote bucket instead of registry entries.
    #[arg(long)]
    pub remote: bool,

    /// Output as JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Serialize)]
struct RemoteRow {
    key: String,
    size: u64,
    storage_class: String,
    cache_key: Option<String>,
}

pub async fn run_list(args: &ListArgs, cache: &AssetCache) -> Result<u8> {
    if args.remote {
        return list_remote(args, cache).await;
    }
    let filter = args.filter.to_filter()?;
    let entries: Vec<CacheEntry> = cache.registry().list(&filter).collect();
    if args.json {
        print_json(&entries)?;
        return Ok(0);
    }
    if entries.is_empty() {
        println!("No entries.");
        return Ok(0);
    }
    for entry in &entries {
        let upload = match &entry.upload_status {
            Some(UploadStatus::Pending) => "pending",
            Some(UploadStatus::Uploaded) => "uploaded",
            Some(UploadStatus::Failed { .. }) => "failed",
            None => "-",
        };
        println!(
            "{:<11} {:>10}  {:<8} {}",
            entry.tier_state.as_str(),
            format_bytes(entry.size_bytes),
            upload,
            entry.key
        );
    }
    println!("{} entries", entries.len());
    Ok(0)
}

async fn list_remote(args: &ListArgs, cache: &AssetCache) -> Result<u8> {
    let objects = cache
        .remote()
        .list_namespace()
        .collect_all()
        .await
        .context("failed to list remote objects")?;
    let rows: Vec<RemoteRow> = objects
        .into_iter()
        .map(|o| RemoteRow {
            cache_key: o.metadata.get(tiercache_store::META_CACHE_KEY).cloned(),
            storage_class: o.storage_class.as_str().to_string(),
            size: o.size,
            key: o.key,
        })
        .collect();
    if args.json {
        print_json(&rows)?;
        return Ok(0);
    }
    for row in &rows {
        println!("{:>10}  {:<19} {}", format_bytes(row.size), row.storage_class, row.key);
    }
    println!("{} objects", rows.len());
    Ok(0)
}

/// Arguments for `tiercache stats`.
#[derive(Args, Debug)]
pub struct StatsArgs {
    /// Include object counts and bytes from the remote bucket.
    #[arg(long)]
    pub remote: bool,

    /// Output as JSON.
    #[arg(long)]
    pub json: bool,
}

pub async fn run_stats(args: &StatsArgs, cache: &AssetCache) -> Result<u8> {
    let stats = cache.stats(args.remote).await.context("failed to collect statistics")?;
    if args.json {
        print_json(&stats)?;
        return Ok(0);
    }
    println!("Entries:        {}", stats.total_entries);
    println!("  local only:   {}", stats.local_only);
    println!("  remote only:  {}", stats.remote_only);
    println!("  both tiers:   {}", stats.both);
    println!("Local bytes:    {}", format_bytes(stats.local_bytes));
    println!("Pending:        {}", stats.pending_uploads);
    println!("Failed:         {}", stats.failed_uploads);
    for (asset_type, count) in &stats.by_type {
        println!("  {asset_type:<20} {count}");
    }
    let c = &stats.counters;
    println!(
        "Counters:       uploads={} downloads={} hits={} misses={}",
        c.uploads, c.downloads, c.cache_hits, c.cache_misses
    );
    println!("Hit rate:       {:.1}%", stats.hit_rate * 100.0);
    if let Some(remote) = &stats.remote {
        println!(
            "Remote:         {} objects, {}",
            remote.object_count,
            format_bytes(remote.total_bytes)
        );
        for (asset_type, usage) in &remote.by_type {
            println!(
                "  {asset_type:<20} {} objects, {}",
                usage.objects,
                format_bytes(usage.bytes)
            );
        }
    }
    Ok(0)
}

/// Arguments for `tiercache delete`.
#[derive(Args, Debug)]
pub struct DeleteArgs {
    /// Cache keys to remove from both tiers.
    #[arg(required = true)]
    pub keys: Vec<String>,
}

pub async fn run_delete(args: &DeleteArgs, cache: &AssetCache) -> Result<u8> {
    let mut failed = 0;
    for key in &args.keys {
        match cache.delete(key).await {
            Ok(_) => println!("OK: deleted {key}"),
            Err(e) => {
                eprintln!("FAILED: {key}: {e}");
                failed += 1;
            }
        }
    }
    Ok(if failed == 0 { 0 } else { 1 })
}

/// Arguments for `tiercache clear`.
#[derive(Args, Debug)]
pub struct ClearArgs {
    #[command(flatten)]
    pub filter: FilterArgs,

    /// Confirm removal of every matching entry from both tiers.
    #[arg(long)]
    pub yes: bool,
}

pub async fn run_clear(args: &ClearArgs, cache: &AssetCache) -> Result<u8> {
    let filter = args.filter.to_filter()?;
    if !args.yes {
        let count = cache.registry().list(&filter).len();
        bail!("refusing to clear {count} entries without --yes");
    }
    let report = cache.clear(&filter).await;
    for f in &report.failures {
        eprintln!("FAILED: {}: {}", f.key, f.error);
    }
    println!("Removed {} entries, {} failed", report.removed.len(), report.failures.len());
    Ok(if report.failures.is_empty() { 0 } else { 1 })
}
