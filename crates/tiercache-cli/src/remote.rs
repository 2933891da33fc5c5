//! # Remote Bucket Subcommands
//!
//! ## Subcommands
//!
//! - `discover`: List objects in the bucket and map them back to semantic
//!   paths; `--sync` registers the ones this registry does not know.
//! - `lifecycle`: Install the archive transition rule (idempotent) and
//!   optionally push versioning and encryption settings.
//! - `presign`: Time-limited read URL for an entry.

use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;

use tiercache_cache::AssetCache;
use tiercache_core::StorageClass;
use tiercache_store::DEFAULT_PRESIGN_TTL;

use crate::{format_bytes, print_json};

/// Arguments for `tiercache discover`.
#[derive(Args, Debug)]
pub struct DiscoverArgs {
    /// Key prefix to scan. Defaults to the configured namespace.
    #[arg(long, value_name = "PREFIX")]
    pub key_prefix: Option<String>,

    /// Register unknown objects as remote-only entries.
    #[arg(long)]
    pub sync: bool,

    /// Output as JSON.
    #[arg(long)]
    pub json: bool,
}

pub async fn run_discover(args: &DiscoverArgs, cache: &AssetCache) -> Result<u8> {
    let report = cache
        .discover(args.key_prefix.as_deref(), args.sync)
        .await
        .context("remote discovery failed")?;
    if args.json {
        print_json(&report)?;
        return Ok(0);
    }
    for asset in &report.assets {
        let marker = if asset.added {
            "ADDED"
        } else if asset.known {
            "KNOWN"
        } else {
            "NEW"
        };
        println!("  {marker:<6} {:>10}  {}", format_bytes(asset.size), asset.key);
    }
    println!(
        "{} assets, {} added, {} unrecognized keys, {} skipped",
        report.assets.len(),
        report.added,
        report.unrecognized,
        report.skipped
    );
    Ok(0)
}

/// Arguments for `tiercache lifecycle`.
#[derive(Args, Debug)]
pub struct LifecycleArgs {
    /// Days after creation before objects transition.
    #[arg(long, default_value_t = 90)]
    pub days: u32,

    /// Archive storage class to transition to.
    #[arg(long, default_value = "GLACIER")]
    pub class: StorageClass,

    /// Delete objects this many days after creation.
    #[arg(long)]
    pub expire_days: Option<u32>,

    /// Also push the configured versioning and encryption flags.
    #[arg(long)]
    pub apply_settings: bool,
}

pub async fn run_lifecycle(args: &LifecycleArgs, cache: &AssetCache) -> Result<u8> {
    let remote = cache.remote();
    let changed = remote
        .set_lifecycle_policy(args.days, args.class, args.expire_days)
        .await
        .context("failed to configure lifecycle policy")?;
    if changed {
        println!("OK: objects transition to {} after {} days", args.class, args.days);
    } else {
        println!("OK: lifecycle policy already in place");
    }
    if let Some(days) = args.expire_days {
        println!("    and expire after {days} days");
    }
    if args.apply_settings {
        remote
            .apply_bucket_settings()
            .await
            .context("failed to apply bucket settings")?;
        let config = cache.config();
        println!(
            "OK: versioning={} encryption={}",
            config.enable_versioning, config.enable_encryption
        );
    }
    Ok(0)
}

/// Arguments for `tiercache presign`.
#[derive(Args, Debug)]
pub struct PresignArgs {
    /// Cache key.
    pub key: String,

    /// Validity in seconds.
    #[arg(long)]
    pub ttl: Option<u64>,
}

pub async fn run_presign(args: &PresignArgs, cache: &AssetCache) -> Result<u8> {
    let ttl = args.ttl.map(Duration::from_secs).unwrap_or(DEFAULT_PRESIGN_TTL);
    let url = cache
        .presign(&args.key, ttl)
        .await
        .with_context(|| format!("cannot presign {}", args.key))?;
    println!("{url}");
    Ok(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::open_cache;
    use tiercache_cache::Registration;
    use tiercache_core::{CacheConfig, SemanticPath, TierState};
    use tiercache_store::ObjectStore;

    fn config(dir: &std::path::Path, cache_dir: &str) -> CacheConfig {
        CacheConfig {
            bucket_name: "assets".to_string(),
            cache_dir: dir.join(cache_dir),
            retry_base_delay_ms: 1,
            ..CacheConfig::default()
        }
    }

    #[tokio::test]
    async fn discover_sync_from_another_cache() {
        let dir = tempfile::tempdir().unwrap();
        let bucket = dir.path().join("bucket");
        let first = open_cache(config(dir.path(), "one"), Some(&bucket)).unwrap();
        let file = dir.path().join("p.png");
        std::fs::write(&file, b"pods").unwrap();
        let path = SemanticPath::product("laundry", "pods", false);
        let key = first.register(Registration::new(path, file)).unwrap().key;
        first.tiers().upload(&key).await.unwrap();

        let second = open_cache(config(dir.path(), "two"), Some(&bucket)).unwrap();
        let args = DiscoverArgs {
            key_prefix: None,
            sync: true,
            json: false,
        };
        assert_eq!(run_discover(&args, &second).await.unwrap(), 0);
        assert_eq!(second.lookup(&key).unwrap().tier_state, TierState::RemoteOnly);
    }

    #[tokio::test]
    async fn lifecycle_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let cache = open_cache(config(dir.path(), "cache"), Some(&dir.path().join("bucket"))).unwrap();
        let args = LifecycleArgs {
            days: 30,
            class: StorageClass::DeepArchive,
            expire_days: None,
            apply_settings: true,
        };
        assert_eq!(run_lifecycle(&args, &cache).await.unwrap(), 0);
        assert_eq!(run_lifecycle(&args, &cache).await.unwrap(), 0);
        let rules = cache.remote().client().get_lifecycle().await.unwrap();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].transition_class, StorageClass::DeepArchive);
    }

    #[tokio::test]
    async fn presign_unknown_key_fails() {
        let dir = tempfile::tempdir().unwrap();
        let cache = open_cache(config(dir.path(), "cache"), None).unwrap();
        let args = PresignArgs {
            key: "missing".to_string(),
            ttl: Some(60),
        };
        assert!(run_presign(&args, &cache).await.is_err());
    }
}
