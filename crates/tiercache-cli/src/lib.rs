//! # tiercache-cli: Command-Line Interface for the Tiered Asset Cache
//!
//! Provides the `tiercache` binary. Every subcommand is a thin mapping onto
//! one operation of [`tiercache_cache::AssetCache`]; handlers return an exit
//! code (0 success, 1 operational failure) and let `anyhow` carry errors.
//!
//! ## Subcommands
//!
//! - `tiercache register` / `get` / `list` / `stats` / `delete` / `clear`:
//!   local registry.
//! - `tiercache upload` / `download` / `validate` / `estimate`: bulk
//!   migration between tiers.
//! - `tiercache tier-manage`: promote, demote and rebalance.
//! - `tiercache discover` / `lifecycle` / `presign`: remote bucket.
//!
//! ## Remote backend
//!
//! `--remote-dir DIR` emulates the bucket inside a directory. Without it the
//! remote tier is an in-memory store that is discarded on exit, which is
//! only useful for dry runs.
//!
//! ```bash
//! tiercache --bucket assets --remote-dir /srv/bucket upload --type composite
//! tiercache --bucket assets validate --deep
//! ```

pub mod asset;
pub mod migrate;
pub mod remote;
pub mod tier;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Args;

use tiercache_cache::AssetCache;
use tiercache_core::{AssetType, CacheConfig, EntryFilter};
use tiercache_store::{FsObjectStore, MemoryObjectStore, ObjectStore};

/// Options shared by every subcommand that opens the cache.
#[derive(Args, Debug, Clone, Default)]
pub struct CacheOptions {
    /// Path to a YAML configuration file.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Local tier root (overrides `cache_dir` and `TIERCACHE_DIR`).
    #[arg(long, global = true)]
    pub cache_dir: Option<PathBuf>,

    /// Directory emulating the remote bucket.
    #[arg(long, global = true)]
    pub remote_dir: Option<PathBuf>,

    /// Remote bucket name (overrides `S3_BUCKET_NAME`).
    #[arg(long, global = true)]
    pub bucket: Option<String>,

    /// Namespace prefix for remote keys (overrides `S3_PREFIX`).
    #[arg(long, global = true)]
    pub prefix: Option<String>,
}

impl CacheOptions {
    /// Assemble the configuration: defaults, YAML file, environment, flags.
    pub fn load_config(&self) -> Result<CacheConfig> {
        self.resolve_config(|var| std::env::var(var).ok())
    }

    /// As [`load_config`](Self::load_config) with an explicit variable lookup.
    pub fn resolve_config<F>(&self, lookup: F) -> Result<CacheConfig>
    where
        F: Fn(&str) -> Option<String>,
    {
        let base = match &self.config {
            Some(path) => CacheConfig::from_yaml_file(path)
                .with_context(|| format!("failed to load configuration from {}", path.display()))?,
            None => CacheConfig::default(),
        };
        let mut config = base.overlay(lookup).context("invalid environment configuration")?;
        if let Some(bucket) = &self.bucket {
            config.set("bucket_name", bucket)?;
        }
        if let Some(prefix) = &self.prefix {
            config.set("prefix", prefix)?;
        }
        if let Some(dir) = &self.cache_dir {
            config.cache_dir = dir.clone();
        }
        Ok(config)
    }

    /// Load the configuration and open the cache against the selected backend.
    pub fn open(&self) -> Result<AssetCache> {
        let config = self.load_config()?;
        open_cache(config, self.remote_dir.as_deref())
    }
}

/// Open the cache with a filesystem bucket at `remote_dir`, or in memory.
pub fn open_cache(config: CacheConfig, remote_dir: Option<&Path>) -> Result<AssetCache> {
    let client: Arc<dyn ObjectStore> = match remote_dir {
        Some(dir) => {
            tracing::debug!(root = %dir.display(), "using filesystem remote tier");
            Arc::new(FsObjectStore::new(dir))
        }
        None => {
            tracing::warn!("no --remote-dir given; remote tier is in memory and discarded on exit");
            Arc::new(MemoryObjectStore::new(config.bucket_name.clone()))
        }
    };
    let cache_dir = config.cache_dir.clone();
    AssetCache::open(config, client)
        .with_context(|| format!("failed to open cache at {}", cache_dir.display()))
}

/// Entry selection flags shared by bulk subcommands.
#[derive(Args, Debug, Clone, Default)]
pub struct FilterArgs {
    /// Only entries of this asset type (e.g. "composite", "product-transparent").
    #[arg(long = "type", value_name = "TYPE")]
    pub asset_type: Option<String>,

    /// Only backgrounds for this region.
    #[arg(long)]
    pub region: Option<String>,

    /// Only entries belonging to or reused by this campaign.
    #[arg(long)]
    pub campaign: Option<String>,
}

impl FilterArgs {
    pub fn to_filter(&self) -> Result<EntryFilter> {
        let mut filter = EntryFilter::all();
        if let Some(name) = &self.asset_type {
            let asset_type: AssetType = name
                .parse()
                .with_context(|| format!("invalid --type {name:?}"))?;
            filter = filter.asset_type(asset_type);
        }
        if let Some(region) = &self.region {
            filter = filter.region(region.as_str());
        }
        if let Some(campaign) = &self.campaign {
            filter = filter.campaign(campaign.as_str());
        }
        Ok(filter)
    }
}

/// Parse a `key=value` flag.
pub fn parse_pair(raw: &str) -> Result<(String, String)> {
    let (key, value) = raw
        .split_once('=')
        .with_context(|| format!("expected KEY=VALUE, got {raw:?}"))?;
    let key = key.trim();
    if key.is_empty() {
        bail!("empty key in {raw:?}");
    }
    Ok((key.to_string(), value.trim().to_string()))
}

/// Human-readable byte count.
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}

/// Print `value` as pretty JSON on stdout.
pub fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).context("failed to serialize output")?;
    println!("{json}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options(dir: &Path) -> CacheOptions {
        CacheOptions {
            cache_dir: Some(dir.join("cache")),
            bucket: Some("assets".to_string()),
            ..CacheOptions::default()
        }
    }

    #[test]
    fn flags_override_environment() {
        let dir = tempfile::tempdir().unwrap();
        let opts = CacheOptions {
            prefix: Some("/flag-prefix/".to_string()),
            ..options(dir.path())
        };
        let config = opts
            .resolve_config(|var| match var {
                "S3_BUCKET_NAME" => Some("env-bucket".to_string()),
                "S3_PREFIX" => Some("env-prefix".to_string()),
                "S3_MAX_PARALLEL_TRANSFERS" => Some("4".to_string()),
                _ => None,
            })
            .unwrap();
        assert_eq!(config.bucket_name, "assets");
        assert_eq!(config.prefix, "flag-prefix");
        assert_eq!(config.max_parallel_transfers, 4);
        assert_eq!(config.cache_dir, dir.path().join("cache"));
    }

    #[test]
    fn yaml_file_sits_below_environment() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tiercache.yaml");
        std::fs::write(&path, "bucket_name: from-yaml\nretry_attempts: 5\nregion: eu-west-1\n").unwrap();
        let opts = CacheOptions {
            config: Some(path),
            ..CacheOptions::default()
        };
        let config = opts
            .resolve_config(|var| (var == "S3_REGION").then(|| "ap-south-1".to_string()))
            .unwrap();
        assert_eq!(config.bucket_name, "from-yaml");
        assert_eq!(config.retry_attempts, 5);
        assert_eq!(config.region, "ap-south-1");
    }

    #[test]
    fn bad_environment_value_names_the_key() {
        let err = CacheOptions::default()
            .resolve_config(|var| (var == "S3_RETRY_ATTEMPTS").then(|| "many".to_string()))
            .unwrap_err();
        assert!(format!("{err:#}").contains("retry_attempts"));
    }

    #[test]
    fn missing_config_file_is_an_error() {
        let opts = CacheOptions {
            config: Some(PathBuf::from("/nonexistent/tiercache.yaml")),
            ..CacheOptions::default()
        };
        assert!(opts.resolve_config(|_| None).is_err());
    }

    #[test]
    fn open_requires_bucket() {
        let dir = tempfile::tempdir().unwrap();
        let opts = CacheOptions {
            bucket: None,
            ..options(dir.path())
        };
        let config = opts.resolve_config(|_| None).unwrap();
        assert!(open_cache(config, None).is_err());
    }

    #[test]
    fn open_with_remote_dir() {
        let dir = tempfile::tempdir().unwrap();
        let config = options(dir.path()).resolve_config(|_| None).unwrap();
        let cache = open_cache(config, Some(&dir.path().join("bucket"))).unwrap();
        assert!(cache.registry().is_empty());
    }

    #[test]
    fn filter_args_build_filter() {
        let args = FilterArgs {
            asset_type: Some("scene-background".to_string()),
            region: Some("us".to_string()),
            campaign: None,
        };
        let filter = args.to_filter().unwrap();
        assert_eq!(filter.asset_type, Some(AssetType::SceneBackground));
        assert_eq!(filter.region.as_deref(), Some("us"));
        assert!(filter.campaign.is_none());
    }

    #[test]
    fn filter_args_reject_unknown_type() {
        let args = FilterArgs {
            asset_type: Some("video".to_string()),
            ..FilterArgs::default()
        };
        assert!(args.to_filter().is_err());
    }

    #[test]
    fn parse_pair_splits_on_first_equals() {
        assert_eq!(
            parse_pair("source = a=b").unwrap(),
            ("source".to_string(), "a=b".to_string())
        );
        assert!(parse_pair("novalue").is_err());
        assert!(parse_pair("=x").is_err());
    }

    #[test]
    fn format_bytes_units() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KiB");
        assert_eq!(format_bytes(5 * 1024 * 1024 * 1024), "5.0 GiB");
    }
}
