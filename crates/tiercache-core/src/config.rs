//! Cache configuration.
//!
//! Layered in increasing precedence: built-in defaults, an optional YAML
//! file, environment variables, then explicit overrides from the caller
//! (CLI flags). The assembled [`CacheConfig`] is passed to constructors
//! explicitly; nothing reads it from a global.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Environment variable → configuration key.
pub const ENV_VARS: &[(&str, &str)] = &[
    ("S3_BUCKET_NAME", "bucket_name"),
    ("S3_REGION", "region"),
    ("S3_PREFIX", "prefix"),
    ("S3_STORAGE_CLASS", "storage_class"),
    ("S3_MAX_PARALLEL_TRANSFERS", "max_parallel_transfers"),
    ("S3_ENABLE_VERSIONING", "enable_versioning"),
    ("S3_ENABLE_ENCRYPTION", "enable_encryption"),
    ("S3_TIMEOUT_SECS", "request_timeout_secs"),
    ("S3_RETRY_ATTEMPTS", "retry_attempts"),
    ("TIERCACHE_DIR", "cache_dir"),
    ("TIERCACHE_COLD_DAYS", "cold_threshold_days"),
];

/// Remote storage class an object is written with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StorageClass {
    Standard,
    IntelligentTiering,
    StandardIa,
    Glacier,
    DeepArchive,
}

impl StorageClass {
    pub const ALL: [StorageClass; 5] = [
        Self::Standard,
        Self::IntelligentTiering,
        Self::StandardIa,
        Self::Glacier,
        Self::DeepArchive,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Standard => "STANDARD",
            Self::IntelligentTiering => "INTELLIGENT_TIERING",
            Self::StandardIa => "STANDARD_IA",
            Self::Glacier => "GLACIER",
            Self::DeepArchive => "DEEP_ARCHIVE",
        }
    }
}

impl std::fmt::Display for StorageClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for StorageClass {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_uppercase().replace('-', "_");
        Self::ALL
            .into_iter()
            .find(|c| c.as_str() == normalized)
            .ok_or_else(|| ConfigError::InvalidValue {
                key: "storage_class".to_string(),
                value: s.to_string(),
                reason: "expected one of STANDARD, INTELLIGENT_TIERING, STANDARD_IA, GLACIER, DEEP_ARCHIVE".to_string(),
            })
    }
}

/// Configuration for a cache instance and its remote tier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Remote bucket. Required.
    pub bucket_name: String,
    pub region: String,
    /// Namespace prefix for every remote key.
    pub prefix: String,
    pub storage_class: StorageClass,
    /// Upper bound on concurrent transfers per engine.
    pub max_parallel_transfers: usize,
    pub enable_versioning: bool,
    pub enable_encryption: bool,
    /// Timeout applied to every remote call.
    pub request_timeout_secs: u64,
    /// Total attempts for a transient transfer failure, first try included.
    pub retry_attempts: u32,
    pub retry_base_delay_ms: u64,
    /// Local tier root; the registry index lives at `{cache_dir}/index.json`.
    pub cache_dir: PathBuf,
    pub cold_threshold_days: u32,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            bucket_name: String::new(),
            region: "us-east-1".to_string(),
            prefix: "creative-assets".to_string(),
            storage_class: StorageClass::Standard,
            max_parallel_transfers: 10,
            enable_versioning: true,
            enable_encryption: true,
            request_timeout_secs: 30,
            retry_attempts: 3,
            retry_base_delay_ms: 200,
            cache_dir: PathBuf::from("cache"),
            cold_threshold_days: 30,
        }
    }
}

impl CacheConfig {
    /// Load configuration from environment variables over the defaults.
    ///
    /// See [`ENV_VARS`] for the recognized names. `S3_BUCKET_NAME` is required.
    pub fn from_env() -> Result<Self, ConfigError> {
        let config = Self::default().overlay(|var| std::env::var(var).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults, then the YAML file if given, then the environment.
    ///
    /// Not validated: callers apply their own overrides first.
    pub fn load(yaml: Option<&Path>) -> Result<Self, ConfigError> {
        let base = match yaml {
            Some(path) => Self::from_yaml_file(path)?,
            None => Self::default(),
        };
        base.overlay(|var| std::env::var(var).ok())
    }

    /// Parse a YAML document. Absent keys keep their defaults.
    pub fn from_yaml_str(source: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(source).map_err(|e| ConfigError::Parse {
            source_name: "<yaml>".to_string(),
            message: e.to_string(),
        })
    }

    pub fn from_yaml_file(path: &Path) -> Result<Self, ConfigError> {
        let source = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            source: e,
        })?;
        serde_yaml::from_str(&source).map_err(|e| ConfigError::Parse {
            source_name: path.display().to_string(),
            message: e.to_string(),
        })
    }

    /// Apply environment-style variables found by `lookup`.
    pub fn overlay<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        for &(var, key) in ENV_VARS {
            if let Some(value) = lookup(var) {
                self.set(key, &value)?;
            }
        }
        Ok(self)
    }

    /// Apply `key=value` pairs, e.g. from repeated `--set` flags.
    pub fn from_pairs<'a, I>(pairs: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut config = Self::default();
        for (key, value) in pairs {
            config.set(key, value)?;
        }
        Ok(config)
    }

    /// Set one key from its string form.
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        match key {
            "bucket_name" => self.bucket_name = value.trim().to_string(),
            "region" => self.region = value.trim().to_string(),
            "prefix" => self.prefix = value.trim().trim_matches('/').to_string(),
            "storage_class" => self.storage_class = value.parse()?,
            "max_parallel_transfers" => self.max_parallel_transfers = parse_num(key, value)?,
            "enable_versioning" => self.enable_versioning = parse_bool(key, value)?,
            "enable_encryption" => self.enable_encryption = parse_bool(key, value)?,
            "request_timeout_secs" => self.request_timeout_secs = parse_num(key, value)?,
            "retry_attempts" => self.retry_attempts = parse_num(key, value)?,
            "retry_base_delay_ms" => self.retry_base_delay_ms = parse_num(key, value)?,
            "cache_dir" => self.cache_dir = PathBuf::from(value),
            "cold_threshold_days" => self.cold_threshold_days = parse_num(key, value)?,
            other => return Err(ConfigError::UnknownKey(other.to_string())),
        }
        Ok(())
    }

    /// Check cross-field constraints.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.bucket_name.is_empty() {
            return Err(ConfigError::MissingBucket);
        }
        if self.max_parallel_transfers == 0 {
            return Err(invalid("max_parallel_transfers", "0", "must be at least 1"));
        }
        if self.retry_attempts == 0 {
            return Err(invalid("retry_attempts", "0", "must be at least 1"));
        }
        if self.request_timeout_secs == 0 {
            return Err(invalid("request_timeout_secs", "0", "must be at least 1"));
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }

    pub fn cold_threshold(&self) -> chrono::Duration {
        chrono::Duration::days(i64::from(self.cold_threshold_days))
    }

    /// Path of the persisted registry.
    pub fn index_path(&self) -> PathBuf {
        self.cache_dir.join("index.json")
    }

    /// Remote key the registry index is published under.
    pub fn metadata_index_key(&self) -> String {
        if self.prefix.is_empty() {
            "metadata/index.json".to_string()
        } else {
            format!("{}/metadata/index.json", self.prefix)
        }
    }
}

fn invalid(key: &str, value: &str, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

fn parse_num<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e: T::Err| invalid(key, value, &e.to_string()))
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(invalid(key, value, "expected true or false")),
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("S3_BUCKET_NAME (bucket_name) is required")]
    MissingBucket,
    #[error("invalid value {value:?} for {key}: {reason}")]
    InvalidValue {
        key: String,
        value: String,
        reason: String,
    },
    #[error("unknown configuration key {0:?}")]
    UnknownKey(String),
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config {source_name}: {message}")]
    Parse {
        source_name: String,
        message: String,
    },
}
