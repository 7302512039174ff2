//! Environment-driven configuration.
//!
//! Every knob has a default; environment variables override. The validator
//! recognizes a closed set of known and deprecated variables and reports
//! unknowns in our prefixes as warnings without ever failing startup.

use crate::aging::AgingConfig;
use crate::cache::CacheStrategyKind;
use crate::storage::{DEFAULT_ACQUIRE_TIMEOUT, DEFAULT_READ_POOL_SIZE};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

/// Default entity-cache capacity per context.
pub const DEFAULT_ENTITY_CACHE_SIZE: usize = 1000;

/// Default search-cache capacity per context.
pub const DEFAULT_SEARCH_CACHE_SIZE: usize = 1000;

/// Known configuration variables.
const KNOWN_VARS: &[&str] = &[
    "MEM100X_DB_PATH",
    "MEM100X_DATA_DIR",
    "MEM100X_PERSONAL_DB",
    "MEM100X_WORK_DB",
    "ENTITY_CACHE_SIZE",
    "SEARCH_CACHE_SIZE",
    "CACHE_STRATEGY",
    "MEMORY_AGING_ENABLED",
    "MEMORY_AGING_PRESET",
    "MEMORY_AGING_DECAY_RATE",
    "MEMORY_AGING_HALF_LIFE_DAYS",
    "MEMORY_AGING_SWEEP_INTERVAL_SECS",
    "BLOOM_FILTER_ENABLED",
    "BLOOM_FILTER_SIZE",
    "BLOOM_FILTER_FPR",
    "LOG_LEVEL",
    "LOG_FORMAT",
    "DISABLE_RATE_LIMITING",
    "READ_POOL_SIZE",
    "READ_POOL_ACQUIRE_TIMEOUT_MS",
    "WRITE_BATCH_DELAY_MS",
    "WRITE_BATCH_MAX_SIZE",
];

/// Deprecated variables and their replacements.
const DEPRECATED_VARS: &[(&str, &str)] = &[
    ("MEM100X_DATABASE", "MEM100X_DB_PATH"),
    ("MEMORY_DECAY_RATE", "MEMORY_AGING_DECAY_RATE"),
    ("CACHE_SIZE", "ENTITY_CACHE_SIZE"),
    ("BLOOM_SIZE", "BLOOM_FILTER_SIZE"),
];

/// Prefixes the validator claims ownership of.
const OWNED_PREFIXES: &[&str] = &["MEM100X_", "MEMORY_AGING_", "BLOOM_FILTER_"];

/// Top-level server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Directory holding per-context database files.
    pub data_dir: PathBuf,
    /// Explicit context database paths, keyed by context name.
    pub context_db_paths: BTreeMap<String, PathBuf>,
    /// Entity-cache capacity per context.
    pub entity_cache_size: usize,
    /// Search-cache capacity per context.
    pub search_cache_size: usize,
    /// Cache strategy for entity caches.
    pub cache_strategy: CacheStrategyKind,
    /// Aging model configuration.
    pub aging: AgingConfig,
    /// Whether the Bloom filter is maintained.
    pub bloom_enabled: bool,
    /// Bloom filter sizing: expected items.
    pub bloom_expected_items: usize,
    /// Bloom filter sizing: target false-positive rate.
    pub bloom_fpr: f64,
    /// Kill-switch for the tool-facade rate limiter.
    pub rate_limiting_disabled: bool,
    /// Read-pool size per store.
    pub read_pool_size: usize,
    /// Read-pool acquisition timeout.
    pub acquire_timeout: Duration,
    /// Debounce window for the write aggregator; zero means next-tick mode.
    pub write_batch_delay: Duration,
    /// Batch-size cap that closes a debounced batch early.
    pub write_batch_max_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            context_db_paths: BTreeMap::new(),
            entity_cache_size: DEFAULT_ENTITY_CACHE_SIZE,
            search_cache_size: DEFAULT_SEARCH_CACHE_SIZE,
            cache_strategy: CacheStrategyKind::Lru,
            aging: AgingConfig::default(),
            bloom_enabled: true,
            bloom_expected_items: crate::cache::bloom_defaults::EXPECTED_ITEMS,
            bloom_fpr: crate::cache::bloom_defaults::FPR,
            rate_limiting_disabled: false,
            read_pool_size: DEFAULT_READ_POOL_SIZE,
            acquire_timeout: DEFAULT_ACQUIRE_TIMEOUT,
            write_batch_delay: Duration::ZERO,
            write_batch_max_size: 64,
        }
    }
}

fn default_data_dir() -> PathBuf {
    directories::ProjectDirs::from("dev", "engram", "engram").map_or_else(
        || PathBuf::from("./engram-data"),
        |dirs| dirs.data_dir().to_path_buf(),
    )
}

impl ServerConfig {
    /// Loads configuration from the environment.
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self {
            aging: AgingConfig::from_env(),
            ..Self::default()
        };

        if let Ok(dir) = std::env::var("MEM100X_DATA_DIR") {
            config.data_dir = PathBuf::from(dir);
        }
        if let Ok(path) = std::env::var("MEM100X_DB_PATH") {
            config
                .context_db_paths
                .insert("personal".to_string(), PathBuf::from(path));
        }
        if let Ok(path) = std::env::var("MEM100X_PERSONAL_DB") {
            config
                .context_db_paths
                .insert("personal".to_string(), PathBuf::from(path));
        }
        if let Ok(path) = std::env::var("MEM100X_WORK_DB") {
            config
                .context_db_paths
                .insert("work".to_string(), PathBuf::from(path));
        }
        if let Ok(v) = std::env::var("ENTITY_CACHE_SIZE")
            && let Ok(parsed) = v.parse::<usize>()
        {
            config.entity_cache_size = parsed.max(1);
        }
        if let Ok(v) = std::env::var("SEARCH_CACHE_SIZE")
            && let Ok(parsed) = v.parse::<usize>()
        {
            config.search_cache_size = parsed.max(1);
        }
        if let Ok(v) = std::env::var("CACHE_STRATEGY")
            && let Some(kind) = CacheStrategyKind::parse(&v)
        {
            config.cache_strategy = kind;
        }
        if let Ok(v) = std::env::var("BLOOM_FILTER_ENABLED") {
            config.bloom_enabled = matches!(v.to_lowercase().as_str(), "1" | "true" | "yes");
        }
        if let Ok(v) = std::env::var("BLOOM_FILTER_SIZE")
            && let Ok(parsed) = v.parse::<usize>()
        {
            config.bloom_expected_items = parsed.max(1);
        }
        if let Ok(v) = std::env::var("BLOOM_FILTER_FPR")
            && let Ok(parsed) = v.parse::<f64>()
        {
            config.bloom_fpr = parsed.clamp(1e-9, 0.5);
        }
        if let Ok(v) = std::env::var("DISABLE_RATE_LIMITING") {
            config.rate_limiting_disabled =
                matches!(v.to_lowercase().as_str(), "1" | "true" | "yes");
        }
        if let Ok(v) = std::env::var("READ_POOL_SIZE")
            && let Ok(parsed) = v.parse::<usize>()
        {
            config.read_pool_size = parsed.max(1);
        }
        if let Ok(v) = std::env::var("READ_POOL_ACQUIRE_TIMEOUT_MS")
            && let Ok(parsed) = v.parse::<u64>()
        {
            config.acquire_timeout = Duration::from_millis(parsed);
        }
        if let Ok(v) = std::env::var("WRITE_BATCH_DELAY_MS")
            && let Ok(parsed) = v.parse::<u64>()
        {
            config.write_batch_delay = Duration::from_millis(parsed);
        }
        if let Ok(v) = std::env::var("WRITE_BATCH_MAX_SIZE")
            && let Ok(parsed) = v.parse::<usize>()
        {
            config.write_batch_max_size = parsed.max(1);
        }
        config
    }
}

/// A single environment-validation finding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnvWarning {
    /// A variable in an owned prefix that nothing recognizes.
    Unknown {
        /// The variable name.
        name: String,
    },
    /// A variable that still works but has a preferred replacement.
    Deprecated {
        /// The variable name.
        name: String,
        /// What to use instead.
        replacement: String,
    },
}

impl std::fmt::Display for EnvWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unknown { name } => write!(f, "unknown configuration variable {name}"),
            Self::Deprecated { name, replacement } => {
                write!(f, "{name} is deprecated, use {replacement}")
            },
        }
    }
}

/// Scans the environment for unknown or deprecated configuration variables.
///
/// Warnings only; validation never fails startup.
#[must_use]
pub fn validate_environment() -> Vec<EnvWarning> {
    validate_vars(std::env::vars().map(|(name, _)| name))
}

fn validate_vars(names: impl Iterator<Item = String>) -> Vec<EnvWarning> {
    let mut warnings = Vec::new();
    for name in names {
        if let Some((_, replacement)) = DEPRECATED_VARS
            .iter()
            .find(|(deprecated, _)| *deprecated == name)
        {
            warnings.push(EnvWarning::Deprecated {
                name,
                replacement: (*replacement).to_string(),
            });
            continue;
        }
        let owned = OWNED_PREFIXES.iter().any(|prefix| name.starts_with(prefix));
        if owned && !KNOWN_VARS.contains(&name.as_str()) {
            warnings.push(EnvWarning::Unknown { name });
        }
    }
    warnings
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_sane() {
        let config = ServerConfig::default();
        assert_eq!(config.entity_cache_size, 1000);
        assert_eq!(config.cache_strategy, CacheStrategyKind::Lru);
        assert!(config.bloom_enabled);
        assert_eq!(config.read_pool_size, DEFAULT_READ_POOL_SIZE);
    }

    #[test]
    fn test_validator_flags_unknown_owned_vars() {
        let warnings = validate_vars(
            vec![
                "MEM100X_TYPO_VAR".to_string(),
                "PATH".to_string(),
                "MEM100X_DB_PATH".to_string(),
            ]
            .into_iter(),
        );
        assert_eq!(warnings.len(), 1);
        assert!(matches!(
            &warnings[0],
            EnvWarning::Unknown { name } if name == "MEM100X_TYPO_VAR"
        ));
    }

    #[test]
    fn test_validator_flags_deprecated_with_replacement() {
        let warnings = validate_vars(vec!["MEMORY_DECAY_RATE".to_string()].into_iter());
        assert_eq!(
            warnings,
            vec![EnvWarning::Deprecated {
                name: "MEMORY_DECAY_RATE".to_string(),
                replacement: "MEMORY_AGING_DECAY_RATE".to_string(),
            }]
        );
    }

    #[test]
    fn test_validator_ignores_foreign_vars() {
        let warnings = validate_vars(
            vec!["HOME".to_string(), "CARGO_TARGET_DIR".to_string()].into_iter(),
        );
        assert!(warnings.is_empty());
    }
}
