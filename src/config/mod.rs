//! Configuration management for Sheaf
//!
//! Loading, validation, and dotted-key access for the engine configuration.
//! Every tunable the engine honours is enumerated here; on-disk locations
//! for the six persistent stores live under `[paths]`.

use crate::error::{Result, SheafError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

mod validator;

pub use validator::ConfigValidator;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub workers: WorkersConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub vector: VectorConfig,
    #[serde(default)]
    pub hybrid: HybridConfig,
    #[serde(default)]
    pub timeouts: TimeoutsConfig,
    #[serde(default)]
    pub paths: PathsConfig,
}

/// Worker pool configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkersConfig {
    /// Parallelism of the worker pool
    pub count: usize,
    /// Retry ceiling before a job dead-letters
    pub max_attempts: u32,
}

impl Default for WorkersConfig {
    fn default() -> Self {
        Self {
            count: 4,
            max_attempts: 3,
        }
    }
}

/// Chunker parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkingConfig {
    /// Chunk size in characters
    pub size: usize,
    /// Overlap between consecutive chunks in characters
    pub overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            size: 1024,
            overlap: 128,
        }
    }
}

/// Artifact cache policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    pub enabled: bool,
    /// Time-to-live for cache entries in seconds
    pub ttl_secs: u64,
    /// Compress entries at rest with zstd
    pub compress: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_secs: 7 * 24 * 60 * 60,
            compress: true,
        }
    }
}

/// Vector store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorConfig {
    /// Embedding dimensions, fixed at vector-store creation
    pub dimensions: usize,
}

impl Default for VectorConfig {
    fn default() -> Self {
        Self { dimensions: 384 }
    }
}

/// Hybrid fusion tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HybridConfig {
    /// Default fusion method: "rrf", "weighted", or "adaptive"
    pub default_method: String,
    /// Weight of the vector side in weighted fusion
    pub alpha: f32,
    /// RRF rank constant
    pub rrf_k: f32,
    /// Multiplicative boost for hits present in both result sets
    pub consensus_boost: f32,
}

impl Default for HybridConfig {
    fn default() -> Self {
        Self {
            default_method: "rrf".to_string(),
            alpha: 0.5,
            rrf_k: 60.0,
            consensus_boost: 1.1,
        }
    }
}

/// Extraction deadline formula: `base + per_page * page_estimate`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutsConfig {
    pub base_secs: u64,
    pub per_page_secs: u64,
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            base_secs: 60,
            per_page_secs: 30,
        }
    }
}

/// On-disk locations of the six persistent stores
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    pub registry: PathBuf,
    pub queue: PathBuf,
    pub cache: PathBuf,
    pub vector: PathBuf,
    pub keyword: PathBuf,
    pub fingerprint: PathBuf,
    pub intent_log: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        let root = default_data_dir();
        Self::under_root(&root)
    }
}

impl PathsConfig {
    /// Lay out all stores under a common root directory.
    pub fn under_root(root: &Path) -> Self {
        Self {
            registry: root.join("registry"),
            queue: root.join("queue"),
            cache: root.join("cache"),
            vector: root.join("vector"),
            keyword: root.join("keyword"),
            fingerprint: root.join("fingerprint"),
            intent_log: root.join("intent_log"),
        }
    }
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("sheaf")
}

impl Default for Config {
    fn default() -> Self {
        Self {
            workers: WorkersConfig::default(),
            chunking: ChunkingConfig::default(),
            cache: CacheConfig::default(),
            vector: VectorConfig::default(),
            hybrid: HybridConfig::default(),
            timeouts: TimeoutsConfig::default(),
            paths: PathsConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(SheafError::ConfigNotFound {
                path: path.to_path_buf(),
            });
        }

        let content = std::fs::read_to_string(path).map_err(|e| SheafError::Io {
            source: e,
            context: format!("Failed to read config file: {:?}", path),
        })?;
        let mut config: Config = toml::from_str(&content)?;

        config.apply_env_overrides();
        ConfigValidator::validate(&config)?;

        Ok(config)
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| SheafError::Io {
                source: e,
                context: format!("Failed to create config directory: {:?}", parent),
            })?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(|e| SheafError::Io {
            source: e,
            context: format!("Failed to write config file: {:?}", path),
        })?;
        Ok(())
    }

    /// Build a config with all stores laid out under `root`. Used by tests
    /// and by `--data-dir`.
    pub fn with_root(root: &Path) -> Self {
        Self {
            paths: PathsConfig::under_root(root),
            ..Default::default()
        }
    }

    /// Apply environment variable overrides in the form
    /// `SHEAF_SECTION__KEY=value`
    pub fn apply_env_overrides(&mut self) {
        for (key, value) in std::env::vars() {
            if let Some(config_key) = key.strip_prefix("SHEAF_") {
                let dotted = config_key.to_ascii_lowercase().replace("__", ".");
                if let Err(e) = self.set_value(&dotted, &value) {
                    tracing::warn!("Failed to apply env override {}: {}", key, e);
                }
            }
        }
    }

    /// Get a configuration value by dotted key, rendered as a string
    pub fn get_value(&self, key: &str) -> Result<String> {
        let value = match key {
            "workers.count" => self.workers.count.to_string(),
            "workers.max_attempts" => self.workers.max_attempts.to_string(),
            "chunking.size" => self.chunking.size.to_string(),
            "chunking.overlap" => self.chunking.overlap.to_string(),
            "cache.enabled" => self.cache.enabled.to_string(),
            "cache.ttl_secs" => self.cache.ttl_secs.to_string(),
            "cache.compress" => self.cache.compress.to_string(),
            "vector.dimensions" => self.vector.dimensions.to_string(),
            "hybrid.default_method" => self.hybrid.default_method.clone(),
            "hybrid.alpha" => self.hybrid.alpha.to_string(),
            "hybrid.rrf_k" => self.hybrid.rrf_k.to_string(),
            "hybrid.consensus_boost" => self.hybrid.consensus_boost.to_string(),
            "timeouts.base_secs" => self.timeouts.base_secs.to_string(),
            "timeouts.per_page_secs" => self.timeouts.per_page_secs.to_string(),
            _ => {
                return Err(SheafError::Config(format!(
                    "Unknown configuration key: {}",
                    key
                )))
            }
        };
        Ok(value)
    }

    /// Set a configuration value by dotted key from its string form
    pub fn set_value(&mut self, key: &str, value: &str) -> Result<()> {
        fn parse<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
            value.parse().map_err(|_| {
                SheafError::Config(format!("Cannot parse '{}' for key {}", value, key))
            })
        }

        match key {
            "workers.count" => self.workers.count = parse(key, value)?,
            "workers.max_attempts" => self.workers.max_attempts = parse(key, value)?,
            "chunking.size" => self.chunking.size = parse(key, value)?,
            "chunking.overlap" => self.chunking.overlap = parse(key, value)?,
            "cache.enabled" => self.cache.enabled = parse(key, value)?,
            "cache.ttl_secs" => self.cache.ttl_secs = parse(key, value)?,
            "cache.compress" => self.cache.compress = parse(key, value)?,
            "vector.dimensions" => self.vector.dimensions = parse(key, value)?,
            "hybrid.default_method" => self.hybrid.default_method = value.to_string(),
            "hybrid.alpha" => self.hybrid.alpha = parse(key, value)?,
            "hybrid.rrf_k" => self.hybrid.rrf_k = parse(key, value)?,
            "hybrid.consensus_boost" => self.hybrid.consensus_boost = parse(key, value)?,
            "timeouts.base_secs" => self.timeouts.base_secs = parse(key, value)?,
            "timeouts.per_page_secs" => self.timeouts.per_page_secs = parse(key, value)?,
            _ => {
                return Err(SheafError::Config(format!(
                    "Unknown configuration key: {}",
                    key
                )))
            }
        }
        Ok(())
    }

    /// All settable keys with their current values, for `config list`
    pub fn list_values(&self) -> Vec<(String, String)> {
        const KEYS: &[&str] = &[
            "workers.count",
            "workers.max_attempts",
            "chunking.size",
            "chunking.overlap",
            "cache.enabled",
            "cache.ttl_secs",
            "cache.compress",
            "vector.dimensions",
            "hybrid.default_method",
            "hybrid.alpha",
            "hybrid.rrf_k",
            "hybrid.consensus_boost",
            "timeouts.base_secs",
            "timeouts.per_page_secs",
        ];
        KEYS.iter()
            .map(|k| (k.to_string(), self.get_value(k).unwrap_or_default()))
            .collect()
    }

    /// Get the default configuration file path
    pub fn default_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| SheafError::Config("Cannot determine config directory".to_string()))?;

        Ok(config_dir.join("sheaf").join("config.toml"))
    }
}
