use std::env;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::BlockwiseError;

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

/// Read a profiled env var: tries {PROFILE}_{KEY} first, falls back to {KEY}.
fn profiled_env_opt(profile: &str, key: &str) -> Option<String> {
    if !profile.is_empty() {
        let prefixed = format!("{}_{}", profile, key);
        if let Some(v) = env_opt(&prefixed) {
            return Some(v);
        }
    }
    env_opt(key)
}

fn profiled_env_usize(profile: &str, key: &str, default: usize) -> usize {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

// ── Top-level config ──────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Active profile name (empty = default).
    #[serde(default)]
    pub profile: String,
    #[serde(default)]
    pub engine: EngineConfig,
}

impl Config {
    /// Build config from environment variables (call `load_dotenv()` first).
    /// Profile is read from `BLOCKWISE_PROFILE`. When set (e.g. `BENCH`),
    /// every key is first looked up as `{PROFILE}_{KEY}`, falling back to `{KEY}`.
    pub fn from_env() -> Self {
        let profile = env_or("BLOCKWISE_PROFILE", "").to_uppercase();
        Self::for_profile(&profile)
    }

    /// Build config for a specific named profile (empty string = default).
    pub fn for_profile(profile: &str) -> Self {
        let p = profile.to_uppercase();
        Self {
            engine: EngineConfig::from_env_profiled(&p),
            profile: p,
        }
    }

    /// Parse a TOML document. Missing sections fall back to defaults.
    pub fn from_toml(toml_str: &str) -> Result<Self, BlockwiseError> {
        let config: Self = toml::from_str(toml_str)?;
        config.engine.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, BlockwiseError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn profile_label(&self) -> &str {
        if self.profile.is_empty() { "default" } else { &self.profile }
    }

    /// Print a summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Config loaded (profile: {}):", self.profile_label());
        tracing::info!("  engine:  block_size={}, worker_threads={}", self.engine.block_size, self.engine.worker_threads);
        tracing::info!(
            "  arena:   queue_capacity={}, task_size={}..{}, superblocks={}",
            self.engine.queue_capacity,
            self.engine.min_task_size,
            self.engine.max_task_size,
            self.engine.num_superblocks
        );
    }

    pub fn summary(&self) -> serde_json::Value {
        serde_json::json!({
            "profile": self.profile_label(),
            "engine": self.engine,
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            profile: String::new(),
            engine: EngineConfig::default(),
        }
    }
}

// ── Engine ────────────────────────────────────────────────────

/// Named configuration scalars consumed when a by-blocks run is set up.
///
/// Arena sizes are in bytes. A zero `queue_capacity` or `max_task_size`
/// means "derive from the problem size" (see `ArenaConfig::for_problem`
/// in the compute crate).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Tile edge length.
    #[serde(default = "default_block_size")]
    pub block_size: usize,
    /// Number of worker threads. 0 = available parallelism.
    #[serde(default)]
    pub worker_threads: usize,
    #[serde(default)]
    pub queue_capacity: usize,
    #[serde(default = "default_min_task_size")]
    pub min_task_size: usize,
    #[serde(default)]
    pub max_task_size: usize,
    #[serde(default = "default_num_superblocks")]
    pub num_superblocks: usize,
}

fn default_block_size() -> usize { 128 }
fn default_min_task_size() -> usize { 16 }
fn default_num_superblocks() -> usize { 4 }

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            block_size: default_block_size(),
            worker_threads: 0,
            queue_capacity: 0,
            min_task_size: default_min_task_size(),
            max_task_size: 0,
            num_superblocks: default_num_superblocks(),
        }
    }
}

impl EngineConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            block_size: profiled_env_usize(p, "BLOCK_SIZE", default_block_size()),
            worker_threads: profiled_env_usize(p, "WORKER_THREADS", 0),
            queue_capacity: profiled_env_usize(p, "QUEUE_CAPACITY", 0),
            min_task_size: profiled_env_usize(p, "MIN_TASK_SIZE", default_min_task_size()),
            max_task_size: profiled_env_usize(p, "MAX_TASK_SIZE", 0),
            num_superblocks: profiled_env_usize(p, "NUM_SUPERBLOCKS", default_num_superblocks()),
        }
    }

    pub fn validate(&self) -> Result<(), BlockwiseError> {
        if self.block_size == 0 {
            return Err(BlockwiseError::InvalidConfig("block_size must be positive".into()));
        }
        if self.num_superblocks == 0 {
            return Err(BlockwiseError::InvalidConfig("num_superblocks must be positive".into()));
        }
        if self.min_task_size == 0 {
            return Err(BlockwiseError::InvalidConfig("min_task_size must be positive".into()));
        }
        Ok(())
    }

    /// Resolve worker thread count (0 means use available parallelism).
    pub fn resolved_worker_threads(&self) -> usize {
        if self.worker_threads == 0 {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4)
        } else {
            self.worker_threads
        }
    }
}
