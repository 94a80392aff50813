use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::time::Duration;

const DEFAULT_DATABASE_URI: &str = "~/.vectool";
const DEFAULT_TABLE_NAME: &str = "vectool-table";
const DEFAULT_WEAK_READ_CONSISTENCY_SECS: u64 = 30;
const DEFAULT_LIST_LIMIT: usize = 1000;
const DEFAULT_EMBEDDING_FUNCTION: &str = "fastembed";
const DEFAULT_MODEL_NAME: &str = "all-MiniLM-L6-v2";
const DEFAULT_EMBEDDING_DIMENSIONS: usize = 384;
const DEFAULT_MAX_RETRIES: usize = 3;
const DEFAULT_VERIFY_RETRIES: usize = 5;
const DEFAULT_BACKOFF_MS: u64 = 25;
const MAX_BACKOFF: Duration = Duration::from_secs(2);
const DEFAULT_MAX_VERSIONS: usize = 10;
const DEFAULT_INDEX_CACHE_SIZE_MB: usize = 1000;
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 3917;

/// Errors raised while loading configuration.
#[derive(Debug)]
pub enum ConfigError {
    /// The config file could not be read.
    Read(String),
    /// The config file is not valid TOML for this schema.
    Parse(String),
    /// An environment override holds a value of the wrong type.
    InvalidEnv { var: String, value: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Read(msg) => write!(f, "failed to read config: {msg}"),
            Self::Parse(msg) => write!(f, "invalid config: {msg}"),
            Self::InvalidEnv { var, value } => {
                write!(f, "invalid value '{value}' for environment variable {var}")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

#[derive(Debug, Deserialize, Serialize, PartialEq, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub optimization: OptimizationConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
pub struct DatabaseConfig {
    #[serde(default = "default_database_uri")]
    pub uri: String,
    #[serde(default = "default_table_name")]
    pub default_table: String,
    /// Weak read consistency interval; 0 connects with engine defaults.
    #[serde(default = "default_weak_read_consistency_secs")]
    pub weak_read_consistency_secs: u64,
    /// Upper bound passed to the engine's table listing call.
    #[serde(default = "default_list_limit")]
    pub list_limit: usize,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            uri: default_database_uri(),
            default_table: default_table_name(),
            weak_read_consistency_secs: default_weak_read_consistency_secs(),
            list_limit: default_list_limit(),
        }
    }
}

fn default_database_uri() -> String {
    DEFAULT_DATABASE_URI.to_string()
}

fn default_table_name() -> String {
    DEFAULT_TABLE_NAME.to_string()
}

fn default_weak_read_consistency_secs() -> u64 {
    DEFAULT_WEAK_READ_CONSISTENCY_SECS
}

fn default_list_limit() -> usize {
    DEFAULT_LIST_LIMIT
}

#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_function")]
    pub function: String,
    #[serde(default = "default_model_name")]
    pub model: String,
    /// Output width for the hashing embedder; fastembed models fix their own.
    #[serde(default = "default_embedding_dimensions")]
    pub dimensions: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            function: default_embedding_function(),
            model: default_model_name(),
            dimensions: default_embedding_dimensions(),
        }
    }
}

fn default_embedding_function() -> String {
    DEFAULT_EMBEDDING_FUNCTION.to_string()
}

fn default_model_name() -> String {
    DEFAULT_MODEL_NAME.to_string()
}

fn default_embedding_dimensions() -> usize {
    DEFAULT_EMBEDDING_DIMENSIONS
}

#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,
    /// Budget for the visibility check that follows a successful create.
    #[serde(default = "default_verify_retries")]
    pub verify_retries: usize,
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            verify_retries: default_verify_retries(),
            backoff_ms: default_backoff_ms(),
        }
    }
}

impl RetryConfig {
    /// Delay before retry number `attempt` (0-based), doubling each time.
    pub fn delay(&self, attempt: usize) -> Duration {
        if self.backoff_ms == 0 {
            return Duration::ZERO;
        }
        let factor = 1u64 << attempt.min(16);
        Duration::from_millis(self.backoff_ms.saturating_mul(factor)).min(MAX_BACKOFF)
    }

    /// Sleep for the backoff of `attempt`, skipping the call entirely when zero.
    pub fn pause(&self, attempt: usize) {
        let delay = self.delay(attempt);
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
    }
}

fn default_max_retries() -> usize {
    DEFAULT_MAX_RETRIES
}

fn default_verify_retries() -> usize {
    DEFAULT_VERIFY_RETRIES
}

fn default_backoff_ms() -> u64 {
    DEFAULT_BACKOFF_MS
}

#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
pub struct OptimizationConfig {
    #[serde(default = "default_true")]
    pub auto_create_indices: bool,
    #[serde(default = "default_true")]
    pub auto_optimize: bool,
    #[serde(default = "default_true")]
    pub prewarm_indices: bool,
    #[serde(default = "default_true")]
    pub enable_versioning: bool,
    #[serde(default = "default_max_versions")]
    pub max_versions: usize,
    #[serde(default = "default_true")]
    pub auto_cleanup_versions: bool,
    #[serde(default)]
    pub use_gpu_indexing: bool,
    #[serde(default = "default_index_cache_size_mb")]
    pub index_cache_size_mb: usize,
}

impl Default for OptimizationConfig {
    fn default() -> Self {
        Self {
            auto_create_indices: true,
            auto_optimize: true,
            prewarm_indices: true,
            enable_versioning: true,
            max_versions: default_max_versions(),
            auto_cleanup_versions: true,
            use_gpu_indexing: false,
            index_cache_size_mb: default_index_cache_size_mb(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_max_versions() -> usize {
    DEFAULT_MAX_VERSIONS
}

fn default_index_cache_size_mb() -> usize {
    DEFAULT_INDEX_CACHE_SIZE_MB
}

#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> String {
    DEFAULT_HOST.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

impl Config {
    /// Load `path` if it exists (defaults otherwise), then apply environment overrides.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let mut config = if path.exists() {
            Self::from_file(path)?
        } else {
            log::debug!("config file {} not found, using defaults", path.display());
            Self::default()
        };
        config.apply_env(|var| std::env::var(var).ok())?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Read(format!("'{}': {e}", path.display())))?;
        Self::parse(&contents)
    }

    pub fn parse(contents: &str) -> Result<Self, ConfigError> {
        toml::from_str(contents).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    pub fn to_toml_string(&self) -> String {
        toml::to_string_pretty(self).unwrap_or_default()
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    /// Overlay `VECTOOL_*` environment variables read through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("VECTOOL_DB_URI") {
            self.database.uri = v;
        }
        if let Some(v) = lookup("VECTOOL_TABLE_NAME") {
            self.database.default_table = v;
        }
        if let Some(v) = lookup("VECTOOL_EMBEDDING_FUNCTION") {
            self.embedding.function = v;
        }
        if let Some(v) = lookup("VECTOOL_MODEL_NAME") {
            self.embedding.model = v;
        }
        if let Some(v) = env_number(&lookup, "VECTOOL_WEAK_READ_CONSISTENCY")? {
            self.database.weak_read_consistency_secs = v;
        }
        if let Some(v) = env_number(&lookup, "VECTOOL_MAX_VERSIONS")? {
            self.optimization.max_versions = v as usize;
        }

        let opt = &mut self.optimization;
        let flags: [(&str, &mut bool); 6] = [
            ("VECTOOL_AUTO_CREATE_INDICES", &mut opt.auto_create_indices),
            ("VECTOOL_AUTO_OPTIMIZE", &mut opt.auto_optimize),
            ("VECTOOL_PREWARM_INDICES", &mut opt.prewarm_indices),
            ("VECTOOL_ENABLE_VERSIONING", &mut opt.enable_versioning),
            ("VECTOOL_AUTO_CLEANUP_VERSIONS", &mut opt.auto_cleanup_versions),
            ("VECTOOL_USE_GPU_INDEXING", &mut opt.use_gpu_indexing),
        ];
        for (var, slot) in flags {
            if let Some(v) = env_bool(&lookup, var)? {
                *slot = v;
            }
        }
        Ok(())
    }
}

fn env_number<F>(lookup: &F, var: &str) -> Result<Option<u64>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(var) {
        None => Ok(None),
        Some(raw) => raw.trim().parse().map(Some).map_err(|_| ConfigError::InvalidEnv {
            var: var.to_string(),
            value: raw,
        }),
    }
}

fn env_bool<F>(lookup: &F, var: &str) -> Result<Option<bool>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(var) {
        None => Ok(None),
        Some(raw) => match raw.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Ok(Some(true)),
            "false" | "0" | "no" | "off" => Ok(Some(false)),
            _ => Err(ConfigError::InvalidEnv {
                var: var.to_string(),
                value: raw,
            }),
        },
    }
}
