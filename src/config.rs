//! Configuration for the indexing and search service.
//!
//! Layered configuration:
//! - Default values
//! - TOML configuration file (`.repolens/settings.toml`)
//! - Environment variable overrides
//!
//! # Environment Variables
//!
//! Environment variables must be prefixed with `REPOLENS_` and use double
//! underscores to separate nested levels:
//! - `REPOLENS_INDEXING__DEBOUNCE_MS=250` sets `indexing.debounce_ms`
//! - `REPOLENS_DISPATCHER__SEARCH_TIMEOUT_MS=5000` sets `dispatcher.search_timeout_ms`

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

pub const CONFIG_DIR: &str = ".repolens";
pub const CONFIG_FILE: &str = "settings.toml";

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Settings {
    /// Version of the configuration schema
    #[serde(default = "default_version")]
    pub version: u32,

    /// Directory holding per-repository index databases
    #[serde(default = "default_index_path")]
    pub index_path: PathBuf,

    /// Workspace root; defaults to the current directory when absent
    #[serde(default)]
    pub workspace_root: Option<PathBuf>,

    #[serde(default)]
    pub indexing: IndexingConfig,

    #[serde(default)]
    pub dispatcher: DispatcherConfig,

    #[serde(default)]
    pub aggregator: AggregatorConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub export: ExportConfig,

    #[serde(default)]
    pub subscriptions: SubscriptionConfig,

    #[serde(default)]
    pub semantic: SemanticConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    /// Language-specific settings
    #[serde(default)]
    pub languages: HashMap<String, LanguageConfig>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct IndexingConfig {
    /// Number of parallel threads for bulk indexing
    #[serde(default = "default_parallel_threads")]
    pub parallel_threads: usize,

    /// Patterns to ignore during indexing
    #[serde(default = "default_ignore_patterns")]
    pub ignore_patterns: Vec<String>,

    /// Debounce window for watcher-driven re-indexing
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    /// Files larger than this are skipped
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DispatcherConfig {
    /// Plugins are instantiated on first use rather than at startup
    #[serde(default = "default_true")]
    pub lazy_load: bool,

    /// Bounded plugin instantiation time; exceeding it marks the
    /// language unavailable for the process lifetime
    #[serde(default = "default_plugin_load_timeout_ms")]
    pub plugin_load_timeout_ms: u64,

    /// Per-query plugin search deadline
    #[serde(default = "default_search_timeout_ms")]
    pub search_timeout_ms: u64,

    /// Rolling window of execution-time samples kept per plugin
    #[serde(default = "default_latency_sample_window")]
    pub latency_sample_window: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AggregatorConfig {
    /// `simple` or `smart`
    #[serde(default = "default_strategy")]
    pub strategy: String,

    /// Snippet similarity threshold for smart grouping
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f32,

    /// TTL for fingerprinted aggregation results
    #[serde(default = "default_aggregator_ttl")]
    pub cache_ttl_secs: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct CacheConfig {
    #[serde(default = "default_symbol_lookup_ttl")]
    pub symbol_lookup_ttl_secs: u64,

    #[serde(default = "default_search_ttl")]
    pub search_ttl_secs: u64,

    #[serde(default = "default_semantic_search_ttl")]
    pub semantic_search_ttl_secs: u64,

    #[serde(default = "default_search_ttl")]
    pub documentation_search_ttl_secs: u64,

    #[serde(default = "default_status_ttl")]
    pub project_status_ttl_secs: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct ExportConfig {
    /// Additional sensitive-path patterns, additive with the built-ins
    #[serde(default)]
    pub sensitive_patterns: Vec<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SubscriptionConfig {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    #[serde(default = "default_batch_timeout_ms")]
    pub batch_timeout_ms: u64,

    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,

    /// Pending notifications per session; oldest are dropped beyond this
    #[serde(default = "default_max_pending")]
    pub max_pending: usize,

    #[serde(default = "default_session_ttl")]
    pub session_ttl_secs: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SemanticConfig {
    /// Whether semantic search is enabled at all
    #[serde(default = "default_false")]
    pub enabled: bool,

    /// Location of the out-of-process vector service
    #[serde(default)]
    pub endpoint: Option<String>,

    #[serde(default = "default_collection")]
    pub collection: String,

    /// Environment variable holding the embedding backend credentials
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LoggingConfig {
    /// Default log level (`error`, `warn`, `info`, `debug`, `trace`)
    #[serde(default = "default_log_level")]
    pub default: String,

    /// Per-module level overrides
    #[serde(default)]
    pub modules: HashMap<String, String>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LanguageConfig {
    /// Whether this language is enabled
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// File extensions for this language
    #[serde(default)]
    pub extensions: Vec<String>,
}

// Default value functions
fn default_version() -> u32 {
    1
}
fn default_index_path() -> PathBuf {
    PathBuf::from(".repolens/index")
}
fn default_parallel_threads() -> usize {
    num_cpus::get()
}
fn default_true() -> bool {
    true
}
fn default_false() -> bool {
    false
}
fn default_debounce_ms() -> u64 {
    100
}
fn default_max_file_size() -> u64 {
    2 * 1024 * 1024
}
fn default_plugin_load_timeout_ms() -> u64 {
    5_000
}
fn default_search_timeout_ms() -> u64 {
    10_000
}
fn default_latency_sample_window() -> usize {
    100
}
fn default_strategy() -> String {
    "smart".to_string()
}
fn default_similarity_threshold() -> f32 {
    0.8
}
fn default_aggregator_ttl() -> u64 {
    300
}
fn default_symbol_lookup_ttl() -> u64 {
    1_800
}
fn default_search_ttl() -> u64 {
    600
}
fn default_semantic_search_ttl() -> u64 {
    3_600
}
fn default_status_ttl() -> u64 {
    60
}
fn default_batch_size() -> usize {
    10
}
fn default_batch_timeout_ms() -> u64 {
    1_000
}
fn default_max_sessions() -> usize {
    100
}
fn default_max_pending() -> usize {
    1_000
}
fn default_session_ttl() -> u64 {
    3_600
}
fn default_collection() -> String {
    "code-embeddings".to_string()
}
fn default_api_key_env() -> String {
    "REPOLENS_EMBEDDING_API_KEY".to_string()
}
fn default_log_level() -> String {
    "warn".to_string()
}
fn default_ignore_patterns() -> Vec<String> {
    vec![
        "target/**".to_string(),
        "node_modules/**".to_string(),
        ".git/**".to_string(),
        "*.generated.*".to_string(),
    ]
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            version: default_version(),
            index_path: default_index_path(),
            workspace_root: None,
            indexing: IndexingConfig::default(),
            dispatcher: DispatcherConfig::default(),
            aggregator: AggregatorConfig::default(),
            cache: CacheConfig::default(),
            export: ExportConfig::default(),
            subscriptions: SubscriptionConfig::default(),
            semantic: SemanticConfig::default(),
            logging: LoggingConfig::default(),
            languages: HashMap::new(),
        }
    }
}

impl Default for IndexingConfig {
    fn default() -> Self {
        Self {
            parallel_threads: default_parallel_threads(),
            ignore_patterns: default_ignore_patterns(),
            debounce_ms: default_debounce_ms(),
            max_file_size: default_max_file_size(),
        }
    }
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            lazy_load: true,
            plugin_load_timeout_ms: default_plugin_load_timeout_ms(),
            search_timeout_ms: default_search_timeout_ms(),
            latency_sample_window: default_latency_sample_window(),
        }
    }
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            strategy: default_strategy(),
            similarity_threshold: default_similarity_threshold(),
            cache_ttl_secs: default_aggregator_ttl(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            symbol_lookup_ttl_secs: default_symbol_lookup_ttl(),
            search_ttl_secs: default_search_ttl(),
            semantic_search_ttl_secs: default_semantic_search_ttl(),
            documentation_search_ttl_secs: default_search_ttl(),
            project_status_ttl_secs: default_status_ttl(),
        }
    }
}

impl Default for SubscriptionConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            batch_timeout_ms: default_batch_timeout_ms(),
            max_sessions: default_max_sessions(),
            max_pending: default_max_pending(),
            session_ttl_secs: default_session_ttl(),
        }
    }
}

impl Default for SemanticConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: None,
            collection: default_collection(),
            api_key_env: default_api_key_env(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            default: default_log_level(),
            modules: HashMap::new(),
        }
    }
}

impl Settings {
    /// Load settings with full layering: defaults, then the TOML file
    /// under the workspace, then `REPOLENS_` environment variables.
    pub fn load() -> Result<Self, figment::Error> {
        Self::load_from(PathBuf::from(CONFIG_DIR).join(CONFIG_FILE))
    }

    /// Load settings from an explicit config file path.
    pub fn load_from(config_path: PathBuf) -> Result<Self, figment::Error> {
        Figment::from(Serialized::defaults(Settings::default()))
            .merge(Toml::file(config_path))
            .merge(Env::prefixed("REPOLENS_").split("__"))
            .extract()
    }

    /// Write a default configuration file; errors if one already exists
    /// unless `force` is set.
    pub fn init_config_file(workspace: &std::path::Path, force: bool) -> std::io::Result<PathBuf> {
        let dir = workspace.join(CONFIG_DIR);
        std::fs::create_dir_all(&dir)?;
        let path = dir.join(CONFIG_FILE);
        if path.exists() && !force {
            return Err(std::io::Error::new(
                std::io::ErrorKind::AlreadyExists,
                format!("{} already exists (use --force to overwrite)", path.display()),
            ));
        }
        let rendered = toml::to_string_pretty(&Settings::default())
            .map_err(|e| std::io::Error::other(e.to_string()))?;
        std::fs::write(&path, rendered)?;
        Ok(path)
    }

    /// Resolve the workspace root, defaulting to the current directory.
    pub fn workspace_root(&self) -> PathBuf {
        self.workspace_root
            .clone()
            .unwrap_or_else(|| PathBuf::from("."))
    }
}
