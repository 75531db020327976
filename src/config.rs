//! TOML configuration parsing and validation.
//!
//! Every section except `[server]` is optional; missing fields fall back to
//! the defaults below. Request-level overrides (chunk size, overlap, max file
//! size, search limit and threshold) are applied on top of these values.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub db: DbConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub git: GitConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    /// `sqlite` (default) or `memory`.
    #[serde(default = "default_backend")]
    pub backend: String,
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            path: default_db_path(),
            max_connections: default_max_connections(),
        }
    }
}

fn default_backend() -> String {
    "sqlite".to_string()
}
fn default_db_path() -> PathBuf {
    PathBuf::from("./data/vectorizer.sqlite")
}
fn default_max_connections() -> u32 {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
    #[serde(default = "default_overlap")]
    pub overlap_tokens: usize,
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,
    #[serde(default = "default_ignore_globs")]
    pub ignore_globs: Vec<String>,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_tokens: default_max_tokens(),
            overlap_tokens: default_overlap(),
            max_file_size: default_max_file_size(),
            extensions: default_extensions(),
            ignore_globs: default_ignore_globs(),
        }
    }
}

fn default_max_tokens() -> usize {
    1000
}
fn default_overlap() -> usize {
    200
}
fn default_max_file_size() -> u64 {
    1024 * 1024
}

fn default_extensions() -> Vec<String> {
    [
        "py", "js", "ts", "jsx", "tsx", "java", "cpp", "c", "h", "hpp", "cs", "php", "rb", "go",
        "rs", "swift", "kt", "scala", "clj", "hs", "ml", "fs", "sql", "sh", "bash", "zsh", "fish",
        "ps1", "r", "m", "scm", "lisp", "el", "vim", "tex", "md", "rst", "yaml", "yml", "json",
        "xml", "html", "css", "scss", "sass", "vue", "svelte", "astro", "toml", "ini", "cfg",
        "conf",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_ignore_globs() -> Vec<String> {
    [
        "**/.git/**",
        "**/.svn/**",
        "**/.hg/**",
        "**/__pycache__/**",
        "**/node_modules/**",
        "**/vendor/**",
        "**/dist/**",
        "**/build/**",
        "**/target/**",
        "**/.idea/**",
        "**/.vscode/**",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Base URL of the provider. Defaults per provider.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Maximum embedding batches in flight per job.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_max_input_tokens")]
    pub max_input_tokens: usize,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub retry: RetryConfig,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            url: None,
            batch_size: default_batch_size(),
            concurrency: default_concurrency(),
            max_input_tokens: default_max_input_tokens(),
            timeout_secs: default_timeout_secs(),
            retry: RetryConfig::default(),
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_batch_size() -> usize {
    100
}
fn default_concurrency() -> usize {
    2
}
fn default_max_input_tokens() -> usize {
    8191
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl RetryConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

fn default_max_attempts() -> u32 {
    5
}
fn default_base_delay_ms() -> u64 {
    1000
}
fn default_max_delay_ms() -> u64 {
    32_000
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    /// Files read and chunked concurrently per job.
    #[serde(default = "default_file_concurrency")]
    pub file_concurrency: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            file_concurrency: default_file_concurrency(),
        }
    }
}

fn default_file_concurrency() -> usize {
    4
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_limit")]
    pub default_limit: usize,
    #[serde(default = "default_max_limit")]
    pub max_limit: usize,
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f32,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            default_limit: default_limit(),
            max_limit: default_max_limit(),
            similarity_threshold: default_similarity_threshold(),
        }
    }
}

fn default_limit() -> usize {
    10
}
fn default_max_limit() -> usize {
    100
}
fn default_similarity_threshold() -> f32 {
    0.7
}

/// Every scheme `git.allowed_schemes` may name.
pub const KNOWN_SCHEMES: &[&str] = &["http", "https", "git", "ssh", "file"];

#[derive(Debug, Deserialize, Clone)]
pub struct GitConfig {
    /// Where clones are placed. Defaults to `<tmp>/code-vectorizer-repos`.
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,
    /// Keep the local clone after a job finishes.
    #[serde(default)]
    pub keep_clones: bool,
    /// URL schemes a vectorize request may use. `file` lets callers read
    /// repositories from the server's own disk.
    #[serde(default = "default_allowed_schemes")]
    pub allowed_schemes: Vec<String>,
}

impl Default for GitConfig {
    fn default() -> Self {
        Self {
            cache_dir: None,
            keep_clones: false,
            allowed_schemes: default_allowed_schemes(),
        }
    }
}

fn default_allowed_schemes() -> Vec<String> {
    vec!["http".to_string(), "https".to_string()]
}

impl GitConfig {
    pub fn allows_scheme(&self, scheme: &str) -> bool {
        self.allowed_schemes
            .iter()
            .any(|s| s.eq_ignore_ascii_case(scheme))
    }

    pub fn clone_root(&self) -> PathBuf {
        self.cache_dir
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("code-vectorizer-repos"))
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub bind: String,
}

impl Config {
    /// Configuration with every section at its default. Used by tests and
    /// by embedders that assemble the service programmatically.
    pub fn minimal() -> Self {
        Self {
            db: DbConfig::default(),
            chunking: ChunkingConfig::default(),
            embedding: EmbeddingConfig::default(),
            ingest: IngestConfig::default(),
            retrieval: RetrievalConfig::default(),
            git: GitConfig::default(),
            server: ServerConfig {
                bind: "127.0.0.1:8000".to_string(),
            },
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    match config.db.backend.as_str() {
        "sqlite" | "memory" => {}
        other => bail!(
            "Unknown db backend: '{}'. Must be sqlite or memory.",
            other
        ),
    }

    // Validate chunking
    if config.chunking.max_tokens == 0 {
        bail!("chunking.max_tokens must be > 0");
    }
    if config.chunking.overlap_tokens >= config.chunking.max_tokens {
        bail!("chunking.overlap_tokens must be < chunking.max_tokens");
    }
    if config.chunking.extensions.is_empty() {
        bail!("chunking.extensions must not be empty");
    }

    // Validate embedding
    if config.embedding.batch_size == 0 {
        bail!("embedding.batch_size must be > 0");
    }
    if config.embedding.concurrency == 0 {
        bail!("embedding.concurrency must be > 0");
    }
    if config.embedding.retry.max_attempts == 0 {
        bail!("embedding.retry.max_attempts must be >= 1");
    }
    if config.embedding.is_enabled() {
        if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
            bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.model.is_none() {
            bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
    }
    match config.embedding.provider.as_str() {
        "disabled" | "openai" | "ollama" => {}
        other => bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, or ollama.",
            other
        ),
    }

    if config.ingest.file_concurrency == 0 {
        bail!("ingest.file_concurrency must be > 0");
    }

    // Validate retrieval
    if config.retrieval.default_limit == 0 || config.retrieval.max_limit == 0 {
        bail!("retrieval limits must be >= 1");
    }
    if config.retrieval.default_limit > config.retrieval.max_limit {
        bail!("retrieval.default_limit must be <= retrieval.max_limit");
    }
    if !(-1.0..=1.0).contains(&config.retrieval.similarity_threshold) {
        bail!("retrieval.similarity_threshold must be in [-1.0, 1.0]");
    }

    // Validate git
    if config.git.allowed_schemes.is_empty() {
        bail!("git.allowed_schemes must not be empty");
    }
    for scheme in &config.git.allowed_schemes {
        if !KNOWN_SCHEMES.contains(&scheme.to_ascii_lowercase().as_str()) {
            bail!(
                "Unknown scheme in git.allowed_schemes: '{}'. Must be one of {}.",
                scheme,
                KNOWN_SCHEMES.join(", ")
            );
        }
    }

    Ok(())
}
