use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::CodeseekError;

/// Top-level configuration loaded from `.codeseek.toml`.
///
/// Every section and field has a default, so an empty file is valid.
///
/// # Examples
///
/// ```
/// use codeseek_core::CodeseekConfig;
///
/// let config = CodeseekConfig::default();
/// assert_eq!(config.search.top_k, 5);
/// assert_eq!(config.embedding.model, "text-embedding-3-small");
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CodeseekConfig {
    /// Embedding provider settings.
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    /// Source walking and chunking settings.
    #[serde(default)]
    pub index: IndexConfig,
    /// Query settings.
    #[serde(default)]
    pub search: SearchConfig,
}

impl CodeseekConfig {
    /// Load configuration from a TOML file at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`CodeseekError::Io`] if the file cannot be read, or
    /// [`CodeseekError::Toml`] if the content is not valid TOML.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use codeseek_core::CodeseekConfig;
    /// use std::path::Path;
    ///
    /// let config = CodeseekConfig::from_file(Path::new(".codeseek.toml")).unwrap();
    /// ```
    pub fn from_file(path: &Path) -> Result<Self, CodeseekError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns [`CodeseekError::Toml`] if parsing fails, or
    /// [`CodeseekError::Config`] if a value is out of range.
    ///
    /// # Examples
    ///
    /// ```
    /// use codeseek_core::CodeseekConfig;
    ///
    /// let toml = r#"
    /// [search]
    /// top_k = 10
    /// "#;
    /// let config = CodeseekConfig::from_toml(toml).unwrap();
    /// assert_eq!(config.search.top_k, 10);
    /// ```
    pub fn from_toml(content: &str) -> Result<Self, CodeseekError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), CodeseekError> {
        if self.embedding.batch_size == 0 {
            return Err(CodeseekError::Config(
                "embedding.batch_size must be at least 1".into(),
            ));
        }
        if self.embedding.max_concurrent_requests == 0 {
            return Err(CodeseekError::Config(
                "embedding.max_concurrent_requests must be at least 1".into(),
            ));
        }
        if self.embedding.max_input_tokens == 0 {
            return Err(CodeseekError::Config(
                "embedding.max_input_tokens must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Configuration for the embedding provider.
///
/// # Examples
///
/// ```
/// use codeseek_core::EmbeddingConfig;
///
/// let config = EmbeddingConfig::default();
/// assert_eq!(config.provider, "openai");
/// assert_eq!(config.dimensions, 1536);
/// assert_eq!(config.max_input_tokens, 8000);
/// assert_eq!(config.batch_size, 100);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Provider name (default: `"openai"`; any OpenAI-compatible endpoint works).
    #[serde(default = "default_provider")]
    pub provider: String,
    /// API key. Falls back to the `OPENAI_API_KEY` env var when unset.
    pub api_key: Option<String>,
    /// Model identifier (default: `"text-embedding-3-small"`).
    #[serde(default = "default_model")]
    pub model: String,
    /// Custom base URL for API requests.
    pub base_url: Option<String>,
    /// Output vector dimension (default: 1536).
    #[serde(default = "default_dimensions")]
    pub dimensions: usize,
    /// Maximum tokens accepted per input text (default: 8000).
    #[serde(default = "default_max_input_tokens")]
    pub max_input_tokens: usize,
    /// Texts per embedding request (default: 100).
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Embedding requests allowed in flight at once (default: 2).
    #[serde(default = "default_max_concurrent_requests")]
    pub max_concurrent_requests: usize,
    /// Retries after the first attempt before a retryable failure becomes fatal (default: 3).
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// First backoff delay in milliseconds, doubled per attempt (default: 1000).
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
    /// Per-call timeout in seconds (default: 30).
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_provider() -> String {
    "openai".into()
}

fn default_model() -> String {
    "text-embedding-3-small".into()
}

fn default_dimensions() -> usize {
    1536
}

fn default_max_input_tokens() -> usize {
    8000
}

fn default_batch_size() -> usize {
    100
}

fn default_max_concurrent_requests() -> usize {
    2
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_base_delay_ms() -> u64 {
    1000
}

fn default_timeout_secs() -> u64 {
    30
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            api_key: None,
            model: default_model(),
            base_url: None,
            dimensions: default_dimensions(),
            max_input_tokens: default_max_input_tokens(),
            batch_size: default_batch_size(),
            max_concurrent_requests: default_max_concurrent_requests(),
            max_retries: default_max_retries(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// Source walking and chunking configuration.
///
/// # Examples
///
/// ```
/// use codeseek_core::IndexConfig;
///
/// let config = IndexConfig::default();
/// assert!(config.extensions.contains(&"c".to_string()));
/// assert_eq!(config.fragment_lines, 20);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexConfig {
    /// Where the index file lives, relative to the indexed root (default: `.codeseek/index.json`).
    #[serde(default = "default_index_path")]
    pub path: PathBuf,
    /// File extensions (without the dot) eligible for indexing.
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,
    /// Glob patterns of files to skip, on top of `.gitignore`.
    #[serde(default)]
    pub ignore_patterns: Vec<String>,
    /// Lines per fragment for files without brace structure; 0 keeps whole files (default: 20).
    #[serde(default = "default_fragment_lines")]
    pub fragment_lines: usize,
    /// Files larger than this many bytes are skipped (default: 1 MiB).
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,
}

fn default_index_path() -> PathBuf {
    PathBuf::from(".codeseek/index.json")
}

fn default_extensions() -> Vec<String> {
    ["c", "h", "cpp", "hpp", "py", "js", "sh"]
        .iter()
        .map(|e| e.to_string())
        .collect()
}

fn default_fragment_lines() -> usize {
    20
}

fn default_max_file_size() -> u64 {
    1_048_576
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            path: default_index_path(),
            extensions: default_extensions(),
            ignore_patterns: Vec::new(),
            fragment_lines: default_fragment_lines(),
            max_file_size: default_max_file_size(),
        }
    }
}

/// Query configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Results returned per query (default: 5).
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

fn default_top_k() -> usize {
    5
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
        }
    }
}
