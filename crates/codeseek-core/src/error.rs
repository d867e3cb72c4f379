use std::path::PathBuf;

/// Errors that can occur while indexing or searching a code tree.
///
/// Library crates return this type directly; the binary renders it through
/// `miette` at the boundary.
///
/// # Examples
///
/// ```
/// use codeseek_core::CodeseekError;
///
/// let err = CodeseekError::EmbeddingProvider {
///     retryable: true,
///     message: "rate limited".into(),
/// };
/// assert!(err.is_retryable());
/// assert!(err.to_string().contains("rate limited"));
/// ```
#[derive(Debug, thiserror::Error, miette::Diagnostic)]
pub enum CodeseekError {
    /// The root path handed to the walker does not exist.
    #[error("path not found: {}", .0.display())]
    #[diagnostic(help("check the --path argument"))]
    PathNotFound(PathBuf),

    /// The root path exists but cannot be read.
    #[error("path not readable: {}: {source}", .path.display())]
    PathNotReadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The embedding provider rejected or failed a request.
    #[error("embedding provider error{}: {message}", retry_suffix(.retryable))]
    EmbeddingProvider { retryable: bool, message: String },

    /// Writing or reading the persisted index failed at the I/O level.
    #[error("persistence error: {0}")]
    Persistence(String),

    /// The persisted index failed validation.
    #[error("corrupt index: {0}")]
    #[diagnostic(help("rebuild the index with `codeseek index`"))]
    CorruptIndex(String),

    /// A query vector does not match the index dimension.
    #[error("dimension mismatch: index has {expected} dimensions, query has {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// A build finished without a single successfully embedded unit.
    #[error("no code units were embedded ({units} found, {failed} failed)")]
    EmptyBuild { units: usize, failed: usize },

    /// The build was cancelled before it completed.
    #[error("build cancelled")]
    Cancelled,

    /// Filesystem I/O failure outside the persistence path.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid or missing configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// JSON serialization / deserialization failure.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML deserialization failure.
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

fn retry_suffix(retryable: &bool) -> &'static str {
    if *retryable {
        " (retryable)"
    } else {
        ""
    }
}

impl CodeseekError {
    /// Build a retryable provider error.
    pub fn transient(message: impl Into<String>) -> Self {
        Self::EmbeddingProvider {
            retryable: true,
            message: message.into(),
        }
    }

    /// Build a non-retryable provider error.
    pub fn permanent(message: impl Into<String>) -> Self {
        Self::EmbeddingProvider {
            retryable: false,
            message: message.into(),
        }
    }

    /// Whether retrying the failed call may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::EmbeddingProvider { retryable: true, .. })
    }
}
