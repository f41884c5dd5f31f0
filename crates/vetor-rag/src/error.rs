use thiserror::Error;

/// Result alias for retrieval-core operations.
pub type Result<T> = std::result::Result<T, RagError>;

/// Error taxonomy for the retrieval core.
///
/// Every failure surfaces to the immediate caller with a structured kind;
/// the core never retries internally and never substitutes a default answer.
#[derive(Debug, Error)]
pub enum RagError {
    /// Caller bug: bad chunking or retrieval parameters. Not retriable.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// A vector's length disagrees with the store's established dimensionality.
    #[error("embedding dimension mismatch: store has {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Embeddings from a different model than the store was built with.
    /// Mixing models invalidates comparability; caller must re-embed.
    #[error("embedding model mismatch: store was built with '{expected}', got '{actual}'")]
    ModelMismatch { expected: String, actual: String },

    /// Store artifacts are mutually inconsistent. Fatal for that store;
    /// caller must rebuild from source documents.
    #[error("embedding store corrupt: {0}")]
    StoreCorrupt(String),

    /// Ranking requested against a store with zero rows.
    #[error("embedding store is empty")]
    EmptyStore,

    /// External provider failure (transport, auth, rate limit, timeout).
    /// The code is exposed so a caller-level retry policy can decide.
    #[error("provider error [{code}]: {message}")]
    Provider { code: String, message: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl RagError {
    /// Provider error code used for request timeouts.
    pub const TIMEOUT: &'static str = "timeout";

    pub(crate) fn provider(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Provider {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Whether a caller retry policy may reasonably retry this error.
    /// Only transient provider failures qualify; config and store-integrity
    /// errors will fail identically on retry.
    pub fn is_retriable(&self) -> bool {
        match self {
            Self::Provider { code, .. } => {
                matches!(code.as_str(), "timeout" | "transport" | "rate_limit" | "http_429" | "http_500" | "http_502" | "http_503")
            }
            _ => false,
        }
    }
}
