use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{RagError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RagConfig {
    pub data_dir: PathBuf,
    pub chunking: ChunkingConfig,
    pub retrieval: RetrievalConfig,
    pub provider: ProviderConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkingConfig {
    /// Upper bound on chunk length, in bytes (window edges snap down to
    /// UTF-8 char boundaries).
    pub max_chunk_size: usize,
    /// Bytes shared between consecutive chunks. Must be < max_chunk_size.
    pub overlap: usize,
    /// Prefix the embedded text with `[source_id]` for document-level
    /// context. Stored chunk text stays the raw substring.
    pub prefix_source: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    pub default_k: usize,
    pub max_context_chars: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub embedding_model: String,
    pub generation_model: String,
    /// Embedding texts per provider request.
    pub batch_size: usize,
    /// In-flight embedding batches during ingestion.
    pub max_concurrent_batches: usize,
    pub request_timeout_secs: u64,
}

impl RagConfig {
    /// Validate config values, returning errors for clearly broken configurations.
    pub fn validate(&self) -> Result<()> {
        if self.chunking.max_chunk_size == 0 {
            return Err(RagError::Config("chunking.max_chunk_size must be > 0".into()));
        }
        if self.chunking.overlap >= self.chunking.max_chunk_size {
            return Err(RagError::Config(
                "chunking.overlap must be < max_chunk_size".into(),
            ));
        }
        if self.retrieval.default_k == 0 {
            return Err(RagError::Config("retrieval.default_k must be > 0".into()));
        }
        if self.retrieval.max_context_chars == 0 {
            return Err(RagError::Config(
                "retrieval.max_context_chars must be > 0".into(),
            ));
        }
        if self.provider.batch_size == 0 {
            return Err(RagError::Config("provider.batch_size must be > 0".into()));
        }
        if self.provider.max_concurrent_batches == 0 {
            return Err(RagError::Config(
                "provider.max_concurrent_batches must be > 0".into(),
            ));
        }
        Ok(())
    }

    /// Load config from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }
}

impl Default for RagConfig {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("vetor-rag");

        Self {
            data_dir,
            chunking: ChunkingConfig {
                max_chunk_size: 1000,
                overlap: 100,
                prefix_source: true,
            },
            retrieval: RetrievalConfig {
                default_k: 3,
                max_context_chars: 8000,
            },
            provider: ProviderConfig {
                embedding_model: "text-embedding-3-large".to_string(),
                generation_model: "gpt-4o-mini".to_string(),
                batch_size: 64,
                max_concurrent_batches: 4,
                request_timeout_secs: 60,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(RagConfig::default().validate().is_ok());
    }

    #[test]
    fn overlap_must_be_smaller_than_chunk_size() {
        let mut config = RagConfig::default();
        config.chunking.max_chunk_size = 100;
        config.chunking.overlap = 100;
        assert!(matches!(config.validate(), Err(RagError::Config(_))));
    }

    #[test]
    fn zero_chunk_size_rejected() {
        let mut config = RagConfig::default();
        config.chunking.max_chunk_size = 0;
        assert!(matches!(config.validate(), Err(RagError::Config(_))));
    }
}
