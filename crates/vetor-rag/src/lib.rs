//! Semantic retrieval core: chunking, embedding persistence, cosine ranking,
//! and context assembly for retrieval-augmented generation.
//!
//! Ingestion flow: document -> chunker -> embedding provider -> store.
//! Query flow: query -> embedding provider -> ranker -> context -> generation
//! provider. Providers are trait objects so tests run network-free.

pub mod config;
pub mod engine;
pub mod error;
pub mod processing;
pub mod providers;
pub mod search;
pub mod storage;
pub mod types;

// Re-export primary types for convenience
pub use config::{ChunkingConfig, ProviderConfig, RagConfig, RetrievalConfig};
pub use engine::RagEngine;
pub use error::{RagError, Result};
pub use processing::TextChunker;
pub use providers::{EmbeddingProvider, GenerationProvider, OpenAiProvider};
pub use search::{cosine_similarity, CosineRanker, Ranker};
pub use storage::{EmbeddingMatrix, EmbeddingStore};
pub use types::{Answer, Chunk, Document, IngestReport, ScoredChunk, StoreStats};

pub use uuid::Uuid;
