pub mod embedding_store;

pub use embedding_store::{EmbeddingMatrix, EmbeddingStore};
