pub mod openai;

pub use openai::OpenAiProvider;

use async_trait::async_trait;

use crate::error::Result;

/// External embedding capability. Output is the same length and order as
/// the input; every call is bound by the provider's request timeout.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Model identifier recorded in the store; embeddings from different
    /// models are not comparable.
    fn model_id(&self) -> &str;

    /// Upper bound on texts per request.
    fn max_batch_size(&self) -> usize;
}

/// External text-generation capability.
#[async_trait]
pub trait GenerationProvider: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String>;
}
