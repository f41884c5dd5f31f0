use std::sync::Arc;

use futures::stream::{self, StreamExt, TryStreamExt};

use crate::config::RagConfig;
use crate::error::{RagError, Result};
use crate::processing::TextChunker;
use crate::providers::{EmbeddingProvider, GenerationProvider};
use crate::search::{cosine_similarity, CosineRanker, Ranker};
use crate::storage::EmbeddingStore;
use crate::types::{Answer, Document, IngestReport, ScoredChunk, StoreStats};

/// Retrieval orchestrator: the only component that talks to external
/// providers. Holds an explicit store handle — no process-wide state.
pub struct RagEngine {
    store: EmbeddingStore,
    embedder: Arc<dyn EmbeddingProvider>,
    generator: Arc<dyn GenerationProvider>,
    chunker: TextChunker,
    ranker: Box<dyn Ranker>,
    config: RagConfig,
}

impl RagEngine {
    pub fn new(
        config: RagConfig,
        store: EmbeddingStore,
        embedder: Arc<dyn EmbeddingProvider>,
        generator: Arc<dyn GenerationProvider>,
    ) -> Result<Self> {
        config.validate()?;
        let chunker = TextChunker::new(&config.chunking)?;
        Ok(Self {
            store,
            embedder,
            generator,
            chunker,
            ranker: Box::new(CosineRanker),
            config,
        })
    }

    /// Swap in a different ranking strategy (e.g. an index-backed ranker).
    pub fn with_ranker(mut self, ranker: Box<dyn Ranker>) -> Self {
        self.ranker = ranker;
        self
    }

    pub fn config(&self) -> &RagConfig {
        &self.config
    }

    pub fn store(&self) -> &EmbeddingStore {
        &self.store
    }

    /// Ingest a document: chunk, embed in batches, append to the store.
    ///
    /// Re-ingesting an already-present source is a no-op — every chunk is
    /// counted as skipped and no provider call is made. An empty document
    /// adds nothing and touches nothing.
    pub async fn ingest(&mut self, document: &Document) -> Result<IngestReport> {
        let chunks = self.chunker.chunk(document);

        if self.store.contains(&document.source_id) {
            tracing::info!(
                source_id = %document.source_id,
                skipped = chunks.len(),
                "Source already ingested, skipping"
            );
            return Ok(IngestReport {
                chunks_added: 0,
                chunks_skipped: chunks.len(),
            });
        }

        if chunks.is_empty() {
            return Ok(IngestReport {
                chunks_added: 0,
                chunks_skipped: 0,
            });
        }

        let texts: Vec<String> = chunks.iter().map(|c| self.chunker.embedding_text(c)).collect();
        let vectors = self.embed_batched(texts).await?;
        if vectors.len() != chunks.len() {
            return Err(RagError::provider(
                "protocol",
                format!(
                    "provider returned {} vectors for {} chunks",
                    vectors.len(),
                    chunks.len()
                ),
            ));
        }

        self.store.append(&chunks, &vectors, self.embedder.model_id())?;

        tracing::info!(
            source_id = %document.source_id,
            chunks = chunks.len(),
            "Ingested document"
        );
        Ok(IngestReport {
            chunks_added: chunks.len(),
            chunks_skipped: 0,
        })
    }

    /// Embed texts in provider-sized batches with bounded concurrency.
    /// `buffered` preserves input order, so store row order matches chunk
    /// order regardless of which batch finishes first.
    async fn embed_batched(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        let batch_size = self
            .config
            .provider
            .batch_size
            .min(self.embedder.max_batch_size())
            .max(1);

        let batches: Vec<Vec<String>> = texts.chunks(batch_size).map(|b| b.to_vec()).collect();
        let embedder = Arc::clone(&self.embedder);

        let results: Vec<Vec<Vec<f32>>> = stream::iter(batches.into_iter().map(move |batch| {
            let embedder = Arc::clone(&embedder);
            async move { embedder.embed(&batch).await }
        }))
        .buffered(self.config.provider.max_concurrent_batches)
        .try_collect()
        .await?;

        Ok(results.into_iter().flatten().collect())
    }

    /// Answer a query: embed, rank against the store, assemble a bounded
    /// context from the top chunks, and hand off to the generation provider.
    pub async fn query(
        &self,
        text: &str,
        k: usize,
        max_context_chars: usize,
    ) -> Result<Answer> {
        if max_context_chars == 0 {
            return Err(RagError::Config("max_context_chars must be > 0".into()));
        }

        let query_vector = self.embed_one(text).await?;
        tracing::debug!(query = text, "Query embedded");

        let (matrix, chunks) = self.store.load()?;
        let ranked = self.ranker.rank(&query_vector, &matrix, &chunks, k)?;
        tracing::debug!(candidates = ranked.len(), "Query ranked");

        let (context, supporting_chunks) = assemble_context(&ranked, max_context_chars);
        let prompt = build_prompt(&context, text);

        let answer = self.generator.generate(&prompt).await?;
        tracing::info!(
            supporting = supporting_chunks.len(),
            context_chars = context.chars().count(),
            "Query answered"
        );

        Ok(Answer {
            text: answer,
            supporting_chunks,
        })
    }

    /// `query` with `k` and the context budget taken from
    /// `config.retrieval`.
    pub async fn query_with_defaults(&self, text: &str) -> Result<Answer> {
        self.query(
            text,
            self.config.retrieval.default_k,
            self.config.retrieval.max_context_chars,
        )
        .await
    }

    /// Embed two texts and return their cosine similarity, or `None` when
    /// either embedding has zero norm (unrankable, not a score of 0).
    pub async fn similarity(&self, a: &str, b: &str) -> Result<Option<f32>> {
        let vectors = self
            .embedder
            .embed(&[a.to_string(), b.to_string()])
            .await?;
        if vectors.len() != 2 {
            return Err(RagError::provider(
                "protocol",
                format!("provider returned {} vectors for 2 inputs", vectors.len()),
            ));
        }
        if vectors[0].len() != vectors[1].len() {
            return Err(RagError::DimensionMismatch {
                expected: vectors[0].len(),
                actual: vectors[1].len(),
            });
        }
        Ok(cosine_similarity(&vectors[0], &vectors[1]))
    }

    pub fn stats(&self) -> StoreStats {
        StoreStats {
            chunk_count: self.store.len(),
            source_count: self.store.source_count(),
            dimension: self.store.dimension(),
            model_id: self.store.model_id().map(|s| s.to_string()),
        }
    }

    async fn embed_one(&self, text: &str) -> Result<Vec<f32>> {
        let mut vectors = self.embedder.embed(&[text.to_string()]).await?;
        if vectors.len() != 1 {
            return Err(RagError::provider(
                "protocol",
                format!("provider returned {} vectors for 1 input", vectors.len()),
            ));
        }
        Ok(vectors.remove(0))
    }
}

/// Concatenate ranked chunk texts until the next whole chunk would push the
/// context past `max_context_chars`. Chunks are never cut mid-text; the ids
/// returned are exactly those whose text made it into the context.
fn assemble_context(ranked: &[ScoredChunk], max_context_chars: usize) -> (String, Vec<uuid::Uuid>) {
    const SEPARATOR: &str = "\n\n";

    let mut context = String::new();
    let mut included = Vec::new();
    let mut used = 0usize;

    for scored in ranked {
        let chunk_chars = scored.chunk.text.chars().count();
        let sep_chars = if context.is_empty() { 0 } else { SEPARATOR.len() };
        if used + sep_chars + chunk_chars > max_context_chars {
            break;
        }
        if !context.is_empty() {
            context.push_str(SEPARATOR);
        }
        context.push_str(&scored.chunk.text);
        used += sep_chars + chunk_chars;
        included.push(scored.chunk.id);
    }

    (context, included)
}

fn build_prompt(context: &str, question: &str) -> String {
    format!(
        "Answer the question using only the context below. If the context \
         does not contain the answer, say so.\n\nContext:\n{context}\n\nQuestion: {question}"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    /// Deterministic embedder: one axis per animal keyword plus a constant
    /// bias so no embedding is zero-norm.
    struct KeywordEmbedder {
        calls: AtomicUsize,
    }

    impl KeywordEmbedder {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
            })
        }

        fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl EmbeddingProvider for KeywordEmbedder {
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(texts
                .iter()
                .map(|t| {
                    let t = t.to_lowercase();
                    vec![
                        if t.contains("cat") { 1.0 } else { 0.0 },
                        if t.contains("dog") { 1.0 } else { 0.0 },
                        if t.contains("bird") { 1.0 } else { 0.0 },
                        0.1,
                    ]
                })
                .collect())
        }

        fn model_id(&self) -> &str {
            "keyword-test-model"
        }

        fn max_batch_size(&self) -> usize {
            2048
        }
    }

    struct CannedGenerator;

    #[async_trait]
    impl GenerationProvider for CannedGenerator {
        async fn generate(&self, prompt: &str) -> Result<String> {
            assert!(prompt.contains("Question:"));
            Ok("canned answer".to_string())
        }
    }

    fn test_config() -> RagConfig {
        let mut config = RagConfig::default();
        config.chunking.max_chunk_size = 12;
        config.chunking.overlap = 0;
        config.chunking.prefix_source = false;
        config
    }

    fn engine_at(dir: &Path, config: RagConfig, embedder: Arc<KeywordEmbedder>) -> RagEngine {
        let store = EmbeddingStore::open(dir).unwrap();
        RagEngine::new(config, store, embedder, Arc::new(CannedGenerator)).unwrap()
    }

    fn animals_doc() -> Document {
        Document::new("animals", "The cat sat. The dog ran. The bird flew.")
    }

    #[tokio::test]
    async fn end_to_end_dog_query_ranks_dog_chunk_first() {
        let dir = TempDir::new().unwrap();
        let embedder = KeywordEmbedder::new();
        let mut engine = engine_at(dir.path(), test_config(), embedder);

        let report = engine.ingest(&animals_doc()).await.unwrap();
        assert_eq!(report.chunks_added, 4);

        let answer = engine.query("dog", 1, 8000).await.unwrap();
        assert_eq!(answer.text, "canned answer");
        assert_eq!(answer.supporting_chunks.len(), 1);

        let (_, chunks) = engine.store().load().unwrap();
        let dog_chunk = chunks.iter().find(|c| c.text.contains("dog")).unwrap();
        assert_eq!(answer.supporting_chunks[0], dog_chunk.id);
    }

    #[tokio::test]
    async fn double_ingest_is_idempotent_and_skips_provider() {
        let dir = TempDir::new().unwrap();
        let embedder = KeywordEmbedder::new();
        let mut engine = engine_at(dir.path(), test_config(), Arc::clone(&embedder));

        let first = engine.ingest(&animals_doc()).await.unwrap();
        assert_eq!(first.chunks_added, 4);
        let calls_after_first = embedder.call_count();

        let second = engine.ingest(&animals_doc()).await.unwrap();
        assert_eq!(second.chunks_added, 0);
        assert_eq!(second.chunks_skipped, 4);
        assert_eq!(embedder.call_count(), calls_after_first, "no provider calls on skip");
        assert_eq!(engine.store().len(), 4, "row count unchanged");
    }

    #[tokio::test]
    async fn empty_document_is_a_no_op() {
        let dir = TempDir::new().unwrap();
        let mut engine = engine_at(dir.path(), test_config(), KeywordEmbedder::new());

        let report = engine.ingest(&Document::new("empty", "")).await.unwrap();
        assert_eq!(report.chunks_added, 0);
        assert_eq!(report.chunks_skipped, 0);
        assert!(engine.store().is_empty());
    }

    #[tokio::test]
    async fn k_larger_than_store_returns_all_rows() {
        let dir = TempDir::new().unwrap();
        let mut engine = engine_at(dir.path(), test_config(), KeywordEmbedder::new());
        engine.ingest(&animals_doc()).await.unwrap();

        let answer = engine.query("dog", 50, 8000).await.unwrap();
        assert_eq!(answer.supporting_chunks.len(), 4);
    }

    #[tokio::test]
    async fn query_with_defaults_uses_retrieval_config() {
        let dir = TempDir::new().unwrap();
        let mut config = test_config();
        config.retrieval.default_k = 2;
        config.retrieval.max_context_chars = 8000;
        let mut engine = engine_at(dir.path(), config, KeywordEmbedder::new());
        engine.ingest(&animals_doc()).await.unwrap();

        let answer = engine.query_with_defaults("dog").await.unwrap();
        assert_eq!(answer.supporting_chunks.len(), 2);
    }

    #[tokio::test]
    async fn context_truncation_limits_included_chunks() {
        let dir = TempDir::new().unwrap();
        let mut engine = engine_at(dir.path(), test_config(), KeywordEmbedder::new());
        engine.ingest(&animals_doc()).await.unwrap();

        // Each chunk is up to 12 chars; room for only the top chunk.
        let answer = engine.query("dog", 4, 13).await.unwrap();
        assert_eq!(answer.supporting_chunks.len(), 1);

        let (_, chunks) = engine.store().load().unwrap();
        let dog_chunk = chunks.iter().find(|c| c.text.contains("dog")).unwrap();
        assert_eq!(answer.supporting_chunks[0], dog_chunk.id);
    }

    #[tokio::test]
    async fn batched_embedding_preserves_chunk_order() {
        let dir = TempDir::new().unwrap();
        let embedder = KeywordEmbedder::new();
        let mut config = test_config();
        config.provider.batch_size = 1;
        config.provider.max_concurrent_batches = 4;
        let mut engine = engine_at(dir.path(), config, Arc::clone(&embedder));

        engine.ingest(&animals_doc()).await.unwrap();
        assert_eq!(embedder.call_count(), 4, "one call per single-text batch");

        // Row i's vector must describe row i's chunk.
        let (matrix, chunks) = engine.store().load().unwrap();
        for (i, chunk) in chunks.iter().enumerate() {
            let row = matrix.row(i);
            assert_eq!(row[1] == 1.0, chunk.text.contains("dog"), "row {i} misaligned");
        }
    }

    #[tokio::test]
    async fn query_against_empty_store_is_empty_store_error() {
        let dir = TempDir::new().unwrap();
        let engine = engine_at(dir.path(), test_config(), KeywordEmbedder::new());
        assert!(matches!(
            engine.query("dog", 3, 1000).await,
            Err(RagError::EmptyStore)
        ));
    }

    #[tokio::test]
    async fn similarity_compares_two_texts() {
        let dir = TempDir::new().unwrap();
        let engine = engine_at(dir.path(), test_config(), KeywordEmbedder::new());

        let same = engine.similarity("dog", "dog park").await.unwrap().unwrap();
        let different = engine.similarity("dog", "cat").await.unwrap().unwrap();
        assert!(same > different);
    }

    #[test]
    fn assemble_context_reports_only_included_ids() {
        let chunks: Vec<ScoredChunk> = ["aaaa", "bbbb", "cccc"]
            .iter()
            .enumerate()
            .map(|(i, t)| ScoredChunk {
                chunk: crate::types::Chunk::new("doc", *t, i * 4, i * 4 + 4),
                score: 1.0 - i as f32 * 0.1,
            })
            .collect();

        // 4 + 2 + 4 = 10 chars fits two chunks; the third would need 16.
        let (context, included) = assemble_context(&chunks, 10);
        assert_eq!(context, "aaaa\n\nbbbb");
        assert_eq!(included.len(), 2);
        assert_eq!(included[0], chunks[0].chunk.id);
        assert_eq!(included[1], chunks[1].chunk.id);
    }
}
