use crate::error::{RagError, Result};
use crate::storage::EmbeddingMatrix;
use crate::types::{Chunk, ScoredChunk};

/// Cosine similarity between two vectors: `(a·b) / (||a|| * ||b||)`.
///
/// Defined only when both norms are nonzero; a zero vector is unrankable
/// and yields `None`, never a score of 0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Option<f32> {
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return None;
    }
    Some(dot / (norm_a.sqrt() * norm_b.sqrt()))
}

/// Ranking seam: callers depend on this trait so an index-backed ranker can
/// drop in later without changing the orchestrator.
pub trait Ranker: Send + Sync {
    /// Score every rankable row against `query` and return the top `k`,
    /// descending by score, ties broken by ascending chunk id.
    fn rank(
        &self,
        query: &[f32],
        matrix: &EmbeddingMatrix,
        chunks: &[Chunk],
        k: usize,
    ) -> Result<Vec<ScoredChunk>>;
}

/// Exhaustive cosine ranker: O(rows x dimension) full scan per query.
/// Fine at single-corpus study scale; no ANN indexing.
#[derive(Debug, Default, Clone, Copy)]
pub struct CosineRanker;

impl Ranker for CosineRanker {
    fn rank(
        &self,
        query: &[f32],
        matrix: &EmbeddingMatrix,
        chunks: &[Chunk],
        k: usize,
    ) -> Result<Vec<ScoredChunk>> {
        if k == 0 {
            return Err(RagError::Config("k must be a positive integer".into()));
        }
        if matrix.rows() == 0 {
            return Err(RagError::EmptyStore);
        }
        if query.len() != matrix.dimension() {
            // A wrong-width query means embeddings from a different model;
            // scoring over a common prefix would be silently meaningless.
            return Err(RagError::DimensionMismatch {
                expected: matrix.dimension(),
                actual: query.len(),
            });
        }
        if chunks.len() != matrix.rows() {
            return Err(RagError::StoreCorrupt(format!(
                "matrix has {} rows but {} chunk records",
                matrix.rows(),
                chunks.len()
            )));
        }

        // Zero-norm rows (and a zero-norm query) are excluded, not scored 0.
        let mut scored: Vec<ScoredChunk> = (0..matrix.rows())
            .filter_map(|i| {
                cosine_similarity(query, matrix.row(i)).map(|score| ScoredChunk {
                    chunk: chunks[i].clone(),
                    score,
                })
            })
            .collect();

        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.chunk.id.cmp(&b.chunk.id))
        });
        scored.truncate(k);
        Ok(scored)
    }
}
