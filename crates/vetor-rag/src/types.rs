use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Namespace for deriving deterministic chunk ids (UUIDv5).
/// Fixed so the same document + config always yields the same ids,
/// which is what makes re-ingestion idempotent.
const CHUNK_ID_NAMESPACE: Uuid = Uuid::from_bytes([
    0x9e, 0x4b, 0x1f, 0x52, 0x7c, 0x0d, 0x45, 0xa1, 0x8f, 0x36, 0xd2, 0x61, 0x0b, 0x5e, 0xc4,
    0x97,
]);

/// Raw source text plus a stable identifier (title, URL, file path).
/// Immutable once ingested.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub source_id: String,
    pub text: String,
}

impl Document {
    pub fn new(source_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            source_id: source_id.into(),
            text: text.into(),
        }
    }
}

/// A contiguous substring of a document — the atomic retrievable unit.
///
/// Invariants: `end_offset > start_offset`, offsets stay within the source
/// document, and the id is a pure function of `(source_id, offsets)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: Uuid,
    pub source_id: String,
    pub text: String,
    pub start_offset: usize,
    pub end_offset: usize,
}

impl Chunk {
    pub fn new(
        source_id: &str,
        text: impl Into<String>,
        start_offset: usize,
        end_offset: usize,
    ) -> Self {
        Self {
            id: chunk_id(source_id, start_offset, end_offset),
            source_id: source_id.to_string(),
            text: text.into(),
            start_offset,
            end_offset,
        }
    }
}

/// Deterministic chunk id: UUIDv5 over source id and byte offsets.
pub fn chunk_id(source_id: &str, start_offset: usize, end_offset: usize) -> Uuid {
    let name = format!("{source_id}\u{0}{start_offset}\u{0}{end_offset}");
    Uuid::new_v5(&CHUNK_ID_NAMESPACE, name.as_bytes())
}

/// Outcome of one ingestion call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestReport {
    pub chunks_added: usize,
    pub chunks_skipped: usize,
}

/// One ranked retrieval hit. Produced fresh per query, never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    pub score: f32,
}

/// Generated answer plus the ids of the chunks that actually made it into
/// the assembled context (post-truncation), for traceability.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Answer {
    pub text: String,
    pub supporting_chunks: Vec<Uuid>,
}

/// Store-level statistics exposed by the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreStats {
    pub chunk_count: usize,
    pub source_count: usize,
    pub dimension: Option<usize>,
    pub model_id: Option<String>,
}
