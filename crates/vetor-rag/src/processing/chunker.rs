use crate::config::ChunkingConfig;
use crate::error::{RagError, Result};
use crate::types::{Chunk, Document};

/// Sliding-window chunker over document bytes.
///
/// Boundary policy: windows of `max_chunk_size` bytes advanced by
/// `max_chunk_size - overlap`, with window edges snapped down to the nearest
/// UTF-8 char boundary. The final chunk may be shorter, never padded. No
/// sentence or paragraph awareness — the contract is determinism and exact
/// coverage: the same document and config always produce the same chunk set,
/// and with `overlap == 0` the chunk spans tile the document with no gaps.
pub struct TextChunker {
    max_chunk_size: usize,
    overlap: usize,
    prefix_source: bool,
}

impl TextChunker {
    pub fn new(config: &ChunkingConfig) -> Result<Self> {
        if config.max_chunk_size == 0 {
            return Err(RagError::Config("max_chunk_size must be > 0".into()));
        }
        if config.overlap >= config.max_chunk_size {
            return Err(RagError::Config(format!(
                "overlap ({}) must be < max_chunk_size ({})",
                config.overlap, config.max_chunk_size
            )));
        }
        Ok(Self {
            max_chunk_size: config.max_chunk_size,
            overlap: config.overlap,
            prefix_source: config.prefix_source,
        })
    }

    /// Split a document into chunks. Pure function of input and config.
    ///
    /// Empty document yields an empty vec; a document no longer than
    /// `max_chunk_size` yields exactly one chunk spanning the whole text.
    pub fn chunk(&self, document: &Document) -> Vec<Chunk> {
        let text = document.text.as_str();
        if text.is_empty() {
            return Vec::new();
        }
        if text.len() <= self.max_chunk_size {
            return vec![Chunk::new(&document.source_id, text, 0, text.len())];
        }

        let mut chunks = Vec::new();
        let mut start = 0;

        while start < text.len() {
            let mut end = snap_to_char_boundary(text, start + self.max_chunk_size);
            if end <= start {
                // Window is smaller than the char at `start`; a chunk must
                // still contain at least one whole char.
                end = start + text[start..].chars().next().map_or(1, char::len_utf8);
            }
            chunks.push(Chunk::new(
                &document.source_id,
                &text[start..end],
                start,
                end,
            ));

            if end >= text.len() {
                break;
            }

            // Advance relative to the actual window end so coverage stays
            // exact even when the edge was snapped inside a multibyte char.
            let next = snap_to_char_boundary(text, end - self.overlap.min(end - start - 1));
            start = if next > start { next } else { end };
        }

        chunks
    }

    /// The text handed to the embedding provider for a chunk. When
    /// `prefix_source` is set, prepends `[source_id]` so the embedding
    /// carries document-level context; the stored chunk text is untouched.
    pub fn embedding_text(&self, chunk: &Chunk) -> String {
        if self.prefix_source {
            format!("[{}] {}", chunk.source_id, chunk.text)
        } else {
            chunk.text.clone()
        }
    }
}

/// Snap a byte offset to the nearest valid UTF-8 char boundary (rounding down).
fn snap_to_char_boundary(text: &str, pos: usize) -> usize {
    if pos >= text.len() {
        return text.len();
    }
    let mut p = pos;
    while p > 0 && !text.is_char_boundary(p) {
        p -= 1;
    }
    p
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunker(max_chunk_size: usize, overlap: usize) -> TextChunker {
        TextChunker::new(&ChunkingConfig {
            max_chunk_size,
            overlap,
            prefix_source: false,
        })
        .unwrap()
    }

    #[test]
    fn rejects_overlap_not_smaller_than_chunk_size() {
        let config = ChunkingConfig {
            max_chunk_size: 10,
            overlap: 10,
            prefix_source: false,
        };
        assert!(matches!(
            TextChunker::new(&config),
            Err(RagError::Config(_))
        ));
    }

    #[test]
    fn rejects_zero_chunk_size() {
        let config = ChunkingConfig {
            max_chunk_size: 0,
            overlap: 0,
            prefix_source: false,
        };
        assert!(matches!(
            TextChunker::new(&config),
            Err(RagError::Config(_))
        ));
    }

    #[test]
    fn empty_document_yields_no_chunks() {
        let doc = Document::new("empty", "");
        assert!(chunker(100, 0).chunk(&doc).is_empty());
    }

    #[test]
    fn short_document_yields_single_whole_chunk() {
        let doc = Document::new("short", "hello world");
        let chunks = chunker(100, 10).chunk(&doc);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "hello world");
        assert_eq!(chunks[0].start_offset, 0);
        assert_eq!(chunks[0].end_offset, 11);
    }

    #[test]
    fn fixed_scenario_exact_boundaries() {
        let doc = Document::new("animals", "The cat sat. The dog ran. The bird flew.");
        let chunks = chunker(12, 0).chunk(&doc);
        let texts: Vec<&str> = chunks.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(texts, vec!["The cat sat.", " The dog ran", ". The bird f", "lew."]);
    }

    #[test]
    fn zero_overlap_tiles_document_exactly() {
        let doc = Document::new("tile", "abcdefghijklmnopqrstuvwxyz0123456789");
        let chunks = chunker(7, 0).chunk(&doc);

        assert_eq!(chunks[0].start_offset, 0);
        for pair in chunks.windows(2) {
            assert_eq!(pair[0].end_offset, pair[1].start_offset, "no gaps, no overlap");
        }
        assert_eq!(chunks.last().unwrap().end_offset, doc.text.len());

        let rebuilt: String = chunks.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(rebuilt, doc.text);
    }

    #[test]
    fn overlap_shares_configured_amount() {
        let doc = Document::new("lap", "abcdefghijklmnopqrstuvwxyz");
        let chunks = chunker(10, 3).chunk(&doc);

        for pair in chunks.windows(2) {
            assert_eq!(pair[0].end_offset - pair[1].start_offset, 3);
        }
        assert_eq!(chunks.last().unwrap().end_offset, doc.text.len());
    }

    #[test]
    fn chunking_is_deterministic_including_ids() {
        let doc = Document::new("det", "The quick brown fox jumps over the lazy dog. ".repeat(20));
        let c = chunker(64, 16);
        let first = c.chunk(&doc);
        let second = c.chunk(&doc);
        assert_eq!(first, second);
    }

    #[test]
    fn window_smaller_than_a_char_yields_whole_char_chunks() {
        // Each char is 3 bytes, wider than the 2-byte window; the chunker
        // must still make progress and never emit an empty chunk.
        let doc = Document::new("cjk", "日本語");
        let chunks = chunker(2, 0).chunk(&doc);

        let texts: Vec<&str> = chunks.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(texts, vec!["日", "本", "語"]);
        for chunk in &chunks {
            assert!(chunk.end_offset > chunk.start_offset);
        }
        assert_eq!(chunks.last().unwrap().end_offset, doc.text.len());
    }

    #[test]
    fn window_smaller_than_a_char_with_overlap_still_advances() {
        let doc = Document::new("cjk", "日本");
        let chunks = chunker(2, 1).chunk(&doc);

        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].text, "日");
        assert_eq!(chunks[1].text, "本");
        assert_eq!(chunks[1].end_offset, doc.text.len());
    }

    #[test]
    fn multibyte_text_snaps_to_char_boundaries() {
        let doc = Document::new("utf8", "coração e emoção são palavras acentuadas".to_string());
        let chunks = chunker(10, 2).chunk(&doc);
        for chunk in &chunks {
            // Slicing would panic on a non-boundary; also verify invariants.
            assert!(chunk.end_offset > chunk.start_offset);
            assert_eq!(&doc.text[chunk.start_offset..chunk.end_offset], chunk.text);
        }
        assert_eq!(chunks.last().unwrap().end_offset, doc.text.len());
    }

    #[test]
    fn embedding_text_prefixes_source_when_enabled() {
        let c = TextChunker::new(&ChunkingConfig {
            max_chunk_size: 100,
            overlap: 0,
            prefix_source: true,
        })
        .unwrap();
        let doc = Document::new("Albert_Einstein", "Physicist born in Ulm.");
        let chunks = c.chunk(&doc);
        assert_eq!(
            c.embedding_text(&chunks[0]),
            "[Albert_Einstein] Physicist born in Ulm."
        );
        assert_eq!(chunks[0].text, "Physicist born in Ulm.");
    }
}
