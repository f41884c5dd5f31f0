use std::collections::{HashMap, HashSet};
use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{RagError, Result};
use crate::types::Chunk;

/// Row-major embedding matrix. Row `i` corresponds to row `i` of the chunk
/// metadata and text artifacts.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingMatrix {
    data: Vec<f32>,
    rows: usize,
    dimension: usize,
}

impl EmbeddingMatrix {
    pub fn new(data: Vec<f32>, rows: usize, dimension: usize) -> Result<Self> {
        if data.len() != rows * dimension {
            return Err(RagError::StoreCorrupt(format!(
                "matrix buffer holds {} floats, expected {} ({} rows x {} dims)",
                data.len(),
                rows * dimension,
                rows,
                dimension
            )));
        }
        Ok(Self { data, rows, dimension })
    }

    pub fn empty() -> Self {
        Self { data: Vec::new(), rows: 0, dimension: 0 }
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn row(&self, i: usize) -> &[f32] {
        &self.data[i * self.dimension..(i + 1) * self.dimension]
    }
}

/// Commit record for the current snapshot generation. Replacing this file
/// (temp + rename) is the single atomic commit point for an append: a crash
/// before the swap leaves the previous snapshot fully intact.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Manifest {
    generation: u64,
    model_id: String,
    dimension: usize,
    rows: usize,
    created_at: i64,
}

/// Per-row metadata record, mirrored from `Chunk` minus the text (which
/// lives in its own artifact, same row order).
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ChunkMeta {
    id: Uuid,
    source_id: String,
    start_offset: usize,
    end_offset: usize,
}

/// Durable, append-only store for chunk embeddings.
///
/// One snapshot generation is three mutually consistent artifacts in one
/// directory — `vectors-<gen>.bin` (row-major little-endian f32 matrix),
/// `meta-<gen>.jsonl`, `texts-<gen>.jsonl` — plus `manifest.json` naming the
/// live generation. Appends write the next generation completely, then swap
/// the manifest; concurrent readers see either the old snapshot or the new
/// one, never a torn mixture.
pub struct EmbeddingStore {
    dir: PathBuf,
    manifest: Option<Manifest>,
    sources: HashSet<String>,
}

impl EmbeddingStore {
    /// Open (or create) a store directory and build the in-memory source
    /// index from the current snapshot. A missing manifest is an empty store.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;

        let manifest = read_manifest(&dir)?;
        let sources = match &manifest {
            Some(m) => read_meta(&dir, m)?
                .into_iter()
                .map(|meta| meta.source_id)
                .collect(),
            None => HashSet::new(),
        };

        Ok(Self { dir, manifest, sources })
    }

    pub fn len(&self) -> usize {
        self.manifest.as_ref().map(|m| m.rows).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dimension(&self) -> Option<usize> {
        self.manifest.as_ref().map(|m| m.dimension)
    }

    pub fn model_id(&self) -> Option<&str> {
        self.manifest.as_ref().map(|m| m.model_id.as_str())
    }

    /// Number of distinct document sources in the store.
    pub fn source_count(&self) -> usize {
        self.sources.len()
    }

    /// Whether chunks for this document source are already stored. Served
    /// from the in-memory index; no I/O.
    pub fn contains(&self, source_id: &str) -> bool {
        self.sources.contains(source_id)
    }

    /// Append chunk rows and their vectors as a new snapshot generation.
    ///
    /// `chunks` and `vectors` must be equal-length and same-order. The first
    /// append establishes the store's dimensionality and model id; later
    /// appends must match both.
    pub fn append(&mut self, chunks: &[Chunk], vectors: &[Vec<f32>], model_id: &str) -> Result<()> {
        if chunks.len() != vectors.len() {
            return Err(RagError::Config(format!(
                "append requires equal-length inputs: {} chunks, {} vectors",
                chunks.len(),
                vectors.len()
            )));
        }
        if chunks.is_empty() {
            return Ok(());
        }

        // Follow the live manifest in case another handle appended since
        // this one was opened.
        self.manifest = read_manifest(&self.dir)?;

        let dimension = match &self.manifest {
            Some(m) => {
                if m.model_id != model_id {
                    return Err(RagError::ModelMismatch {
                        expected: m.model_id.clone(),
                        actual: model_id.to_string(),
                    });
                }
                m.dimension
            }
            None => vectors[0].len(),
        };
        if dimension == 0 {
            return Err(RagError::Config("embedding vectors must be non-empty".into()));
        }
        for vector in vectors {
            if vector.len() != dimension {
                return Err(RagError::DimensionMismatch {
                    expected: dimension,
                    actual: vector.len(),
                });
            }
        }

        // Existing rows carry over unchanged into the next generation.
        let (matrix, existing) = self.load()?;
        let generation = self.manifest.as_ref().map(|m| m.generation + 1).unwrap_or(0);
        let rows = existing.len() + chunks.len();

        write_vectors(&self.dir, generation, &matrix, vectors)?;
        write_meta(&self.dir, generation, &existing, chunks)?;
        write_texts(&self.dir, generation, &existing, chunks)?;

        let manifest = Manifest {
            generation,
            model_id: model_id.to_string(),
            dimension,
            rows,
            created_at: chrono::Utc::now().timestamp(),
        };
        commit_manifest(&self.dir, &manifest)?;

        let old = self.manifest.replace(manifest);
        self.sources = existing
            .iter()
            .chain(chunks.iter())
            .map(|c| c.source_id.clone())
            .collect();

        if let Some(old) = old {
            remove_generation(&self.dir, old.generation);
        }

        tracing::debug!(
            generation,
            rows,
            added = chunks.len(),
            "Committed embedding store snapshot"
        );
        Ok(())
    }

    /// Rebuild the in-memory matrix and chunk list from the current snapshot.
    /// An empty store loads as a zero-row matrix and no chunks.
    ///
    /// The manifest is re-read from disk so a handle opened before an append
    /// (by this process or another) still follows the live generation. If an
    /// append swaps the manifest and removes a generation mid-read, the read
    /// is retried once against the new manifest before reporting corruption.
    pub fn load(&self) -> Result<(EmbeddingMatrix, Vec<Chunk>)> {
        let Some(manifest) = read_manifest(&self.dir)? else {
            return Ok((EmbeddingMatrix::empty(), Vec::new()));
        };

        match load_snapshot(&self.dir, &manifest) {
            Ok(loaded) => Ok(loaded),
            Err(original) => match read_manifest(&self.dir)? {
                Some(latest) if latest.generation != manifest.generation => {
                    load_snapshot(&self.dir, &latest)
                }
                _ => Err(original),
            },
        }
    }
}

/// Read one snapshot generation's three artifacts and cross-check them.
fn load_snapshot(dir: &Path, manifest: &Manifest) -> Result<(EmbeddingMatrix, Vec<Chunk>)> {
    let metas = read_meta(dir, manifest)?;
    let texts = read_texts(dir, manifest)?;
    if metas.len() != manifest.rows || texts.len() != manifest.rows {
        return Err(RagError::StoreCorrupt(format!(
            "row count mismatch: manifest says {}, metadata has {}, text has {}",
            manifest.rows,
            metas.len(),
            texts.len()
        )));
    }

    let matrix = read_vectors(dir, manifest)?;

    let mut seen: HashMap<Uuid, usize> = HashMap::new();
    let mut chunks = Vec::with_capacity(manifest.rows);
    for (i, (meta, text)) in metas.into_iter().zip(texts.into_iter()).enumerate() {
        if meta.end_offset <= meta.start_offset {
            return Err(RagError::StoreCorrupt(format!(
                "chunk {} has inverted offsets [{}, {})",
                meta.id, meta.start_offset, meta.end_offset
            )));
        }
        let chunk = Chunk {
            id: meta.id,
            source_id: meta.source_id,
            text,
            start_offset: meta.start_offset,
            end_offset: meta.end_offset,
        };
        if let Some(&prev) = seen.get(&chunk.id) {
            if chunks[prev] != chunk {
                return Err(RagError::StoreCorrupt(format!(
                    "chunk id {} maps to two different chunks (rows {} and {})",
                    chunk.id, prev, i
                )));
            }
        } else {
            seen.insert(chunk.id, i);
        }
        chunks.push(chunk);
    }

    Ok((matrix, chunks))
}

fn manifest_path(dir: &Path) -> PathBuf {
    dir.join("manifest.json")
}

fn vectors_path(dir: &Path, generation: u64) -> PathBuf {
    dir.join(format!("vectors-{generation}.bin"))
}

fn meta_path(dir: &Path, generation: u64) -> PathBuf {
    dir.join(format!("meta-{generation}.jsonl"))
}

fn texts_path(dir: &Path, generation: u64) -> PathBuf {
    dir.join(format!("texts-{generation}.jsonl"))
}

fn read_manifest(dir: &Path) -> Result<Option<Manifest>> {
    let path = manifest_path(dir);
    if !path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(&path)?;
    let manifest: Manifest = serde_json::from_str(&content)
        .map_err(|e| RagError::StoreCorrupt(format!("unreadable manifest: {e}")))?;
    Ok(Some(manifest))
}

/// Write the manifest to a temp file, fsync, then rename over the live one.
/// The rename is the commit point.
fn commit_manifest(dir: &Path, manifest: &Manifest) -> Result<()> {
    let tmp = dir.join("manifest.json.tmp");
    {
        let mut file = File::create(&tmp)?;
        file.write_all(serde_json::to_string_pretty(manifest)?.as_bytes())?;
        file.sync_all()?;
    }
    fs::rename(&tmp, manifest_path(dir))?;
    Ok(())
}

fn write_vectors(
    dir: &Path,
    generation: u64,
    existing: &EmbeddingMatrix,
    new: &[Vec<f32>],
) -> Result<()> {
    let mut writer = BufWriter::new(File::create(vectors_path(dir, generation))?);
    for i in 0..existing.rows() {
        for value in existing.row(i) {
            writer.write_all(&value.to_le_bytes())?;
        }
    }
    for vector in new {
        for value in vector {
            writer.write_all(&value.to_le_bytes())?;
        }
    }
    writer.flush()?;
    writer.into_inner().map_err(|e| e.into_error())?.sync_all()?;
    Ok(())
}

fn write_meta(dir: &Path, generation: u64, existing: &[Chunk], new: &[Chunk]) -> Result<()> {
    let mut writer = BufWriter::new(File::create(meta_path(dir, generation))?);
    for chunk in existing.iter().chain(new.iter()) {
        let meta = ChunkMeta {
            id: chunk.id,
            source_id: chunk.source_id.clone(),
            start_offset: chunk.start_offset,
            end_offset: chunk.end_offset,
        };
        serde_json::to_writer(&mut writer, &meta)?;
        writer.write_all(b"\n")?;
    }
    writer.flush()?;
    writer.into_inner().map_err(|e| e.into_error())?.sync_all()?;
    Ok(())
}

fn write_texts(dir: &Path, generation: u64, existing: &[Chunk], new: &[Chunk]) -> Result<()> {
    let mut writer = BufWriter::new(File::create(texts_path(dir, generation))?);
    for chunk in existing.iter().chain(new.iter()) {
        serde_json::to_writer(&mut writer, &chunk.text)?;
        writer.write_all(b"\n")?;
    }
    writer.flush()?;
    writer.into_inner().map_err(|e| e.into_error())?.sync_all()?;
    Ok(())
}

fn read_vectors(dir: &Path, manifest: &Manifest) -> Result<EmbeddingMatrix> {
    let path = vectors_path(dir, manifest.generation);
    let mut bytes = Vec::new();
    File::open(&path)
        .map_err(|e| RagError::StoreCorrupt(format!("missing vector artifact {}: {e}", path.display())))?
        .read_to_end(&mut bytes)?;

    let expected = manifest.rows * manifest.dimension * 4;
    if bytes.len() != expected {
        return Err(RagError::StoreCorrupt(format!(
            "vector artifact is {} bytes, expected {} ({} rows x {} dims)",
            bytes.len(),
            expected,
            manifest.rows,
            manifest.dimension
        )));
    }

    let data: Vec<f32> = bytes
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect();
    EmbeddingMatrix::new(data, manifest.rows, manifest.dimension)
}

fn read_meta(dir: &Path, manifest: &Manifest) -> Result<Vec<ChunkMeta>> {
    let path = meta_path(dir, manifest.generation);
    let file = File::open(&path)
        .map_err(|e| RagError::StoreCorrupt(format!("missing metadata artifact {}: {e}", path.display())))?;
    let mut metas = Vec::new();
    for line in BufReader::new(file).lines() {
        let line = line?;
        if line.is_empty() {
            continue;
        }
        let meta: ChunkMeta = serde_json::from_str(&line)
            .map_err(|e| RagError::StoreCorrupt(format!("bad metadata record: {e}")))?;
        metas.push(meta);
    }
    Ok(metas)
}

fn read_texts(dir: &Path, manifest: &Manifest) -> Result<Vec<String>> {
    let path = texts_path(dir, manifest.generation);
    let file = File::open(&path)
        .map_err(|e| RagError::StoreCorrupt(format!("missing text artifact {}: {e}", path.display())))?;
    let mut texts = Vec::new();
    for line in BufReader::new(file).lines() {
        let line = line?;
        if line.is_empty() {
            continue;
        }
        let text: String = serde_json::from_str(&line)
            .map_err(|e| RagError::StoreCorrupt(format!("bad text record: {e}")))?;
        texts.push(text);
    }
    Ok(texts)
}

/// Best-effort cleanup of a superseded generation. Failure is harmless; the
/// files are unreferenced once the manifest points elsewhere.
fn remove_generation(dir: &Path, generation: u64) {
    for path in [
        vectors_path(dir, generation),
        meta_path(dir, generation),
        texts_path(dir, generation),
    ] {
        if let Err(e) = fs::remove_file(&path) {
            tracing::debug!(path = %path.display(), error = %e, "Could not remove stale artifact");
        }
    }
}
