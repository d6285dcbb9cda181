//! Persistent, self-describing vector index.
//!
//! An index lives in a directory containing a single redb database with
//! three tables:
//!
//! - `meta`: the JSON-encoded [`IndexMetadata`] under the `index` key
//! - `vectors`: entry id -> 4-byte LE dimension header + LE f32 values
//! - `chunks`: entry id -> JSON-encoded [`Chunk`]
//!
//! Entry ids are insertion sequence numbers, so iterating the tables in key
//! order restores insertion order. The whole index is loaded into memory on
//! [`VectorIndex::open`] and never mutated afterwards, which makes a single
//! handle safe to share between threads.

use std::{
    path::{Path, PathBuf},
    time::SystemTime,
};

use rayon::prelude::*;
use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::{
    chunking::{Chunk, ChunkingConfig, DocumentSource},
    embedding::{Embedding, EmbeddingModelId},
    error::{Error, Result},
};

/// Name of the database file inside an index directory.
pub const INDEX_FILE: &str = "index.redb";

/// Bumped whenever the on-disk layout changes.
pub const FORMAT_VERSION: u32 = 1;

const META: TableDefinition<&str, &str> = TableDefinition::new("meta");
const VECTORS: TableDefinition<u64, &[u8]> = TableDefinition::new("vectors");
const CHUNKS: TableDefinition<u64, &[u8]> = TableDefinition::new("chunks");

const METADATA_KEY: &str = "index";

/// Header size: 4 bytes vector dimension.
const HEADER_SIZE: usize = 4;

/// Similarity function used for ranking.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Default,
    Serialize,
    Deserialize,
    clap::ValueEnum,
)]
#[serde(rename_all = "snake_case")]
pub enum Similarity {
    #[default]
    Cosine,
    DotProduct,
}

impl Similarity {
    /// Score two vectors of equal length. Cosine against a zero vector is 0.
    pub fn score(self, a: &[f32], b: &[f32]) -> f32 {
        let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
        match self {
            Self::DotProduct => dot,
            Self::Cosine => {
                let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
                let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
                if norm_a == 0.0 || norm_b == 0.0 {
                    0.0
                } else {
                    dot / (norm_a * norm_b)
                }
            }
        }
    }
}

impl std::fmt::Display for Similarity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cosine => f.write_str("cosine"),
            Self::DotProduct => f.write_str("dot_product"),
        }
    }
}

/// Caller-supplied description of what is being indexed.
#[derive(Debug, Clone, PartialEq)]
pub struct BuildInfo {
    pub metric: Similarity,
    pub embedding: EmbeddingModelId,
    pub source: DocumentSource,
    pub chunking: ChunkingConfig,
}

/// Everything `open` needs to validate and interpret the stored entries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexMetadata {
    pub format_version: u32,
    pub metric: Similarity,
    /// `None` for an index built from zero entries.
    pub dimension: Option<usize>,
    pub entry_count: usize,
    pub embedding: EmbeddingModelId,
    pub source: DocumentSource,
    pub chunking: ChunkingConfig,
    /// Build time in seconds since the Unix epoch.
    pub built_at: u64,
}

/// Opaque, unique identifier of an indexed entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EntryId(u64);

impl EntryId {
    /// Insertion sequence number of the entry.
    pub fn sequence(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for EntryId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{:06}", self.0)
    }
}

#[derive(Debug, Clone)]
pub struct IndexedEntry {
    pub id: EntryId,
    pub vector: Embedding,
    pub chunk: Chunk,
}

/// A retrieved chunk with its similarity to the query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    pub score: f32,
}

/// A read-only vector index loaded into memory.
pub struct VectorIndex {
    location: PathBuf,
    metadata: IndexMetadata,
    entries: Vec<IndexedEntry>,
}

impl VectorIndex {
    /// Persist `entries` at `location`, replacing any index already there.
    ///
    /// All vectors must share one dimension. Failures to create or write
    /// the location surface as [`Error::StorageWrite`].
    pub fn build(
        location: &Path,
        info: BuildInfo,
        entries: Vec<(Chunk, Embedding)>,
    ) -> Result<Self> {
        let dimension = check_dimensions(&entries)?;

        let metadata = IndexMetadata {
            format_version: FORMAT_VERSION,
            metric: info.metric,
            dimension,
            entry_count: entries.len(),
            embedding: info.embedding,
            source: info.source,
            chunking: info.chunking,
            built_at: SystemTime::now()
                .duration_since(SystemTime::UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs(),
        };

        std::fs::create_dir_all(location)
            .map_err(|e| Error::storage_write(location, e))?;
        let path = location.join(INDEX_FILE);
        if path.exists() {
            std::fs::remove_file(&path)
                .map_err(|e| Error::storage_write(&path, e))?;
        }

        write_database(&path, &metadata, &entries)
            .map_err(|e| Error::storage_write(&path, e))?;

        info!(
            location = %location.display(),
            entries = metadata.entry_count,
            dimension = ?metadata.dimension,
            "built vector index"
        );

        let entries = entries
            .into_iter()
            .enumerate()
            .map(|(i, (chunk, vector))| IndexedEntry {
                id: EntryId(i as u64),
                vector,
                chunk,
            })
            .collect();

        Ok(Self {
            location: location.to_path_buf(),
            metadata,
            entries,
        })
    }

    /// Load a previously built index.
    ///
    /// Fails with [`Error::IndexNotFound`] when `location` holds no index and
    /// with [`Error::CorruptIndex`] when the stored data does not match its
    /// own metadata.
    pub fn open(location: &Path) -> Result<Self> {
        let path = location.join(INDEX_FILE);
        if !location.is_dir() || !path.is_file() {
            return Err(Error::IndexNotFound(location.to_path_buf()));
        }

        let db = Database::open(&path).map_err(|e| {
            Error::CorruptIndex(format!("cannot open {}: {e}", path.display()))
        })?;
        let txn = db.begin_read()?;

        let meta = txn.open_table(META).map_err(|e| {
            Error::CorruptIndex(format!("missing metadata table: {e}"))
        })?;
        let raw = meta.get(METADATA_KEY)?.ok_or_else(|| {
            Error::CorruptIndex("missing index metadata".into())
        })?;
        let metadata: IndexMetadata = serde_json::from_str(raw.value())
            .map_err(|e| {
                Error::CorruptIndex(format!("unreadable index metadata: {e}"))
            })?;

        if metadata.format_version != FORMAT_VERSION {
            return Err(Error::CorruptIndex(format!(
                "unsupported index format version {} (expected {FORMAT_VERSION})",
                metadata.format_version
            )));
        }

        let vectors = txn.open_table(VECTORS).map_err(|e| {
            Error::CorruptIndex(format!("missing vectors table: {e}"))
        })?;
        let chunks = txn.open_table(CHUNKS).map_err(|e| {
            Error::CorruptIndex(format!("missing chunks table: {e}"))
        })?;

        let mut entries = Vec::with_capacity(metadata.entry_count);
        for row in vectors.iter()? {
            let (key, value) = row?;
            let id = key.value();
            let vector = decode_vector(value.value(), metadata.dimension)
                .map_err(|reason| {
                    Error::CorruptIndex(format!("entry {id}: {reason}"))
                })?;

            let chunk_bytes = chunks.get(id)?.ok_or_else(|| {
                Error::CorruptIndex(format!("entry {id} has no chunk"))
            })?;
            let chunk: Chunk = serde_json::from_slice(chunk_bytes.value())
                .map_err(|e| {
                    Error::CorruptIndex(format!("entry {id}: bad chunk: {e}"))
                })?;

            entries.push(IndexedEntry {
                id: EntryId(id),
                vector,
                chunk,
            });
        }

        if entries.len() != metadata.entry_count {
            return Err(Error::CorruptIndex(format!(
                "metadata lists {} entries, found {}",
                metadata.entry_count,
                entries.len()
            )));
        }

        debug!(
            location = %location.display(),
            entries = entries.len(),
            "opened vector index"
        );

        Ok(Self {
            location: location.to_path_buf(),
            metadata,
            entries,
        })
    }

    /// Return the `k` entries most similar to `query`, best first.
    ///
    /// Equal scores keep insertion order. An empty index yields an empty
    /// result for any query.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<ScoredChunk>> {
        if k == 0 {
            return Err(Error::InvalidConfiguration(
                "k must be greater than zero".into(),
            ));
        }
        let Some(dimension) = self.metadata.dimension else {
            return Ok(Vec::new());
        };
        if query.len() != dimension {
            return Err(Error::DimensionMismatch {
                expected: dimension,
                actual: query.len(),
            });
        }

        let metric = self.metadata.metric;
        let mut scored: Vec<(usize, f32)> = self
            .entries
            .par_iter()
            .enumerate()
            .map(|(i, entry)| (i, metric.score(query, &entry.vector)))
            .collect();

        scored.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
        scored.truncate(k);

        Ok(scored
            .into_iter()
            .map(|(i, score)| ScoredChunk {
                chunk: self.entries[i].chunk.clone(),
                score,
            })
            .collect())
    }

    pub fn metadata(&self) -> &IndexMetadata {
        &self.metadata
    }

    pub fn location(&self) -> &Path {
        &self.location
    }

    pub fn entries(&self) -> &[IndexedEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl std::fmt::Debug for VectorIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VectorIndex")
            .field("location", &self.location)
            .field("entries", &self.entries.len())
            .finish_non_exhaustive()
    }
}

fn check_dimensions(entries: &[(Chunk, Embedding)]) -> Result<Option<usize>> {
    let Some((_, first)) = entries.first() else {
        return Ok(None);
    };
    let expected = first.len();
    if expected == 0 {
        return Err(Error::InvalidInput("embedding vectors are empty".into()));
    }
    if let Some((_, bad)) = entries.iter().find(|(_, v)| v.len() != expected) {
        return Err(Error::DimensionMismatch {
            expected,
            actual: bad.len(),
        });
    }
    Ok(Some(expected))
}

fn write_database(
    path: &Path,
    metadata: &IndexMetadata,
    entries: &[(Chunk, Embedding)],
) -> Result<()> {
    let db = Database::create(path)?;
    let metadata_json = serde_json::to_string(metadata)?;

    let txn = db.begin_write()?;
    {
        let mut meta = txn.open_table(META)?;
        meta.insert(METADATA_KEY, metadata_json.as_str())?;

        let mut vectors = txn.open_table(VECTORS)?;
        let mut chunks = txn.open_table(CHUNKS)?;
        for (i, (chunk, vector)) in entries.iter().enumerate() {
            let id = i as u64;
            vectors.insert(id, encode_vector(vector).as_slice())?;
            chunks.insert(id, serde_json::to_vec(chunk)?.as_slice())?;
        }
    }
    txn.commit()?;
    Ok(())
}

fn encode_vector(vector: &[f32]) -> Vec<u8> {
    let mut bytes =
        Vec::with_capacity(HEADER_SIZE + std::mem::size_of_val(vector));
    bytes.extend_from_slice(&(vector.len() as u32).to_le_bytes());
    for value in vector {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}

fn decode_vector(
    bytes: &[u8],
    dimension: Option<usize>,
) -> std::result::Result<Embedding, String> {
    let Some(header) = bytes.get(..HEADER_SIZE) else {
        return Err("truncated vector header".into());
    };
    let mut header_bytes = [0u8; HEADER_SIZE];
    header_bytes.copy_from_slice(header);
    let stored = u32::from_le_bytes(header_bytes) as usize;

    if Some(stored) != dimension {
        return Err(format!(
            "vector dimension {stored} does not match index dimension {dimension:?}"
        ));
    }

    let body = &bytes[HEADER_SIZE..];
    if body.len() != stored * 4 {
        return Err(format!(
            "expected {} vector bytes, found {}",
            stored * 4,
            body.len()
        ));
    }

    // redb values carry no alignment guarantee, so copy instead of casting.
    Ok(bytemuck::pod_collect_to_vec::<u8, [u8; 4]>(body)
        .into_iter()
        .map(f32::from_le_bytes)
        .collect())
}
