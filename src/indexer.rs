use std::path::Path;

use kdam::{BarExt, tqdm};
use tracing::info;

use crate::{
    chunking::{self, ChunkingConfig},
    corpus::Corpus,
    embedding::{Embedding, EmbeddingProvider},
    error::{Error, FailureKind, Result},
    retry::{RetryPolicy, with_retry},
    vector_index::{BuildInfo, Similarity, VectorIndex},
};

#[derive(Debug, Clone)]
pub struct BuildOptions {
    pub chunking: ChunkingConfig,
    pub metric: Similarity,
    /// Number of chunks sent to the embedder per call.
    pub batch_size: usize,
    pub retry: RetryPolicy,
    /// Draw a progress bar on stderr.
    pub progress: bool,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            chunking: ChunkingConfig::default(),
            metric: Similarity::default(),
            batch_size: 32,
            retry: RetryPolicy::default(),
            progress: false,
        }
    }
}

/// Summary of a finished build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildReport {
    pub chunks: usize,
    pub dimension: Option<usize>,
}

/// Chunk `corpus`, embed every chunk and persist the index at `location`.
///
/// Any existing index at `location` is replaced. Embedding batches that fail
/// transiently are retried according to `options.retry`; any other failure
/// aborts the build before anything is written.
pub fn build_index(
    location: &Path,
    corpus: &Corpus,
    embedder: &dyn EmbeddingProvider,
    options: &BuildOptions,
) -> Result<(VectorIndex, BuildReport)> {
    if options.batch_size == 0 {
        return Err(Error::InvalidConfiguration(
            "embedding batch size must be greater than zero".into(),
        ));
    }

    let chunks = chunking::split(
        &corpus.text,
        options.chunking.chunk_size,
        options.chunking.overlap,
        &corpus.source,
    )?;
    info!(
        chunks = chunks.len(),
        chunk_size = options.chunking.chunk_size,
        overlap = options.chunking.overlap,
        "split corpus"
    );

    let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
    let mut vectors: Vec<Embedding> = Vec::with_capacity(texts.len());

    let mut pb = tqdm!(
        total = texts.len(),
        desc = "Embedding",
        unit = " chunks",
        disable = !options.progress
    );

    for (batch_no, batch) in texts.chunks(options.batch_size).enumerate() {
        let what = format!("embedding batch {}", batch_no + 1);
        let embedded =
            with_retry(&options.retry, &what, || embedder.embed_many(batch))?;
        if embedded.len() != batch.len() {
            return Err(Error::EmbeddingService {
                kind: FailureKind::Terminal,
                message: format!(
                    "expected {} vectors, got {}",
                    batch.len(),
                    embedded.len()
                ),
            });
        }
        vectors.extend(embedded);
        pb.update(batch.len())?;
    }
    if options.progress {
        eprintln!();
    }

    let info = BuildInfo {
        metric: options.metric,
        embedding: embedder.model_id(),
        source: corpus.source.clone(),
        chunking: options.chunking,
    };
    let index =
        VectorIndex::build(location, info, chunks.into_iter().zip(vectors).collect())?;

    let report = BuildReport {
        chunks: index.len(),
        dimension: index.metadata().dimension,
    };
    Ok((index, report))
}
