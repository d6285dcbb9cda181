use std::sync::Arc;

use tracing::debug;

use crate::{
    embedding::EmbeddingProvider,
    error::{Error, Result},
    vector_index::{ScoredChunk, VectorIndex},
};

/// Number of chunks handed to the synthesizer unless the caller asks for more.
pub const DEFAULT_TOP_K: usize = 3;

/// Ranked chunks, best first, at most `k` long.
pub type RetrievalResult = Vec<ScoredChunk>;

/// Embeds questions and looks them up in a vector index.
#[derive(Clone)]
pub struct Retriever {
    embedder: Arc<dyn EmbeddingProvider>,
    index: Arc<VectorIndex>,
}

impl Retriever {
    /// Pair an embedder with an index built in the same vector space.
    ///
    /// Returns [`Error::InvalidConfiguration`] when the embedder's model id
    /// differs from the one recorded in the index metadata.
    pub fn new(
        embedder: Arc<dyn EmbeddingProvider>,
        index: Arc<VectorIndex>,
    ) -> Result<Self> {
        let query_model = embedder.model_id();
        let index_model = &index.metadata().embedding;
        if &query_model != index_model {
            return Err(Error::InvalidConfiguration(format!(
                "index was built with embedding model {index_model}, \
                 but queries would use {query_model}"
            )));
        }
        Ok(Self { embedder, index })
    }

    pub fn retrieve(&self, question: &str, k: usize) -> Result<RetrievalResult> {
        let query = self.embedder.embed(question)?;
        let results = self.index.search(&query, k)?;
        debug!(k, hits = results.len(), "retrieved chunks");
        Ok(results)
    }

    pub fn index(&self) -> &VectorIndex {
        &self.index
    }

    pub fn embedder(&self) -> &dyn EmbeddingProvider {
        self.embedder.as_ref()
    }
}
