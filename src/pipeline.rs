use std::{
    sync::{Arc, mpsc},
    time::Duration,
};

use tracing::{debug, warn};

use crate::{
    config::{API_KEY_ENV, RagConfig},
    embedding,
    error::{Error, Result},
    generation,
    retriever::{RetrievalResult, Retriever},
    synthesizer::{AnswerResult, Synthesizer},
    vector_index::VectorIndex,
};

/// End-to-end question answering: retrieve, then synthesize.
///
/// Cheap to clone; every collaborator sits behind an `Arc`, so one pipeline
/// can serve concurrent requests.
#[derive(Clone)]
pub struct Pipeline {
    retriever: Retriever,
    synthesizer: Option<Arc<Synthesizer>>,
    timeout: Option<Duration>,
}

impl Pipeline {
    pub fn new(retriever: Retriever, synthesizer: Synthesizer) -> Self {
        Self {
            retriever,
            synthesizer: Some(Arc::new(synthesizer)),
            timeout: None,
        }
    }

    /// A pipeline without a generator. [`Pipeline::ask`] fails with
    /// [`Error::InvalidConfiguration`]; [`Pipeline::retrieve`] works.
    pub fn retrieval_only(retriever: Retriever) -> Self {
        Self {
            retriever,
            synthesizer: None,
            timeout: None,
        }
    }

    /// Open the index at `config.index_dir` and wire up its collaborators.
    ///
    /// The query embedder is rebuilt from the index metadata so queries land
    /// in the same vector space as the stored chunks. A generator is only
    /// attached when an API key is configured.
    pub fn from_config(config: &RagConfig) -> Result<Self> {
        let index = Arc::new(VectorIndex::open(&config.index_dir)?);
        let meta = index.metadata();
        let embedding =
            config.embedding.for_index(&meta.embedding, meta.dimension);
        let embedder = embedding::from_config(&embedding)?;
        let retriever = Retriever::new(embedder, index)?;

        let pipeline = if config.generation.api_key.is_some() {
            let generator = generation::from_config(&config.generation)?;
            Self::new(
                retriever,
                Synthesizer::new(generator, config.synthesis.clone()),
            )
        } else {
            debug!("no API key, answer generation disabled");
            Self::retrieval_only(retriever)
        };
        Ok(pipeline.with_timeout(config.timeout))
    }

    pub fn can_answer(&self) -> bool {
        self.synthesizer.is_some()
    }

    /// Bound the wall-clock time of each [`Pipeline::ask`] call.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn retriever(&self) -> &Retriever {
        &self.retriever
    }

    /// Answer `question` from the `k` most relevant chunks.
    ///
    /// An empty or whitespace-only question fails with
    /// [`Error::InvalidInput`] before any collaborator is called. When a
    /// timeout is configured and elapses, the caller gets
    /// [`Error::Timeout`]; the abandoned worker finishes in the background
    /// and its result is discarded.
    pub fn ask(&self, question: &str, k: usize) -> Result<AnswerResult> {
        validate_request(question, k)?;
        if self.synthesizer.is_none() {
            return Err(not_configured());
        }

        let Some(timeout) = self.timeout else {
            return self.run(question, k);
        };

        let (tx, rx) = mpsc::sync_channel(1);
        let worker = self.clone();
        let owned_question = question.to_string();
        let handle = std::thread::Builder::new()
            .name("wikirag-ask".into())
            .spawn(move || {
                let _ = tx.send(worker.run(&owned_question, k));
            })?;

        match rx.recv_timeout(timeout) {
            Ok(result) => result,
            Err(mpsc::RecvTimeoutError::Timeout) => {
                warn!(?timeout, "question timed out");
                Err(Error::Timeout(timeout))
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                // The worker dropped its sender without sending, so it
                // panicked; surface that panic here.
                match handle.join() {
                    Err(panic) => std::panic::resume_unwind(panic),
                    Ok(()) => Err(Error::Timeout(timeout)),
                }
            }
        }
    }

    /// Run only the retrieval half of [`Pipeline::ask`].
    pub fn retrieve(&self, question: &str, k: usize) -> Result<RetrievalResult> {
        validate_request(question, k)?;
        self.retriever.retrieve(question, k)
    }

    fn run(&self, question: &str, k: usize) -> Result<AnswerResult> {
        let Some(synthesizer) = &self.synthesizer else {
            return Err(not_configured());
        };
        let retrieved = self.retriever.retrieve(question, k)?;
        debug!(chunks = retrieved.len(), "synthesizing answer");
        synthesizer.answer(question, retrieved)
    }
}

fn not_configured() -> Error {
    Error::InvalidConfiguration(format!(
        "answer generation is not configured (set {API_KEY_ENV})"
    ))
}

fn validate_request(question: &str, k: usize) -> Result<()> {
    if question.trim().is_empty() {
        return Err(Error::InvalidInput("question is empty".into()));
    }
    if k == 0 {
        return Err(Error::InvalidConfiguration(
            "k must be greater than zero".into(),
        ));
    }
    Ok(())
}
