//! Prompt assembly and answer generation.

use std::{fmt::Write as _, sync::Arc};

use serde::Serialize;
use tracing::debug;

use crate::{
    chunking::Chunk,
    error::{Error, Result},
    generation::Generator,
    retriever::RetrievalResult,
};

const INSTRUCTION: &str = "You are a helpful assistant answering questions \
about the documents below. Answer using only the information in the \
context. If the context does not contain the answer, say that you could \
not find it in the provided documents. Do not make up facts.";

/// Answer returned when context is insufficient and the policy declines.
pub const NO_RELEVANT_INFORMATION: &str =
    "No relevant information was found in the indexed documents.";

/// What to do when retrieval found nothing usable.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, clap::ValueEnum,
)]
#[serde(rename_all = "snake_case")]
pub enum EmptyContextPolicy {
    /// Call the generator anyway and flag the answer.
    #[default]
    Generate,
    /// Skip generation and return [`NO_RELEVANT_INFORMATION`].
    Decline,
}

impl std::str::FromStr for EmptyContextPolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "generate" => Ok(Self::Generate),
            "decline" => Ok(Self::Decline),
            other => Err(Error::InvalidConfiguration(format!(
                "unknown empty-context policy '{other}' (expected generate or decline)"
            ))),
        }
    }
}

impl std::fmt::Display for EmptyContextPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Generate => f.write_str("generate"),
            Self::Decline => f.write_str("decline"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SynthesisConfig {
    /// Upper bound on the assembled prompt, in characters.
    pub max_prompt_chars: Option<usize>,
    /// Chunks scoring below this do not count as relevant context.
    pub min_score: Option<f32>,
    pub empty_context: EmptyContextPolicy,
}

impl SynthesisConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_prompt_chars == Some(0) {
            return Err(Error::InvalidConfiguration(
                "max prompt size must be greater than zero".into(),
            ));
        }
        if let Some(score) = self.min_score
            && !score.is_finite()
        {
            return Err(Error::InvalidConfiguration(format!(
                "minimum score must be a finite number, got {score}"
            )));
        }
        Ok(())
    }
}

/// Whether an answer was produced from retrieved context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Grounding {
    Grounded,
    InsufficientContext,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnswerResult {
    pub answer: String,
    /// Chunks included in the prompt, in ranked order.
    pub sources: Vec<Chunk>,
    pub grounding: Grounding,
}

pub struct Synthesizer {
    generator: Arc<dyn Generator>,
    config: SynthesisConfig,
}

impl Synthesizer {
    pub fn new(generator: Arc<dyn Generator>, config: SynthesisConfig) -> Self {
        Self { generator, config }
    }

    pub fn config(&self) -> &SynthesisConfig {
        &self.config
    }

    /// Produce an answer to `question` from the retrieved chunks.
    ///
    /// Makes at most one generation call. Generation failures propagate
    /// unchanged.
    pub fn answer(
        &self,
        question: &str,
        retrieved: RetrievalResult,
    ) -> Result<AnswerResult> {
        let sufficient = self.has_relevant_context(&retrieved);

        if !sufficient && self.config.empty_context == EmptyContextPolicy::Decline {
            debug!("no relevant context, declining to generate");
            return Ok(AnswerResult {
                answer: NO_RELEVANT_INFORMATION.to_string(),
                sources: Vec::new(),
                grounding: Grounding::InsufficientContext,
            });
        }

        let sources: Vec<Chunk> =
            retrieved.into_iter().map(|scored| scored.chunk).collect();
        let prompt = build_prompt(question, &sources);

        if let Some(limit) = self.config.max_prompt_chars {
            let length = prompt.chars().count();
            if length > limit {
                return Err(Error::PromptTooLarge { length, limit });
            }
        }

        debug!(
            model = self.generator.model(),
            chunks = sources.len(),
            prompt_len = prompt.len(),
            "generating answer"
        );
        let answer = self.generator.generate(&prompt)?;

        Ok(AnswerResult {
            answer,
            sources,
            grounding: if sufficient {
                Grounding::Grounded
            } else {
                Grounding::InsufficientContext
            },
        })
    }

    /// A chunk counts only when it is positively similar to the question
    /// and clears `min_score` if one is set. A query that embeds to the
    /// zero vector scores 0 against everything and so finds no context.
    fn has_relevant_context(&self, retrieved: &RetrievalResult) -> bool {
        retrieved.iter().any(|r| {
            r.score > 0.0 && self.config.min_score.is_none_or(|min| r.score >= min)
        })
    }
}

/// Assemble the generation prompt.
///
/// Chunks appear in the given order, each as a numbered block headed by
/// its source title and delimited by triple quotes, followed by the
/// question verbatim.
pub fn build_prompt(question: &str, chunks: &[Chunk]) -> String {
    let mut prompt = String::from(INSTRUCTION);
    prompt.push_str("\n\nContext:\n");
    if chunks.is_empty() {
        prompt.push_str("(no context was retrieved)\n");
    }
    for (i, chunk) in chunks.iter().enumerate() {
        let _ = write!(
            prompt,
            "\n[{}] {}\n\"\"\"\n{}\n\"\"\"\n",
            i + 1,
            chunk.metadata.source_title,
            chunk.text
        );
    }
    let _ = write!(prompt, "\nQuestion: {question}\n\nAnswer:");
    prompt
}
