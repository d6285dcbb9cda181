//! Deterministic embedding model based on feature hashing.
//!
//! Needs no model files or network, which makes it the backend of choice
//! for tests and air-gapped machines. It only matches exact tokens, so
//! "virus" and "viruses" land in unrelated buckets; use the `local` or
//! `gemini` backend for semantic retrieval.
//!
//! Each lower-cased alphanumeric token (minus a short English stop-word
//! list) is hashed with BLAKE3 into one of `dimension` signed buckets,
//! weighted by `1 + ln(tf)`, and the result is L2-normalised so inner
//! product and cosine similarity agree. Hashing is stable across builds
//! and platforms, so an index built today answers queries embedded
//! tomorrow.

use std::collections::BTreeMap;

use rayon::prelude::*;

use crate::{
    embedding::{
        Embedding,
        EmbeddingBackend,
        EmbeddingModelId,
        EmbeddingProvider,
    },
    error::{Error, Result},
};

pub const DEFAULT_HASH_DIMENSION: usize = 384;

pub const HASH_MODEL_NAME: &str = "feature-hash-v1";

const STOP_WORDS: &[&str] = &[
    "a", "about", "an", "and", "are", "as", "at", "be", "by", "can", "do",
    "does", "for", "from", "how", "in", "is", "it", "its", "of", "on", "or",
    "that", "the", "this", "to", "was", "what", "when", "where", "which",
    "who", "why", "with",
];

#[derive(Debug, Clone)]
pub struct HashEmbedder {
    dimension: usize,
}

impl HashEmbedder {
    pub fn new(dimension: usize) -> Result<Self> {
        if dimension == 0 {
            return Err(Error::InvalidConfiguration(
                "embedding dimension must be greater than zero".into(),
            ));
        }
        Ok(Self { dimension })
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    fn embed_text(&self, text: &str) -> Embedding {
        // BTreeMap keeps the accumulation order independent of hashing seeds.
        let mut counts: BTreeMap<String, u32> = BTreeMap::new();
        for token in tokenize(text) {
            *counts.entry(token).or_default() += 1;
        }

        let mut vector = vec![0.0f32; self.dimension];
        for (token, count) in &counts {
            let hash = blake3::hash(token.as_bytes());
            let bytes = hash.as_bytes();
            let mut bucket_bytes = [0u8; 8];
            bucket_bytes.copy_from_slice(&bytes[..8]);
            let bucket =
                (u64::from_le_bytes(bucket_bytes) % self.dimension as u64) as usize;
            let sign = if bytes[8] & 1 == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign * (1.0 + (*count as f32).ln());
        }

        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }
        vector
    }
}

impl EmbeddingProvider for HashEmbedder {
    fn model_id(&self) -> EmbeddingModelId {
        EmbeddingModelId {
            backend: EmbeddingBackend::Hash,
            model: HASH_MODEL_NAME.to_string(),
        }
    }

    fn embed_many(&self, texts: &[String]) -> Result<Vec<Embedding>> {
        Ok(texts.par_iter().map(|t| self.embed_text(t)).collect())
    }

    fn embed(&self, text: &str) -> Result<Embedding> {
        Ok(self.embed_text(text))
    }
}

fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|word| !word.is_empty())
        .map(str::to_lowercase)
        .filter(|word| !STOP_WORDS.contains(&word.as_str()))
}
