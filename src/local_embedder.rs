//! On-device sentence embeddings through fastembed (ONNX Runtime).
//!
//! The default model is `all-MiniLM-L6-v2`, a 384-dimensional sentence
//! transformer. Model files are downloaded from Hugging Face on first use
//! and cached under the data directory, after which the backend works
//! offline.

use std::{
    io::IsTerminal,
    path::Path,
    sync::Mutex,
};

use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use tracing::info;

use crate::{
    embedding::{
        Embedding,
        EmbeddingBackend,
        EmbeddingModelId,
        EmbeddingProvider,
    },
    error::{Error, FailureKind, Result},
};

pub const DEFAULT_LOCAL_MODEL: &str = "all-MiniLM-L6-v2";

/// Local models wikirag knows how to load, by canonical name.
const MODELS: &[(&str, EmbeddingModel)] = &[
    ("all-MiniLM-L6-v2", EmbeddingModel::AllMiniLML6V2),
    ("bge-small-en-v1.5", EmbeddingModel::BGESmallENV15),
    ("bge-base-en-v1.5", EmbeddingModel::BGEBaseENV15),
];

/// Map a user-supplied model name onto a supported model.
///
/// Matching ignores case and the Hugging Face organisation prefix, so
/// `sentence-transformers/all-MiniLM-L6-v2` is accepted too.
pub fn resolve_model(name: &str) -> Result<(&'static str, EmbeddingModel)> {
    let bare = name.trim().rsplit('/').next().unwrap_or_default();
    MODELS
        .iter()
        .find(|(canonical, _)| canonical.eq_ignore_ascii_case(bare))
        .map(|(canonical, model)| (*canonical, model.clone()))
        .ok_or_else(|| {
            let known: Vec<&str> = MODELS.iter().map(|(n, _)| *n).collect();
            Error::InvalidConfiguration(format!(
                "unknown local embedding model '{name}' (expected one of: {})",
                known.join(", ")
            ))
        })
}

pub struct LocalEmbedder {
    model: Mutex<TextEmbedding>,
    name: &'static str,
}

impl LocalEmbedder {
    /// Load `model_name`, downloading it into `cache_dir` when missing.
    pub fn new(model_name: &str, cache_dir: Option<&Path>) -> Result<Self> {
        let (name, model) = resolve_model(model_name)?;

        let mut options = InitOptions::new(model)
            .with_show_download_progress(std::io::stderr().is_terminal());
        if let Some(dir) = cache_dir {
            std::fs::create_dir_all(dir)
                .map_err(|_| Error::DataDir(dir.to_path_buf()))?;
            options = options.with_cache_dir(dir.to_path_buf());
        }

        info!(model = name, "loading local embedding model");
        let model =
            TextEmbedding::try_new(options).map_err(|e| Error::ModelLoad {
                model: name.to_string(),
                reason: e.to_string(),
            })?;

        Ok(Self {
            model: Mutex::new(model),
            name,
        })
    }
}

impl EmbeddingProvider for LocalEmbedder {
    fn model_id(&self) -> EmbeddingModelId {
        EmbeddingModelId {
            backend: EmbeddingBackend::Local,
            model: self.name.to_string(),
        }
    }

    fn embed_many(&self, texts: &[String]) -> Result<Vec<Embedding>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let model = self.model.lock().map_err(|_| Error::EmbeddingService {
            kind: FailureKind::Terminal,
            message: format!("{} is unusable after a panic", self.name),
        })?;
        model
            .embed(texts.to_vec(), None)
            .map_err(|e| Error::EmbeddingService {
                kind: FailureKind::Terminal,
                message: format!("{}: {e}", self.name),
            })
    }
}

impl std::fmt::Debug for LocalEmbedder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalEmbedder")
            .field("model", &self.name)
            .finish_non_exhaustive()
    }
}
