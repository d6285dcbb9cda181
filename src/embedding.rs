use std::{path::PathBuf, sync::Arc, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{
    error::{Error, FailureKind, Result},
    gemini::{DEFAULT_BASE_URL, GeminiClient, GeminiEmbedder},
    hash_embedder::{DEFAULT_HASH_DIMENSION, HASH_MODEL_NAME, HashEmbedder},
    local_embedder::{DEFAULT_LOCAL_MODEL, LocalEmbedder},
};

/// A dense embedding vector. Its length is decided by the provider.
pub type Embedding = Vec<f32>;

pub const DEFAULT_GEMINI_EMBEDDING_MODEL: &str = "text-embedding-004";

/// Maximum number of texts Gemini accepts in one `batchEmbedContents` call.
pub const MAX_GEMINI_BATCH: usize = 100;

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

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
pub enum EmbeddingBackend {
    /// Sentence-transformer model run on this machine through fastembed.
    #[default]
    Local,
    /// Deterministic feature hashing of exact tokens. No model download.
    Hash,
    /// Google Generative Language embeddings API.
    Gemini,
}

impl std::fmt::Display for EmbeddingBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Local => f.write_str("local"),
            Self::Hash => f.write_str("hash"),
            Self::Gemini => f.write_str("gemini"),
        }
    }
}

impl std::str::FromStr for EmbeddingBackend {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "hash" => Ok(Self::Hash),
            "gemini" => Ok(Self::Gemini),
            other => Err(Error::InvalidConfiguration(format!(
                "unknown embedding backend '{other}' (expected local, hash or gemini)"
            ))),
        }
    }
}

/// Identifies the vector space an embedding belongs to.
///
/// Vectors are only comparable when their ids are equal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmbeddingModelId {
    pub backend: EmbeddingBackend,
    pub model: String,
}

impl std::fmt::Display for EmbeddingModelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.backend, self.model)
    }
}

/// Maps text to embedding vectors.
///
/// Implementations must be deterministic for identical input and model
/// configuration, and must report failures instead of returning
/// placeholder vectors.
pub trait EmbeddingProvider: Send + Sync {
    fn model_id(&self) -> EmbeddingModelId;

    /// Embed a batch of documents, preserving input order.
    fn embed_many(&self, texts: &[String]) -> Result<Vec<Embedding>>;

    /// Embed a single query text.
    fn embed(&self, text: &str) -> Result<Embedding> {
        let mut vectors = self.embed_many(&[text.to_string()])?;
        match (vectors.pop(), vectors.is_empty()) {
            (Some(vector), true) => Ok(vector),
            _ => Err(Error::EmbeddingService {
                kind: FailureKind::Terminal,
                message: "expected exactly one vector for one input".into(),
            }),
        }
    }
}

/// Settings for constructing an [`EmbeddingProvider`].
#[derive(Debug, Clone)]
pub struct EmbeddingConfig {
    pub backend: EmbeddingBackend,
    /// Model name for the local or gemini backend. `None` picks the
    /// backend's default.
    pub model: Option<String>,
    /// Output dimension of the hash backend.
    pub dimension: usize,
    /// Where local model files are cached.
    pub cache_dir: Option<PathBuf>,
    pub api_key: Option<String>,
    pub base_url: String,
    pub timeout: Duration,
    pub batch_size: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            backend: EmbeddingBackend::default(),
            model: None,
            dimension: DEFAULT_HASH_DIMENSION,
            cache_dir: None,
            api_key: None,
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout: DEFAULT_REQUEST_TIMEOUT,
            batch_size: 32,
        }
    }
}

impl EmbeddingConfig {
    /// The model the selected backend will load.
    pub fn model_name(&self) -> &str {
        match (self.backend, self.model.as_deref()) {
            (EmbeddingBackend::Hash, _) => HASH_MODEL_NAME,
            (_, Some(model)) => model,
            (EmbeddingBackend::Local, None) => DEFAULT_LOCAL_MODEL,
            (EmbeddingBackend::Gemini, None) => DEFAULT_GEMINI_EMBEDDING_MODEL,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(Error::InvalidConfiguration(
                "embedding batch size must be greater than zero".into(),
            ));
        }
        match self.backend {
            EmbeddingBackend::Local => {
                crate::local_embedder::resolve_model(self.model_name())?;
            }
            EmbeddingBackend::Hash => {
                if self.dimension == 0 {
                    return Err(Error::InvalidConfiguration(
                        "embedding dimension must be greater than zero".into(),
                    ));
                }
            }
            EmbeddingBackend::Gemini => {
                if self.model_name().trim().is_empty() {
                    return Err(Error::InvalidConfiguration(
                        "missing Gemini embedding model name".into(),
                    ));
                }
                if self.batch_size > MAX_GEMINI_BATCH {
                    return Err(Error::InvalidConfiguration(format!(
                        "Gemini accepts at most {MAX_GEMINI_BATCH} texts per batch, got {}",
                        self.batch_size
                    )));
                }
            }
        }
        Ok(())
    }

    /// Rebind this configuration to the vector space an index was built in.
    ///
    /// Query vectors must come from the same backend and model as the
    /// stored ones, so the index metadata wins over user settings.
    pub fn for_index(
        &self,
        model_id: &EmbeddingModelId,
        dimension: Option<usize>,
    ) -> Self {
        let mut config = self.clone();
        config.backend = model_id.backend;
        match model_id.backend {
            EmbeddingBackend::Hash => {
                if let Some(dimension) = dimension {
                    config.dimension = dimension;
                }
            }
            EmbeddingBackend::Local | EmbeddingBackend::Gemini => {
                config.model = Some(model_id.model.clone());
            }
        }
        config
    }
}

/// Build the provider selected by `config`.
pub fn from_config(
    config: &EmbeddingConfig,
) -> Result<Arc<dyn EmbeddingProvider>> {
    config.validate()?;
    match config.backend {
        EmbeddingBackend::Local => Ok(Arc::new(LocalEmbedder::new(
            config.model_name(),
            config.cache_dir.as_deref(),
        )?)),
        EmbeddingBackend::Hash => {
            Ok(Arc::new(HashEmbedder::new(config.dimension)?))
        }
        EmbeddingBackend::Gemini => {
            let api_key = config.api_key.as_deref().ok_or_else(|| {
                Error::InvalidConfiguration(
                    "the gemini backend needs an API key (GOOGLE_GENAI_API_KEY)"
                        .into(),
                )
            })?;
            let client =
                GeminiClient::new(api_key, &config.base_url, config.timeout)?;
            Ok(Arc::new(GeminiEmbedder::new(
                client,
                config.model_name().to_string(),
                config.batch_size,
            )))
        }
    }
}
