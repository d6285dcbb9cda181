//! Resolved runtime configuration.
//!
//! Values are layered, highest priority first: command-line flags (which
//! clap also fills from environment variables), settings persisted in
//! `config.redb`, then built-in defaults. The result is validated once and
//! handed to components through their constructors.

use std::{path::PathBuf, str::FromStr, time::Duration};

use crate::{
    chunking::ChunkingConfig,
    config_db::ConfigDb,
    data_dir::DataDir,
    embedding::{EmbeddingBackend, EmbeddingConfig},
    error::{Error, Result},
    generation::GenerationConfig,
    retriever::DEFAULT_TOP_K,
    synthesizer::{EmptyContextPolicy, SynthesisConfig},
    vector_index::Similarity,
};

/// Environment variable holding the Google Generative Language API key.
pub const API_KEY_ENV: &str = "GOOGLE_GENAI_API_KEY";

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

/// Keys accepted by `config set`, with a short description each.
pub const SETTINGS: &[(&str, &str)] = &[
    ("chunk_size", "chunk size in characters"),
    ("chunk_overlap", "overlap between chunks in characters"),
    ("metric", "similarity metric: cosine or dot_product"),
    ("embedding.backend", "embedding backend: local, hash or gemini"),
    ("embedding.model", "local or gemini embedding model name"),
    ("embedding.dimension", "hash embedding dimension"),
    ("embedding.batch_size", "chunks per embedding request"),
    ("generation.model", "generation model name"),
    ("generation.temperature", "sampling temperature (0-2)"),
    ("top_k", "number of chunks retrieved per question"),
    ("timeout_secs", "overall request timeout in seconds, 0 disables"),
    ("max_prompt_chars", "prompt size limit in characters, 0 disables"),
    ("min_score", "minimum similarity for relevant context"),
    ("empty_context", "without relevant context: generate or decline"),
];

#[derive(Debug, Clone)]
pub struct RagConfig {
    pub index_dir: PathBuf,
    pub chunking: ChunkingConfig,
    pub metric: Similarity,
    pub embedding: EmbeddingConfig,
    pub generation: GenerationConfig,
    pub synthesis: SynthesisConfig,
    pub top_k: usize,
    pub timeout: Option<Duration>,
}

/// Values supplied on the command line or through the environment.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub index_dir: Option<PathBuf>,
    pub api_key: Option<String>,
    pub chunk_size: Option<usize>,
    pub chunk_overlap: Option<usize>,
    pub metric: Option<Similarity>,
    pub embedding_backend: Option<EmbeddingBackend>,
    pub embedding_model: Option<String>,
    pub dimension: Option<usize>,
    pub generation_model: Option<String>,
    pub temperature: Option<f32>,
    pub top_k: Option<usize>,
    pub timeout_secs: Option<u64>,
    pub empty_context: Option<EmptyContextPolicy>,
    pub min_score: Option<f32>,
}

impl RagConfig {
    /// Built-in defaults with the index and model cache under `data_dir`.
    pub fn defaults(data_dir: &DataDir) -> Self {
        let mut config = Self::new(data_dir.index_dir());
        config.embedding.cache_dir = Some(data_dir.models_dir());
        config
    }

    /// Built-in defaults with an explicit index location.
    pub fn new(index_dir: PathBuf) -> Self {
        Self {
            index_dir,
            chunking: ChunkingConfig::default(),
            metric: Similarity::default(),
            embedding: EmbeddingConfig::default(),
            generation: GenerationConfig::default(),
            synthesis: SynthesisConfig::default(),
            top_k: DEFAULT_TOP_K,
            timeout: Some(DEFAULT_TIMEOUT),
        }
    }

    /// Layer persisted settings and overrides on top of the defaults.
    pub fn resolve(
        data_dir: &DataDir,
        settings: Option<&ConfigDb>,
        overrides: &ConfigOverrides,
    ) -> Result<Self> {
        let mut config = Self::defaults(data_dir);

        if let Some(db) = settings {
            for (key, value) in db.list_settings()? {
                config.apply_setting(&key, &value)?;
            }
        }
        config.apply_overrides(overrides);
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.chunking.validate()?;
        self.embedding.validate()?;
        self.generation.validate()?;
        self.synthesis.validate()?;
        if self.top_k == 0 {
            return Err(Error::InvalidConfiguration(
                "top_k must be greater than zero".into(),
            ));
        }
        Ok(())
    }

    /// Apply one persisted `key = value` setting.
    pub fn apply_setting(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "chunk_size" => self.chunking.chunk_size = parse(key, value)?,
            "chunk_overlap" => self.chunking.overlap = parse(key, value)?,
            "metric" => {
                let name = value.trim().replace('_', "-");
                self.metric =
                    <Similarity as clap::ValueEnum>::from_str(&name, true)
                        .map_err(|e| invalid_value(key, value, e))?;
            }
            "embedding.backend" => self.embedding.backend = value.parse()?,
            "embedding.model" => {
                self.embedding.model = Some(value.trim().to_string());
            }
            "embedding.dimension" => {
                self.embedding.dimension = parse(key, value)?;
            }
            "embedding.batch_size" => {
                self.embedding.batch_size = parse(key, value)?;
            }
            "generation.model" => self.generation.model = value.to_string(),
            "generation.temperature" => {
                self.generation.temperature = parse(key, value)?;
            }
            "top_k" => self.top_k = parse(key, value)?,
            "timeout_secs" => {
                self.timeout = non_zero_secs(parse(key, value)?);
            }
            "max_prompt_chars" => {
                let limit: usize = parse(key, value)?;
                self.synthesis.max_prompt_chars = (limit > 0).then_some(limit);
            }
            "min_score" => self.synthesis.min_score = Some(parse(key, value)?),
            "empty_context" => {
                self.synthesis.empty_context = value.parse()?;
            }
            other => {
                return Err(Error::InvalidConfiguration(format!(
                    "unknown setting '{other}'"
                )));
            }
        }
        Ok(())
    }

    fn apply_overrides(&mut self, o: &ConfigOverrides) {
        if let Some(dir) = &o.index_dir {
            self.index_dir = dir.clone();
        }
        if let Some(key) = &o.api_key {
            self.embedding.api_key = Some(key.clone());
            self.generation.api_key = Some(key.clone());
        }
        if let Some(size) = o.chunk_size {
            self.chunking.chunk_size = size;
        }
        if let Some(overlap) = o.chunk_overlap {
            self.chunking.overlap = overlap;
        }
        if let Some(metric) = o.metric {
            self.metric = metric;
        }
        if let Some(backend) = o.embedding_backend {
            self.embedding.backend = backend;
        }
        if let Some(model) = &o.embedding_model {
            self.embedding.model = Some(model.clone());
        }
        if let Some(dimension) = o.dimension {
            self.embedding.dimension = dimension;
        }
        if let Some(model) = &o.generation_model {
            self.generation.model = model.clone();
        }
        if let Some(temperature) = o.temperature {
            self.generation.temperature = temperature;
        }
        if let Some(k) = o.top_k {
            self.top_k = k;
        }
        if let Some(secs) = o.timeout_secs {
            self.timeout = non_zero_secs(secs);
        }
        if let Some(policy) = o.empty_context {
            self.synthesis.empty_context = policy;
        }
        if let Some(score) = o.min_score {
            self.synthesis.min_score = Some(score);
        }
    }
}

/// Check that `key = value` would be accepted before persisting it.
pub fn validate_setting(key: &str, value: &str) -> Result<()> {
    RagConfig::new(PathBuf::new()).apply_setting(key, value)
}

fn parse<T>(key: &str, value: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| invalid_value(key, value, e))
}

fn invalid_value(key: &str, value: &str, err: impl std::fmt::Display) -> Error {
    Error::InvalidConfiguration(format!("invalid value '{value}' for {key}: {err}"))
}

fn non_zero_secs(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}
