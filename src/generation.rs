use std::{sync::Arc, time::Duration};

use crate::{
    embedding::DEFAULT_REQUEST_TIMEOUT,
    error::{Error, Result},
    gemini::{DEFAULT_BASE_URL, GeminiClient, GeminiGenerator},
};

pub const DEFAULT_GENERATION_MODEL: &str = "gemini-2.5-flash";

pub const DEFAULT_TEMPERATURE: f32 = 0.2;

/// An opaque text-completion service: one prompt in, one text out.
pub trait Generator: Send + Sync {
    fn model(&self) -> &str;

    fn generate(&self, prompt: &str) -> Result<String>;
}

#[derive(Debug, Clone)]
pub struct GenerationConfig {
    pub model: String,
    pub api_key: Option<String>,
    pub base_url: String,
    pub temperature: f32,
    pub timeout: Duration,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_GENERATION_MODEL.to_string(),
            api_key: None,
            base_url: DEFAULT_BASE_URL.to_string(),
            temperature: DEFAULT_TEMPERATURE,
            timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

impl GenerationConfig {
    pub fn validate(&self) -> Result<()> {
        if self.model.trim().is_empty() {
            return Err(Error::InvalidConfiguration(
                "missing generation model name".into(),
            ));
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(Error::InvalidConfiguration(format!(
                "temperature must be between 0 and 2, got {}",
                self.temperature
            )));
        }
        Ok(())
    }
}

/// Build the generation client described by `config`.
pub fn from_config(config: &GenerationConfig) -> Result<Arc<dyn Generator>> {
    config.validate()?;
    let api_key = config.api_key.as_deref().ok_or_else(|| {
        Error::InvalidConfiguration(
            "answer generation needs an API key (GOOGLE_GENAI_API_KEY)".into(),
        )
    })?;
    let client = GeminiClient::new(api_key, &config.base_url, config.timeout)?;
    Ok(Arc::new(GeminiGenerator::new(
        client,
        config.model.clone(),
        config.temperature,
    )))
}
