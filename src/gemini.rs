//! Blocking clients for the Google Generative Language API.
//!
//! Both the embedder and the generator share [`GeminiClient`], which owns
//! the HTTP client, the API key header and the mapping from transport and
//! HTTP failures onto the crate's transient/terminal classification.

use std::time::Duration;

use reqwest::{
    StatusCode,
    blocking::Client,
    header::{CONTENT_TYPE, HeaderMap, HeaderValue},
};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use tracing::debug;

use crate::{
    embedding::{
        Embedding,
        EmbeddingBackend,
        EmbeddingModelId,
        EmbeddingProvider,
    },
    error::{Error, FailureKind, Result},
    generation::Generator,
};

pub const DEFAULT_BASE_URL: &str =
    "https://generativelanguage.googleapis.com/v1beta";

const API_KEY_HEADER: &str = "x-goog-api-key";

/// Which service a request belongs to, for error reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Service {
    Embedding,
    Generation,
}

impl Service {
    fn error(self, kind: FailureKind, message: impl Into<String>) -> Error {
        let message = message.into();
        match self {
            Self::Embedding => Error::EmbeddingService { kind, message },
            Self::Generation => Error::GenerationService { kind, message },
        }
    }
}

/// Transient: throttling and server-side trouble. Everything else
/// (bad key, exhausted project, malformed request) needs a human.
///
/// Gemini reports both per-minute throttling and an exhausted daily quota
/// as 429 `RESOURCE_EXHAUSTED`; only the error body tells them apart.
pub fn classify_failure(status: StatusCode, body: &str) -> FailureKind {
    if status == StatusCode::TOO_MANY_REQUESTS {
        return if exhausts_daily_quota(body) {
            FailureKind::Terminal
        } else {
            FailureKind::Transient
        };
    }
    if status == StatusCode::REQUEST_TIMEOUT || status.is_server_error() {
        FailureKind::Transient
    } else {
        FailureKind::Terminal
    }
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ApiError,
}

#[derive(Deserialize)]
struct ApiError {
    #[serde(default)]
    details: Vec<ErrorDetail>,
}

#[derive(Deserialize)]
struct ErrorDetail {
    #[serde(rename = "@type", default)]
    type_url: String,
    #[serde(default)]
    violations: Vec<QuotaViolation>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct QuotaViolation {
    #[serde(default)]
    quota_id: String,
}

/// True when a `google.rpc.QuotaFailure` names a per-day quota, which will
/// not recover within any retry window.
fn exhausts_daily_quota(body: &str) -> bool {
    let Ok(envelope) = serde_json::from_str::<ErrorEnvelope>(body) else {
        return false;
    };
    envelope
        .error
        .details
        .iter()
        .filter(|detail| detail.type_url.ends_with("google.rpc.QuotaFailure"))
        .flat_map(|detail| &detail.violations)
        .any(|violation| violation.quota_id.contains("PerDay"))
}

#[derive(Clone)]
pub struct GeminiClient {
    client: Client,
    base_url: String,
    timeout: Duration,
}

impl GeminiClient {
    pub fn new(api_key: &str, base_url: &str, timeout: Duration) -> Result<Self> {
        if api_key.trim().is_empty() {
            return Err(Error::InvalidConfiguration(
                "missing Gemini API key".into(),
            ));
        }

        let mut headers = HeaderMap::new();
        let key = HeaderValue::from_str(api_key.trim()).map_err(|_| {
            Error::InvalidConfiguration("invalid Gemini API key".into())
        })?;
        headers.insert(API_KEY_HEADER, key);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let client = Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .map_err(|e| {
                Error::InvalidConfiguration(format!(
                    "failed to build Gemini HTTP client: {e}"
                ))
            })?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout,
        })
    }

    /// POST `body` to `models/{model}:{method}` and decode the JSON reply.
    fn call<B, R>(
        &self,
        service: Service,
        model: &str,
        method: &str,
        body: &B,
    ) -> Result<R>
    where
        B: Serialize,
        R: DeserializeOwned,
    {
        let url = format!("{}/models/{model}:{method}", self.base_url);
        debug!(%url, "calling Gemini");

        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .map_err(|e| self.transport_error(service, &e))?;

        let status = response.status();
        if !status.is_success() {
            let text = response
                .text()
                .unwrap_or_else(|_| "<body unavailable>".to_string());
            return Err(service.error(
                classify_failure(status, &text),
                format!("{method} returned {status}: {text}"),
            ));
        }

        response.json::<R>().map_err(|e| {
            if e.is_timeout() {
                Error::Timeout(self.timeout)
            } else {
                service.error(
                    FailureKind::Terminal,
                    format!("failed to parse {method} response: {e}"),
                )
            }
        })
    }

    fn transport_error(&self, service: Service, err: &reqwest::Error) -> Error {
        if err.is_timeout() {
            return Error::Timeout(self.timeout);
        }
        let kind = if err.is_connect() || err.is_request() || err.is_body() {
            FailureKind::Transient
        } else {
            FailureKind::Terminal
        };
        service.error(kind, err.to_string())
    }
}

impl std::fmt::Debug for GeminiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

// -- Embeddings --

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
enum TaskType {
    RetrievalDocument,
    RetrievalQuery,
}

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Serialize)]
struct Content<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'a str>,
    parts: Vec<Part<'a>>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct EmbedRequest<'a> {
    model: String,
    content: Content<'a>,
    task_type: TaskType,
}

#[derive(Serialize)]
struct BatchEmbedRequest<'a> {
    requests: Vec<EmbedRequest<'a>>,
}

#[derive(Debug, Deserialize)]
struct BatchEmbedResponse {
    #[serde(default)]
    embeddings: Vec<ContentEmbedding>,
}

#[derive(Debug, Deserialize)]
struct ContentEmbedding {
    values: Vec<f32>,
}

/// Remote embedding provider backed by `batchEmbedContents`.
///
/// Documents are embedded with the `RETRIEVAL_DOCUMENT` task type and
/// questions with `RETRIEVAL_QUERY`, which is how the model expects
/// asymmetric search to be used.
#[derive(Debug, Clone)]
pub struct GeminiEmbedder {
    client: GeminiClient,
    model: String,
    batch_size: usize,
}

impl GeminiEmbedder {
    pub fn new(client: GeminiClient, model: String, batch_size: usize) -> Self {
        Self {
            client,
            model,
            batch_size: batch_size.max(1),
        }
    }

    fn embed_batch(
        &self,
        texts: &[String],
        task_type: TaskType,
    ) -> Result<Vec<Embedding>> {
        let request = batch_request(&self.model, texts, task_type);
        let response: BatchEmbedResponse = self.client.call(
            Service::Embedding,
            &self.model,
            "batchEmbedContents",
            &request,
        )?;
        vectors_from_response(response, texts.len())
    }
}

fn batch_request<'a>(
    model: &str,
    texts: &'a [String],
    task_type: TaskType,
) -> BatchEmbedRequest<'a> {
    BatchEmbedRequest {
        requests: texts
            .iter()
            .map(|text| EmbedRequest {
                model: format!("models/{model}"),
                content: Content {
                    role: None,
                    parts: vec![Part { text }],
                },
                task_type,
            })
            .collect(),
    }
}

fn vectors_from_response(
    response: BatchEmbedResponse,
    expected: usize,
) -> Result<Vec<Embedding>> {
    if response.embeddings.len() != expected {
        return Err(Error::EmbeddingService {
            kind: FailureKind::Terminal,
            message: format!(
                "Gemini returned {} embeddings for {expected} inputs",
                response.embeddings.len()
            ),
        });
    }
    if response.embeddings.iter().any(|e| e.values.is_empty()) {
        return Err(Error::EmbeddingService {
            kind: FailureKind::Terminal,
            message: "Gemini returned an empty embedding".into(),
        });
    }
    Ok(response.embeddings.into_iter().map(|e| e.values).collect())
}

impl EmbeddingProvider for GeminiEmbedder {
    fn model_id(&self) -> EmbeddingModelId {
        EmbeddingModelId {
            backend: EmbeddingBackend::Gemini,
            model: self.model.clone(),
        }
    }

    fn embed_many(&self, texts: &[String]) -> Result<Vec<Embedding>> {
        let mut vectors = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            vectors.extend(self.embed_batch(batch, TaskType::RetrievalDocument)?);
        }
        Ok(vectors)
    }

    fn embed(&self, text: &str) -> Result<Embedding> {
        let texts = [text.to_string()];
        let mut vectors = self.embed_batch(&texts, TaskType::RetrievalQuery)?;
        vectors.pop().ok_or_else(|| Error::EmbeddingService {
            kind: FailureKind::Terminal,
            message: "Gemini returned no embedding".into(),
        })
    }
}

// -- Generation --

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationParams {
    temperature: f32,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    contents: Vec<Content<'a>>,
    generation_config: GenerationParams,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<CandidateContent>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

/// Text generation through `generateContent`.
#[derive(Debug, Clone)]
pub struct GeminiGenerator {
    client: GeminiClient,
    model: String,
    temperature: f32,
}

impl GeminiGenerator {
    pub fn new(client: GeminiClient, model: String, temperature: f32) -> Self {
        Self {
            client,
            model,
            temperature,
        }
    }
}

fn generate_request(prompt: &str, temperature: f32) -> GenerateRequest<'_> {
    GenerateRequest {
        contents: vec![Content {
            role: Some("user"),
            parts: vec![Part { text: prompt }],
        }],
        generation_config: GenerationParams { temperature },
    }
}

fn text_from_response(response: GenerateResponse) -> Result<String> {
    if let Some(reason) = response
        .prompt_feedback
        .and_then(|feedback| feedback.block_reason)
    {
        return Err(Error::GenerationService {
            kind: FailureKind::Terminal,
            message: format!("prompt was blocked: {reason}"),
        });
    }

    let Some(candidate) = response.candidates.into_iter().next() else {
        return Err(Error::GenerationService {
            kind: FailureKind::Terminal,
            message: "Gemini returned no candidates".into(),
        });
    };

    let text: String = candidate
        .content
        .map(|content| {
            content
                .parts
                .into_iter()
                .filter_map(|part| part.text)
                .collect()
        })
        .unwrap_or_default();

    if text.is_empty() {
        let reason = candidate.finish_reason.unwrap_or_else(|| "unknown".into());
        return Err(Error::GenerationService {
            kind: FailureKind::Terminal,
            message: format!("Gemini returned no text (finish reason: {reason})"),
        });
    }
    Ok(text)
}

impl Generator for GeminiGenerator {
    fn model(&self) -> &str {
        &self.model
    }

    fn generate(&self, prompt: &str) -> Result<String> {
        let request = generate_request(prompt, self.temperature);
        let response: GenerateResponse = self.client.call(
            Service::Generation,
            &self.model,
            "generateContent",
            &request,
        )?;
        text_from_response(response)
    }
}
