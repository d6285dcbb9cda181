use std::sync::Arc;

use rmcp::{
    ServerHandler,
    ServiceExt,
    handler::server::{router::tool::ToolRouter, wrapper::Parameters},
    model::{
        CallToolResult,
        Content,
        Implementation,
        ServerCapabilities,
        ServerInfo,
    },
    tool,
    tool_handler,
    tool_router,
};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::{
    error::{self, Error},
    pipeline::Pipeline,
    synthesizer::Grounding,
    text_util::{DEFAULT_SNIPPET_MAX_CHARS, snippet},
};

struct WikiragState {
    pipeline: Pipeline,
    default_k: usize,
}

#[derive(Clone)]
pub struct WikiragMcpServer {
    state: Arc<WikiragState>,
    tool_router: ToolRouter<Self>,
}

impl WikiragMcpServer {
    pub fn new(pipeline: Pipeline, default_k: usize) -> Self {
        Self {
            state: Arc::new(WikiragState {
                pipeline,
                default_k,
            }),
            tool_router: Self::tool_router(),
        }
    }
}

#[tool_router(router = tool_router)]
impl WikiragMcpServer {
    /// Answer a question from the indexed article.
    #[tool(
        name = "wikirag_ask",
        description = "Answer a question using the indexed article. Returns the answer and the source chunks it was generated from."
    )]
    pub async fn wikirag_ask(
        &self,
        params: Parameters<QuestionParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        let QuestionParams { question, top_k } = params.0;
        let k = top_k.unwrap_or(self.state.default_k);
        let pipeline = self.state.pipeline.clone();
        let asked = question.clone();

        // Collaborators make blocking HTTP calls.
        let result =
            tokio::task::spawn_blocking(move || pipeline.ask(&asked, k))
                .await
                .map_err(|e| mcp_error("ask task failed", e))?
                .map_err(tool_error)?;

        let sources: Vec<SourceItem> = result
            .sources
            .iter()
            .map(|chunk| SourceItem {
                position: chunk.metadata.position,
                title: chunk.metadata.source_title.clone(),
                url: chunk.metadata.source_url.clone(),
                snippet: snippet(&chunk.text, DEFAULT_SNIPPET_MAX_CHARS),
            })
            .collect();

        let summary = format_answer_summary(&result.answer, &sources);
        let structured = serde_json::to_value(AskResponse {
            question,
            answer: result.answer,
            grounding: result.grounding,
            sources,
        })
        .map_err(|e| mcp_error("failed to serialize answer", e))?;

        let mut tool_result = CallToolResult::success(vec![Content::text(summary)]);
        tool_result.structured_content = Some(structured);
        Ok(tool_result)
    }

    /// Return the chunks most similar to a question.
    #[tool(
        name = "wikirag_retrieve",
        description = "Find the chunks of the indexed article most relevant to a question, ranked by similarity. Does not generate an answer."
    )]
    pub async fn wikirag_retrieve(
        &self,
        params: Parameters<QuestionParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        let QuestionParams { question, top_k } = params.0;
        let k = top_k.unwrap_or(self.state.default_k);
        let pipeline = self.state.pipeline.clone();
        let asked = question.clone();

        let retrieved =
            tokio::task::spawn_blocking(move || pipeline.retrieve(&asked, k))
                .await
                .map_err(|e| mcp_error("retrieve task failed", e))?
                .map_err(tool_error)?;

        let items: Vec<RetrievedItem> = retrieved
            .into_iter()
            .map(|scored| RetrievedItem {
                position: scored.chunk.metadata.position,
                score: scored.score,
                title: scored.chunk.metadata.source_title,
                url: scored.chunk.metadata.source_url,
                text: scored.chunk.text,
            })
            .collect();

        let summary = format_retrieve_summary(&items, &question);
        let structured = serde_json::to_value(RetrieveResponse {
            question,
            result_count: items.len(),
            results: items,
        })
        .map_err(|e| mcp_error("failed to serialize results", e))?;

        let mut tool_result = CallToolResult::success(vec![Content::text(summary)]);
        tool_result.structured_content = Some(structured);
        Ok(tool_result)
    }
}

#[tool_handler(router = self.tool_router)]
impl ServerHandler for WikiragMcpServer {
    fn get_info(&self) -> ServerInfo {
        let instructions = if self.state.pipeline.can_answer() {
            "Use wikirag_ask to answer questions about the indexed article. Use wikirag_retrieve to inspect the supporting passages."
        } else {
            "Use wikirag_retrieve to find passages of the indexed article. Answer generation is disabled because no API key is configured."
        };
        ServerInfo::new(ServerCapabilities::builder().enable_tools().build())
            .with_server_info(
                Implementation::new("wikirag", env!("CARGO_PKG_VERSION"))
                    .with_title("wikirag MCP"),
            )
            .with_instructions(instructions)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct QuestionParams {
    /// Natural-language question.
    pub question: String,
    /// Number of chunks to retrieve (default: 3).
    pub top_k: Option<usize>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AskResponse {
    question: String,
    answer: String,
    grounding: Grounding,
    sources: Vec<SourceItem>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SourceItem {
    position: usize,
    title: String,
    url: String,
    snippet: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RetrieveResponse {
    question: String,
    result_count: usize,
    results: Vec<RetrievedItem>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RetrievedItem {
    position: usize,
    score: f32,
    title: String,
    url: String,
    text: String,
}

fn format_answer_summary(answer: &str, sources: &[SourceItem]) -> String {
    let mut lines = vec![answer.to_string()];
    if !sources.is_empty() {
        lines.push(String::new());
        lines.push("Sources:".to_string());
        for (i, source) in sources.iter().enumerate() {
            lines.push(format!("[{}] {} {}", i + 1, source.title, source.url));
        }
    }
    lines.join("\n")
}

fn format_retrieve_summary(items: &[RetrievedItem], question: &str) -> String {
    if items.is_empty() {
        return format!("No chunks found for \"{question}\"");
    }

    let mut lines = Vec::with_capacity(items.len() + 1);
    let suffix = if items.len() == 1 { "" } else { "s" };
    lines.push(format!(
        "Found {} chunk{} for \"{question}\":",
        items.len(),
        suffix
    ));

    for item in items {
        lines.push(format!(
            "#{} {:.3} {}",
            item.position,
            item.score,
            snippet(&item.text, 80)
        ));
    }

    lines.join("\n")
}

fn tool_error(error: Error) -> rmcp::ErrorData {
    match error {
        Error::InvalidInput(_) | Error::InvalidConfiguration(_) => {
            rmcp::ErrorData::invalid_params(error.to_string(), None)
        }
        other => mcp_error("request failed", other),
    }
}

fn mcp_error(message: &str, error: impl std::fmt::Display) -> rmcp::ErrorData {
    rmcp::ErrorData::internal_error(
        message.to_string(),
        Some(json!({ "error": error.to_string() })),
    )
}

pub fn run_mcp(pipeline: Pipeline, default_k: usize) -> error::Result<()> {
    let server = WikiragMcpServer::new(pipeline, default_k);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async move {
        let transport = rmcp::transport::stdio();
        let running = server.serve(transport).await.map_err(|e| {
            Error::Mcp(format!("initialization failed: {e}"))
        })?;
        running
            .waiting()
            .await
            .map_err(|e| Error::Mcp(e.to_string()))?;
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        chunking::{ChunkingConfig, DocumentSource},
        corpus::Corpus,
        generation::Generator,
        hash_embedder::HashEmbedder,
        indexer::{BuildOptions, build_index},
        retriever::Retriever,
        synthesizer::{SynthesisConfig, Synthesizer},
        vector_index::VectorIndex,
    };

    struct Echo;

    impl Generator for Echo {
        fn model(&self) -> &str {
            "echo"
        }

        fn generate(&self, _prompt: &str) -> error::Result<String> {
            Ok("Phishing is a social engineering attack.".to_string())
        }
    }

    fn retriever(dir: &std::path::Path) -> Retriever {
        let embedder = HashEmbedder::new(4096).unwrap();
        let corpus = Corpus {
            text: "Malware is malicious software that harms hosts.\n\n\
                   Phishing tricks users into revealing secrets.\n\n\
                   Firewalls filter traffic between networks."
                .to_string(),
            source: DocumentSource {
                title: "Cybersecurity - Wikipedia".into(),
                url: "https://en.wikipedia.org/wiki/Computer_security".into(),
            },
        };
        let options = BuildOptions {
            chunking: ChunkingConfig {
                chunk_size: 50,
                overlap: 0,
            },
            ..Default::default()
        };
        build_index(dir, &corpus, &embedder, &options).unwrap();
        let index = Arc::new(VectorIndex::open(dir).unwrap());
        Retriever::new(Arc::new(embedder), index).unwrap()
    }

    #[tokio::test]
    async fn retrieve_tool_returns_ranked_chunks() {
        let tmp = tempfile::tempdir().unwrap();
        let server =
            WikiragMcpServer::new(Pipeline::retrieval_only(retriever(tmp.path())), 3);

        let result = server
            .wikirag_retrieve(Parameters(QuestionParams {
                question: "What is phishing?".into(),
                top_k: Some(2),
            }))
            .await
            .unwrap();

        let structured = result.structured_content.expect("structured");
        assert_eq!(
            structured.get("resultCount").and_then(|v| v.as_u64()),
            Some(2)
        );
        let results = structured
            .get("results")
            .and_then(|v| v.as_array())
            .expect("results array");
        let first_text =
            results[0].get("text").and_then(|v| v.as_str()).unwrap_or("");
        assert!(first_text.contains("Phishing"));

        let summary = result
            .content
            .first()
            .and_then(|c| c.as_text())
            .map(|t| t.text.clone())
            .unwrap_or_default();
        assert!(summary.contains("Found 2 chunks"));
    }

    #[tokio::test]
    async fn ask_tool_returns_answer_and_sources() {
        let tmp = tempfile::tempdir().unwrap();
        let pipeline = Pipeline::new(
            retriever(tmp.path()),
            Synthesizer::new(Arc::new(Echo), SynthesisConfig::default()),
        );
        let server = WikiragMcpServer::new(pipeline, 2);

        let result = server
            .wikirag_ask(Parameters(QuestionParams {
                question: "What is phishing?".into(),
                top_k: None,
            }))
            .await
            .unwrap();

        let structured = result.structured_content.expect("structured");
        assert_eq!(
            structured.get("answer").and_then(|v| v.as_str()),
            Some("Phishing is a social engineering attack.")
        );
        assert_eq!(
            structured.get("grounding").and_then(|v| v.as_str()),
            Some("grounded")
        );
        let sources = structured
            .get("sources")
            .and_then(|v| v.as_array())
            .expect("sources array");
        assert_eq!(sources.len(), 2);
    }

    #[tokio::test]
    async fn ask_without_generator_is_invalid_params() {
        let tmp = tempfile::tempdir().unwrap();
        let server =
            WikiragMcpServer::new(Pipeline::retrieval_only(retriever(tmp.path())), 3);

        let err = server
            .wikirag_ask(Parameters(QuestionParams {
                question: "What is phishing?".into(),
                top_k: None,
            }))
            .await
            .unwrap_err();
        assert_eq!(err.code, rmcp::model::ErrorCode::INVALID_PARAMS);
    }

    #[tokio::test]
    async fn blank_question_is_invalid_params() {
        let tmp = tempfile::tempdir().unwrap();
        let server =
            WikiragMcpServer::new(Pipeline::retrieval_only(retriever(tmp.path())), 3);

        let err = server
            .wikirag_retrieve(Parameters(QuestionParams {
                question: "   ".into(),
                top_k: None,
            }))
            .await
            .unwrap_err();
        assert_eq!(err.code, rmcp::model::ErrorCode::INVALID_PARAMS);
    }
}
