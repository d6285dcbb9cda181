use std::path::{Path, PathBuf};

use rmcp::{
    ServiceExt,
    model::CallToolRequestParams,
    transport::{ConfigureCommandExt, TokioChildProcess},
};
use serde_json::json;
use wikirag::{
    DataDir,
    chunking::{ChunkingConfig, DocumentSource},
    corpus::Corpus,
    hash_embedder::HashEmbedder,
    indexer::{BuildOptions, build_index},
};

const CORPUS: &str = "Malware is malicious software that harms hosts.\n\n\
                      Phishing tricks users into revealing secrets.\n\n\
                      Firewalls filter traffic between networks.";

fn setup_fixture(data_dir: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let data_dir = DataDir::resolve(Some(data_dir))?;
    let corpus = Corpus {
        text: CORPUS.to_string(),
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
    build_index(
        &data_dir.index_dir(),
        &corpus,
        &HashEmbedder::new(4096)?,
        &options,
    )?;
    Ok(())
}

#[tokio::test]
async fn mcp_stdio_retrieve_roundtrip() -> Result<(), Box<dyn std::error::Error>>
{
    let tempdir = tempfile::tempdir()?;
    setup_fixture(tempdir.path())?;

    let bin = wikirag_bin()?;
    let transport = TokioChildProcess::new(
        tokio::process::Command::new(bin).configure(|cmd| {
            cmd.arg("mcp")
                .env("WIKIRAG_DATA_DIR", tempdir.path())
                .env_remove("WIKIRAG_INDEX")
                .env_remove("GOOGLE_GENAI_API_KEY");
        }),
    )?;

    let client = ().serve(transport).await?;

    let args = json!({
        "question": "What is phishing?",
        "topK": 2
    });

    let result = client
        .peer()
        .call_tool(
            CallToolRequestParams::new("wikirag_retrieve")
                .with_arguments(args.as_object().unwrap().clone()),
        )
        .await?;

    let structured = result.structured_content.expect("structured content");
    assert_eq!(
        structured.get("resultCount").and_then(|v| v.as_u64()),
        Some(2)
    );
    let results = structured
        .get("results")
        .and_then(|v| v.as_array())
        .expect("results array");
    assert_eq!(results.len(), 2);
    assert!(
        results[0]
            .get("text")
            .and_then(|v| v.as_str())
            .is_some_and(|text| text.starts_with("Phishing"))
    );
    assert_eq!(
        results[0].get("title").and_then(|v| v.as_str()),
        Some("Cybersecurity - Wikipedia")
    );

    // Without an API key the server can only retrieve.
    let ask = client
        .peer()
        .call_tool(
            CallToolRequestParams::new("wikirag_ask")
                .with_arguments(args.as_object().unwrap().clone()),
        )
        .await;
    assert!(ask.is_err());

    client.cancel().await?;
    Ok(())
}

fn wikirag_bin() -> Result<PathBuf, Box<dyn std::error::Error>> {
    if let Ok(bin) = std::env::var("CARGO_BIN_EXE_wikirag") {
        return Ok(PathBuf::from(bin));
    }

    let mut path = std::env::current_exe()?;
    path.pop();
    if path.ends_with("deps") {
        path.pop();
    }
    path.push("wikirag");

    if cfg!(windows) {
        path.set_extension("exe");
    }

    Ok(path)
}
