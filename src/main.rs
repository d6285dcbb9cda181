use std::io::IsTerminal;

use clap::Parser;
use serde_json::json;
use tracing_subscriber::EnvFilter;
use wikirag::{
    ConfigDb,
    DataDir,
    Pipeline,
    RagConfig,
    VectorIndex,
    config,
    corpus,
    embedding,
    error::{self, Error},
    indexer::{self, BuildOptions},
    mcp,
    retry::RetryPolicy,
    synthesizer::{AnswerResult, Grounding},
    text_util::{DEFAULT_SNIPPET_MAX_CHARS, indent, snippet},
    vector_index::ScoredChunk,
};

mod cli;

use cli::{Cli, Command, ConfigAction};

fn init_tracing(verbose: u8, quiet: bool) {
    let filter = if let Ok(env) = std::env::var("WIKIRAG_LOG") {
        EnvFilter::new(env)
    } else if quiet {
        EnvFilter::new("warn")
    } else {
        match verbose {
            0 => EnvFilter::new("info"),
            1 => EnvFilter::new("debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .without_time()
        .init();
}

fn main() -> error::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);

    let data_dir = DataDir::resolve(cli.data_dir.as_deref())?;
    let config_db = ConfigDb::open(&data_dir.config_db())?;

    // Settings management must keep working even when a stored value is
    // invalid, so it runs before the configuration is resolved.
    if let Command::Config { action } = &cli.command {
        return cmd_config(&config_db, action);
    }
    if let Command::Completions(args) = &cli.command {
        args.generate();
        return Ok(());
    }

    let config = RagConfig::resolve(&data_dir, Some(&config_db), &cli.overrides())?;

    match cli.command {
        Command::Build(args) => {
            cmd_build(&config, &args, cli.quiet)?;
        }
        Command::Ask(args) => {
            let pipeline = Pipeline::from_config(&config)?;
            let result = pipeline.ask(&args.question, config.top_k)?;
            if args.query.json {
                print_json(&json!({
                    "question": args.question,
                    "answer": result.answer,
                    "grounding": result.grounding,
                    "sources": result.sources,
                }))?;
            } else {
                print_answer(&result);
            }
        }
        Command::Retrieve(args) => {
            let pipeline = Pipeline::from_config(&config)?;
            let results = pipeline.retrieve(&args.question, config.top_k)?;
            if args.query.json {
                print_json(&json!({
                    "question": args.question,
                    "results": results,
                }))?;
            } else {
                print_retrieved(&results);
            }
        }
        Command::Status(args) => {
            cmd_status(&config, &data_dir, args.json)?;
        }
        Command::Mcp(_) => {
            let pipeline = Pipeline::from_config(&config)?;
            mcp::run_mcp(pipeline, config.top_k)?;
        }
        Command::Config { .. } | Command::Completions(_) => {}
    }

    Ok(())
}

fn cmd_build(
    config: &RagConfig,
    args: &cli::BuildArgs,
    quiet: bool,
) -> error::Result<()> {
    let corpus = corpus::load(&args.corpus, args.meta.as_deref())?;
    let embedder = embedding::from_config(&config.embedding)?;

    eprintln!(
        "Building index from {} ({}) with {}",
        args.corpus.display(),
        corpus.source.title,
        embedder.model_id()
    );

    let options = BuildOptions {
        chunking: config.chunking,
        metric: config.metric,
        batch_size: config.embedding.batch_size,
        retry: RetryPolicy::default(),
        progress: !quiet && !args.no_progress && std::io::stderr().is_terminal(),
    };
    let (index, report) =
        indexer::build_index(&config.index_dir, &corpus, embedder.as_ref(), &options)?;

    eprintln!(
        "Indexed {} chunks into {}",
        report.chunks,
        index.location().display()
    );
    Ok(())
}

fn print_answer(result: &AnswerResult) {
    println!("--- Answer ---");
    println!("{}", result.answer.trim_end());
    if result.grounding == Grounding::InsufficientContext {
        println!("\n(no relevant context was found in the index)");
    }

    if result.sources.is_empty() {
        return;
    }
    println!("\n--- Sources ---");
    for (i, chunk) in result.sources.iter().enumerate() {
        let meta = &chunk.metadata;
        if meta.source_url.is_empty() {
            println!("\n[{}] {}", i + 1, meta.source_title);
        } else {
            println!("\n[{}] {} - {}", i + 1, meta.source_title, meta.source_url);
        }
        println!("{}", snippet(&chunk.text, DEFAULT_SNIPPET_MAX_CHARS));
    }
}

fn print_retrieved(results: &[ScoredChunk]) {
    if results.is_empty() {
        println!("The index is empty.");
        return;
    }
    for (i, hit) in results.iter().enumerate() {
        println!(
            "{}. [{:.4}] chunk #{} (offset {})",
            i + 1,
            hit.score,
            hit.chunk.metadata.position,
            hit.chunk.metadata.offset
        );
        println!(
            "{}\n",
            indent(&snippet(&hit.chunk.text, DEFAULT_SNIPPET_MAX_CHARS), 3)
        );
    }
}

fn cmd_status(
    config: &RagConfig,
    data_dir: &DataDir,
    json: bool,
) -> error::Result<()> {
    let index = match VectorIndex::open(&config.index_dir) {
        Ok(index) => Some(index),
        Err(Error::IndexNotFound(_)) => None,
        Err(e) => return Err(e),
    };

    if json {
        let value = match &index {
            Some(index) => json!({
                "data_dir": data_dir.root(),
                "data_dir_origin": data_dir.origin(),
                "index_dir": config.index_dir,
                "index": index.metadata(),
            }),
            None => json!({
                "data_dir": data_dir.root(),
                "data_dir_origin": data_dir.origin(),
                "index_dir": config.index_dir,
                "index": null,
            }),
        };
        return print_json(&value);
    }

    println!(
        "Data directory: {} (from {})",
        data_dir.root().display(),
        data_dir.origin()
    );
    println!("Index: {}", config.index_dir.display());
    let Some(index) = index else {
        println!("  (not built; run `wikirag build --corpus <file>`)");
        return Ok(());
    };

    let meta = index.metadata();
    println!("  Source: {}", meta.source.title);
    if !meta.source.url.is_empty() {
        println!("  URL: {}", meta.source.url);
    }
    println!("  Chunks: {}", meta.entry_count);
    println!(
        "  Chunking: {} chars, {} overlap",
        meta.chunking.chunk_size, meta.chunking.overlap
    );
    println!("  Embedding: {}", meta.embedding);
    match meta.dimension {
        Some(dimension) => println!("  Dimension: {dimension}"),
        None => println!("  Dimension: -"),
    }
    println!("  Metric: {}", meta.metric);
    println!("  Format version: {}", meta.format_version);
    println!("  Built at: {} (unix time)", meta.built_at);
    Ok(())
}

fn cmd_config(config_db: &ConfigDb, action: &ConfigAction) -> error::Result<()> {
    match action {
        ConfigAction::Show { json } => {
            let stored = config_db.list_settings()?;
            if *json {
                let settings: serde_json::Map<String, serde_json::Value> = stored
                    .into_iter()
                    .map(|(k, v)| (k, serde_json::Value::String(v)))
                    .collect();
                return print_json(&serde_json::Value::Object(settings));
            }
            for (key, description) in config::SETTINGS {
                let value = stored
                    .iter()
                    .find(|(k, _)| k == key)
                    .map(|(_, v)| v.as_str())
                    .unwrap_or("(default)");
                println!("{key:<24} {value:<20} {description}");
            }
        }
        ConfigAction::Set { key, value } => {
            config::validate_setting(key, value)?;
            config_db.set_setting(key, value)?;
            println!("Set {key} = {value}");
        }
        ConfigAction::Unset { key } => {
            if !config_db.remove_setting(key)? {
                return Err(Error::NotFound {
                    kind: "setting",
                    name: key.clone(),
                });
            }
            println!("Unset {key}");
        }
    }
    Ok(())
}

fn print_json(value: &serde_json::Value) -> error::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
