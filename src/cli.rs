use std::path::PathBuf;

use clap::{Args, CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use wikirag::{
    config::ConfigOverrides,
    embedding::EmbeddingBackend,
    synthesizer::EmptyContextPolicy,
    vector_index::Similarity,
};

#[derive(Debug, Parser)]
#[command(
    name = "wikirag",
    version,
    about = "Ask questions about a Wikipedia article with retrieval-augmented generation"
)]
pub struct Cli {
    /// Override the XDG data directory
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Index directory (defaults to <data dir>/index)
    #[arg(long, global = true, env = "WIKIRAG_INDEX")]
    pub index: Option<PathBuf>,

    /// Increase log verbosity (can be repeated: -v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Only log warnings and errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Chunk, embed and index a corpus file
    Build(BuildArgs),
    /// Answer a question from the indexed corpus
    Ask(AskArgs),
    /// Show the chunks most relevant to a question, without generating
    Retrieve(RetrieveArgs),
    /// Show index metadata
    Status(StatusArgs),
    /// Manage persisted settings
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Start MCP server for AI agent integration
    Mcp(McpArgs),
    /// Generate shell completions
    #[command(hide = true)]
    Completions(CompletionsArgs),
}

// -- Shared --

#[derive(Debug, Clone, Default, Args)]
pub struct ApiKeyArgs {
    /// Google Generative Language API key
    #[arg(long, env = "GOOGLE_GENAI_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, Default, Args)]
pub struct QueryArgs {
    /// Number of chunks to retrieve
    #[arg(short = 'k', long)]
    pub top_k: Option<usize>,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

// -- Build --

#[derive(Debug, Parser)]
pub struct BuildArgs {
    /// Plain-text corpus file
    #[arg(long)]
    pub corpus: PathBuf,

    /// JSON file with the corpus title and url
    /// (defaults to wikipedia_meta.json next to the corpus)
    #[arg(long)]
    pub meta: Option<PathBuf>,

    /// Chunk size in characters
    #[arg(long)]
    pub chunk_size: Option<usize>,

    /// Overlap between adjacent chunks in characters
    #[arg(long)]
    pub overlap: Option<usize>,

    /// Embedding backend
    #[arg(long, value_enum)]
    pub embedding: Option<EmbeddingBackend>,

    /// Embedding model name (e.g. all-MiniLM-L6-v2 or text-embedding-004)
    #[arg(long)]
    pub embedding_model: Option<String>,

    /// Dimension of the hash embedding model
    #[arg(long)]
    pub dimension: Option<usize>,

    /// Similarity metric stored in the index
    #[arg(long, value_enum)]
    pub metric: Option<Similarity>,

    /// Do not draw a progress bar
    #[arg(long)]
    pub no_progress: bool,

    #[command(flatten)]
    pub key: ApiKeyArgs,
}

// -- Ask --

#[derive(Debug, Parser)]
pub struct AskArgs {
    /// The question to answer
    pub question: String,

    #[command(flatten)]
    pub query: QueryArgs,

    /// Generation model name
    #[arg(long)]
    pub model: Option<String>,

    /// Sampling temperature (0-2)
    #[arg(long)]
    pub temperature: Option<f32>,

    /// Overall timeout in seconds (0 disables)
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Behaviour when no relevant context is found
    #[arg(long, value_enum)]
    pub empty_context: Option<EmptyContextPolicy>,

    /// Minimum similarity for a chunk to count as relevant
    #[arg(long)]
    pub min_score: Option<f32>,

    #[command(flatten)]
    pub key: ApiKeyArgs,
}

// -- Retrieve --

#[derive(Debug, Parser)]
pub struct RetrieveArgs {
    /// The question to look up
    pub question: String,

    #[command(flatten)]
    pub query: QueryArgs,

    #[command(flatten)]
    pub key: ApiKeyArgs,
}

// -- Status --

#[derive(Debug, Parser)]
pub struct StatusArgs {
    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

// -- Config --

#[derive(Debug, Subcommand)]
pub enum ConfigAction {
    /// Show persisted settings and available keys
    Show {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Persist a setting in config.redb
    Set {
        /// Setting name (see `config show`)
        key: String,
        value: String,
    },
    /// Remove a persisted setting (revert to default)
    Unset { key: String },
}

// -- MCP --

#[derive(Debug, Parser)]
pub struct McpArgs {
    #[command(flatten)]
    pub key: ApiKeyArgs,
}

// -- Completions --

#[derive(Debug, Parser)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    #[arg(value_enum)]
    pub shell: Shell,
}

impl CompletionsArgs {
    /// Generate shell completions and print to stdout.
    pub fn generate(&self) {
        let mut cmd = Cli::command();
        clap_complete::generate(
            self.shell,
            &mut cmd,
            "wikirag",
            &mut std::io::stdout(),
        );
    }
}

impl Cli {
    /// Collect every flag that feeds into the resolved configuration.
    pub fn overrides(&self) -> ConfigOverrides {
        let mut o = ConfigOverrides {
            index_dir: self.index.clone(),
            ..Default::default()
        };

        match &self.command {
            Command::Build(args) => {
                o.api_key = args.key.api_key.clone();
                o.chunk_size = args.chunk_size;
                o.chunk_overlap = args.overlap;
                o.embedding_backend = args.embedding;
                o.embedding_model = args.embedding_model.clone();
                o.dimension = args.dimension;
                o.metric = args.metric;
            }
            Command::Ask(args) => {
                o.api_key = args.key.api_key.clone();
                o.top_k = args.query.top_k;
                o.generation_model = args.model.clone();
                o.temperature = args.temperature;
                o.timeout_secs = args.timeout;
                o.empty_context = args.empty_context;
                o.min_score = args.min_score;
            }
            Command::Retrieve(args) => {
                o.api_key = args.key.api_key.clone();
                o.top_k = args.query.top_k;
            }
            Command::Mcp(args) => o.api_key = args.key.api_key.clone(),
            Command::Status(_)
            | Command::Config { .. }
            | Command::Completions(_) => {}
        }
        o
    }
}
