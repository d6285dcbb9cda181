//! wikirag - retrieval-augmented question answering over a Wikipedia article.
//!
//! A corpus is split into overlapping chunks, embedded, and persisted in a
//! self-describing vector index. Questions are embedded the same way, the
//! closest chunks are retrieved, and a language model answers from them.
//!
//! # Quick start
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use wikirag::{
//!     corpus,
//!     indexer::{self, BuildOptions},
//!     local_embedder::{DEFAULT_LOCAL_MODEL, LocalEmbedder},
//!     retriever::Retriever,
//! };
//!
//! let corpus = corpus::load("data/wikipedia_cybersecurity.txt".as_ref(), None).unwrap();
//! let embedder = Arc::new(LocalEmbedder::new(DEFAULT_LOCAL_MODEL, None).unwrap());
//! let (index, _) = indexer::build_index(
//!     "vector_db".as_ref(),
//!     &corpus,
//!     embedder.as_ref(),
//!     &BuildOptions::default(),
//! )
//! .unwrap();
//!
//! let retriever = Retriever::new(embedder, Arc::new(index)).unwrap();
//! for hit in retriever.retrieve("What is malware?", 3).unwrap() {
//!     println!("{:.3} {}", hit.score, hit.chunk.text);
//! }
//! ```

pub mod chunking;
pub mod config;
pub mod config_db;
pub mod corpus;
pub mod data_dir;
pub mod embedding;
pub mod error;
pub mod gemini;
pub mod generation;
pub mod hash_embedder;
pub mod indexer;
pub mod local_embedder;
pub mod mcp;
pub mod pipeline;
pub mod retriever;
pub mod retry;
pub mod synthesizer;
pub mod text_util;
pub mod vector_index;

pub use config::RagConfig;
pub use config_db::ConfigDb;
pub use data_dir::DataDir;
pub use error::{Error, Result};
pub use pipeline::Pipeline;
pub use vector_index::VectorIndex;
