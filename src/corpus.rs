use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::debug;

use crate::{
    chunking::DocumentSource,
    error::{Error, Result},
};

/// Sidecar file looked up next to the corpus when no explicit path is given.
pub const META_FILE_NAME: &str = "wikipedia_meta.json";

pub const DEFAULT_TITLE: &str = "Cybersecurity - Wikipedia";

/// A loaded corpus document and its provenance.
#[derive(Debug, Clone, PartialEq)]
pub struct Corpus {
    pub text: String,
    pub source: DocumentSource,
}

#[derive(Debug, Default, Deserialize)]
struct SourceMeta {
    title: Option<String>,
    url: Option<String>,
}

/// Read the corpus text and its `{title, url}` metadata.
///
/// With `meta_path` unset, `wikipedia_meta.json` in the corpus directory is
/// used if present; missing fields fall back to [`DEFAULT_TITLE`] and an
/// empty URL. An explicit `meta_path` that does not exist is an error.
pub fn load(corpus_path: &Path, meta_path: Option<&Path>) -> Result<Corpus> {
    if !corpus_path.is_file() {
        return Err(Error::NotFound {
            kind: "corpus",
            name: corpus_path.display().to_string(),
        });
    }
    let text = std::fs::read_to_string(corpus_path)?;

    let meta = match meta_path {
        Some(path) => {
            if !path.is_file() {
                return Err(Error::NotFound {
                    kind: "metadata file",
                    name: path.display().to_string(),
                });
            }
            read_meta(path)?
        }
        None => {
            let sidecar = default_meta_path(corpus_path);
            if sidecar.is_file() {
                read_meta(&sidecar)?
            } else {
                debug!(path = %sidecar.display(), "no metadata sidecar, using defaults");
                SourceMeta::default()
            }
        }
    };

    Ok(Corpus {
        text,
        source: DocumentSource {
            title: meta.title.unwrap_or_else(|| DEFAULT_TITLE.to_string()),
            url: meta.url.unwrap_or_default(),
        },
    })
}

fn default_meta_path(corpus_path: &Path) -> PathBuf {
    corpus_path
        .parent()
        .unwrap_or_else(|| Path::new("."))
        .join(META_FILE_NAME)
}

fn read_meta(path: &Path) -> Result<SourceMeta> {
    let raw = std::fs::read_to_string(path)?;
    serde_json::from_str(&raw).map_err(|e| {
        Error::InvalidInput(format!(
            "invalid metadata file {}: {e}",
            path.display()
        ))
    })
}
