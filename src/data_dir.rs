//! Where wikirag keeps its state between runs.
//!
//! ```text
//! <root>/config.redb   settings written by `wikirag config set`
//! <root>/index/        default vector index
//! <root>/models/       local embedding model cache
//! ```

use std::{
    ffi::OsString,
    path::{Path, PathBuf},
};

use serde::Serialize;

use crate::error::{Error, Result};

/// Environment variable overriding the data directory.
pub const DATA_DIR_ENV: &str = "WIKIRAG_DATA_DIR";

/// Which input chose the data directory, reported by `wikirag status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RootOrigin {
    Flag,
    Environment,
    Xdg,
}

impl std::fmt::Display for RootOrigin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Flag => f.write_str("--data-dir"),
            Self::Environment => f.write_str(DATA_DIR_ENV),
            Self::Xdg => f.write_str("XDG data home"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DataDir {
    root: PathBuf,
    origin: RootOrigin,
}

impl DataDir {
    /// Pick the root from `--data-dir`, then `WIKIRAG_DATA_DIR`, then
    /// `$XDG_DATA_HOME/wikirag`, creating it if needed.
    pub fn resolve(flag: Option<&Path>) -> Result<Self> {
        Self::resolve_from(flag, std::env::var_os(DATA_DIR_ENV))
    }

    fn resolve_from(flag: Option<&Path>, env: Option<OsString>) -> Result<Self> {
        // An exported but empty variable counts as unset.
        let (root, origin) = match (flag, env.filter(|v| !v.is_empty())) {
            (Some(path), _) => (path.to_path_buf(), RootOrigin::Flag),
            (None, Some(value)) => (PathBuf::from(value), RootOrigin::Environment),
            (None, None) => (xdg_data_home()?, RootOrigin::Xdg),
        };

        std::fs::create_dir_all(&root)
            .map_err(|_| Error::DataDir(root.clone()))?;
        Ok(Self { root, origin })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn origin(&self) -> RootOrigin {
        self.origin
    }

    pub fn config_db(&self) -> PathBuf {
        self.root.join("config.redb")
    }

    /// Default index location when neither `--index` nor WIKIRAG_INDEX is set.
    pub fn index_dir(&self) -> PathBuf {
        self.root.join("index")
    }

    /// Cache for downloaded embedding models. Created on first model load.
    pub fn models_dir(&self) -> PathBuf {
        self.root.join("models")
    }
}

fn xdg_data_home() -> Result<PathBuf> {
    xdg::BaseDirectories::with_prefix("wikirag")
        .get_data_home()
        .ok_or_else(|| {
            Error::InvalidConfiguration(
                "could not determine XDG data home directory".into(),
            )
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flag_wins_over_environment() {
        let tmp = tempfile::tempdir().unwrap();
        let flag = tmp.path().join("flag");
        let env = tmp.path().join("env");

        let dir =
            DataDir::resolve_from(Some(&flag), Some(env.clone().into())).unwrap();
        assert_eq!(dir.root(), flag);
        assert_eq!(dir.origin(), RootOrigin::Flag);
        assert!(!env.exists());
    }

    #[test]
    fn environment_is_used_without_flag() {
        let tmp = tempfile::tempdir().unwrap();
        let env = tmp.path().join("from-env");

        let dir = DataDir::resolve_from(None, Some(env.clone().into())).unwrap();
        assert_eq!(dir.root(), env);
        assert_eq!(dir.origin(), RootOrigin::Environment);
        assert!(env.is_dir());
    }

    #[test]
    fn layout_under_root() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = DataDir::resolve(Some(tmp.path())).unwrap();

        assert_eq!(dir.config_db(), tmp.path().join("config.redb"));
        assert_eq!(dir.index_dir(), tmp.path().join("index"));
        assert_eq!(dir.models_dir(), tmp.path().join("models"));
        assert_eq!(dir.origin().to_string(), "--data-dir");
    }

    #[test]
    fn uncreatable_root_is_data_dir_error() {
        let tmp = tempfile::tempdir().unwrap();
        let file = tmp.path().join("file");
        std::fs::write(&file, "").unwrap();

        assert!(matches!(
            DataDir::resolve(Some(&file.join("sub"))),
            Err(Error::DataDir(_))
        ));
    }
}
