//! Application settings and configuration types.
//!
//! Settings are read from `~/.config/vecscope/settings.json` (or the XDG
//! equivalent) when present. Every field has a default, so a partial file
//! only overrides what it names.

use directories::{BaseDirs, ProjectDirs};
use serde::{Deserialize, Serialize};
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::embedding::EmbeddingConfig;
use crate::projection::ProjectionConfig;

/// Default name recorded in the export header.
pub const DEFAULT_CORPUS_NAME: &str = "Claude Memory";

/// Default collection to export.
pub const DEFAULT_COLLECTION: &str = "conversations";

/// Model that produced the default corpus, recorded in the export header.
///
/// Independent of the model `serve` loads; vectors from the two are not
/// comparable.
pub const DEFAULT_CORPUS_MODEL: &str = "sentence-transformers/all-mpnet-base-v2";

/// Default destination of the export document.
pub const DEFAULT_OUTPUT: &str = "public/data/claude-memory.json";

/// Settings file name inside the config directory.
const SETTINGS_FILENAME: &str = "settings.json";

/// Errors that can occur while loading settings.
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to read settings file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid settings file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
}

/// Top-level settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Export run defaults.
    pub export: ExportSettings,
    /// Projection hyperparameters.
    pub projection: ProjectionConfig,
    /// Embedding service settings.
    pub server: ServerSettings,
}

impl Settings {
    /// Returns the platform settings path, if a home directory is known.
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("com", "panbanda", "vecscope")
            .map(|dirs| dirs.config_dir().join(SETTINGS_FILENAME))
    }

    /// Loads settings from `path`, falling back to defaults when the file
    /// does not exist.
    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No settings file, using defaults");
                return Ok(Self::default());
            }
            Err(source) => {
                return Err(SettingsError::Read {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };

        serde_json::from_str(&raw).map_err(|source| SettingsError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Defaults for an export run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportSettings {
    /// Chroma persist directory.
    pub chroma_path: PathBuf,
    /// Collection to export.
    pub collection: String,
    /// Destination file.
    pub output: PathBuf,
    /// Maximum number of documents, all when unset.
    pub limit: Option<NonZeroUsize>,
    /// Skip projection computation.
    pub skip_projections: bool,
    /// Corpus name recorded in the header.
    pub name: String,
    /// Model identifier recorded in the header.
    pub embedding_model: String,
}

impl Default for ExportSettings {
    fn default() -> Self {
        Self {
            chroma_path: default_chroma_path(),
            collection: DEFAULT_COLLECTION.to_string(),
            output: PathBuf::from(DEFAULT_OUTPUT),
            limit: None,
            skip_projections: false,
            name: DEFAULT_CORPUS_NAME.to_string(),
            embedding_model: DEFAULT_CORPUS_MODEL.to_string(),
        }
    }
}

/// Embedding service settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// Interface to bind.
    pub host: String,
    /// Port to listen on.
    pub port: u16,
    /// Model loaded at startup.
    pub model: EmbeddingConfig,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 5001,
            model: EmbeddingConfig::default(),
        }
    }
}

fn default_chroma_path() -> PathBuf {
    BaseDirs::new()
        .map(|dirs| dirs.home_dir().join(".claude-memory").join("chroma"))
        .unwrap_or_else(|| PathBuf::from("chroma"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_settings_are_valid() {
        let settings = Settings::default();
        assert_eq!(settings.export.collection, "conversations");
        assert_eq!(settings.export.limit, None);
        assert!(!settings.export.skip_projections);
        assert_eq!(settings.server.port, 5001);
        assert_eq!(settings.projection.scale, 40.0);
        assert!(settings.export.chroma_path.ends_with("chroma"));
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let json = r#"{"export": {"collection": "notes", "limit": 50}, "projection": {"seed": 7}}"#;
        let settings: Settings = serde_json::from_str(json).unwrap();

        assert_eq!(settings.export.collection, "notes");
        assert_eq!(settings.export.limit, NonZeroUsize::new(50));
        assert_eq!(settings.export.name, DEFAULT_CORPUS_NAME);
        assert_eq!(settings.projection.seed, 7);
        assert_eq!(settings.projection.umap.n_neighbors, 15);
    }

    #[test]
    fn zero_limit_is_rejected() {
        let json = r#"{"export": {"limit": 0}}"#;
        assert!(serde_json::from_str::<Settings>(json).is_err());
    }

    #[test]
    fn header_model_is_separate_from_server_model() {
        let settings = Settings::default();
        assert_eq!(settings.export.embedding_model, DEFAULT_CORPUS_MODEL);
        assert_ne!(settings.export.embedding_model, settings.server.model.model_id);
    }

    #[test]
    fn load_missing_file_returns_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::load(&dir.path().join("absent.json")).unwrap();
        assert_eq!(settings.export.collection, DEFAULT_COLLECTION);
    }

    #[test]
    fn load_rejects_malformed_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{not json").unwrap();

        let err = Settings::load(&path).unwrap_err();
        assert!(matches!(err, SettingsError::Parse { .. }));
    }

    #[test]
    fn settings_roundtrip() {
        let mut settings = Settings::default();
        settings.export.skip_projections = true;
        settings.projection.tsne.max_iter = 500;
        settings.server.port = 8080;

        let json = serde_json::to_string_pretty(&settings).unwrap();
        let back: Settings = serde_json::from_str(&json).unwrap();

        assert!(back.export.skip_projections);
        assert_eq!(back.projection.tsne.max_iter, 500);
        assert_eq!(back.server.port, 8080);
    }
}
