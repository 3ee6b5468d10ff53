//! TOML configuration file loading
//!
//! Supports `~/.config/vidya/config.toml` as a persistent config source.
//! All fields are optional; the file is a partial overlay on top of defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::Result;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct VidyaConfigFile {
    /// Backend connection settings
    #[serde(default)]
    pub backend: BackendFileConfig,

    /// Answer retrieval tuning
    #[serde(default)]
    pub retrieval: RetrievalFileConfig,

    /// Voice/audio configuration
    #[serde(default)]
    pub voice: VoiceFileConfig,
}

/// Backend connection settings
#[derive(Debug, Default, Deserialize)]
pub struct BackendFileConfig {
    /// Base URL of the backend API (e.g. "http://localhost:5000/api")
    pub api_url: Option<String>,

    /// Directory for persisted client state
    pub data_dir: Option<String>,
}

/// Retrieval tuning
#[derive(Debug, Default, Deserialize)]
pub struct RetrievalFileConfig {
    /// Minimum passage score considered relevant
    pub relevance_threshold: Option<f64>,

    /// Number of passages requested per search
    pub top_k: Option<usize>,
}

/// Voice processing configuration
#[derive(Debug, Default, Deserialize)]
pub struct VoiceFileConfig {
    /// Enable audio output
    pub enabled: Option<bool>,

    /// Playback rate multiplier
    pub speech_rate: Option<f32>,

    /// Peak amplitude below which a recording is rejected as too quiet
    pub min_amplitude: Option<f32>,

    /// Interval between capture buffer drains, in milliseconds
    pub chunk_interval_ms: Option<u64>,

    /// Speak status announcements as well as printing them
    pub announce_status: Option<bool>,
}

/// Load the TOML config file from the standard path
///
/// Returns `VidyaConfigFile::default()` if the file doesn't exist or can't be parsed.
pub fn load_config_file() -> VidyaConfigFile {
    config_file_path().map_or_else(VidyaConfigFile::default, |path| load_from(&path))
}

/// Load a config file from an explicit path, falling back to defaults
pub fn load_from(path: &Path) -> VidyaConfigFile {
    if !path.exists() {
        return VidyaConfigFile::default();
    }

    match read_config_file(path) {
        Ok(config) => {
            tracing::info!(path = %path.display(), "loaded config file");
            config
        }
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to load config file, using defaults"
            );
            VidyaConfigFile::default()
        }
    }
}

/// Read and parse a config file
///
/// # Errors
///
/// Returns [`crate::Error::Io`] if the file cannot be read or
/// [`crate::Error::Toml`] if it is not valid TOML for this schema
pub fn read_config_file(path: &Path) -> Result<VidyaConfigFile> {
    let content = std::fs::read_to_string(path)?;
    Ok(toml::from_str(&content)?)
}

/// Return the config file path: `~/.config/vidya/config.toml`
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("vidya").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    #[test]
    fn test_partial_file_parses() {
        let file: VidyaConfigFile = toml::from_str(
            r#"
            [retrieval]
            top_k = 5

            [voice]
            speech_rate = 1.5
            "#,
        )
        .unwrap();

        assert_eq!(file.retrieval.top_k, Some(5));
        assert!(file.retrieval.relevance_threshold.is_none());
        assert_eq!(file.voice.speech_rate, Some(1.5));
        assert!(file.backend.api_url.is_none());
    }

    #[test]
    fn test_malformed_file_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[voice\nspeech_rate = ").unwrap();

        assert!(matches!(read_config_file(&path), Err(Error::Toml(_))));

        let file = load_from(&path);
        assert!(file.voice.speech_rate.is_none());
    }

    #[test]
    fn test_missing_file_is_default() {
        let file = load_from(Path::new("/nonexistent/vidya/config.toml"));
        assert!(file.backend.api_url.is_none());
    }
}
