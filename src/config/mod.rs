//! Configuration management for Vidya Assist
//!
//! Values are layered: built-in defaults, then the TOML file, then
//! environment variables. CLI flags are applied last by the binary.

pub mod file;

use std::path::PathBuf;

use crate::voice::{MAX_SPEECH_RATE, MIN_SPEECH_RATE};
use crate::{Error, Result};

use file::VidyaConfigFile;

/// Default backend API base URL
pub const DEFAULT_API_URL: &str = "http://localhost:5000/api";

/// Passages scoring at or below this are not considered relevant
pub const DEFAULT_RELEVANCE_THRESHOLD: f64 = 10.0;

/// Passages requested per search
pub const DEFAULT_TOP_K: usize = 3;

/// Client configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Backend API base URL (no trailing slash)
    pub api_base_url: String,

    /// Path to data directory (persisted credentials)
    pub data_dir: PathBuf,

    /// Score a passage must exceed to be used as context or cited
    pub relevance_threshold: f64,

    /// Number of passages requested per search
    pub top_k: usize,

    /// Voice configuration
    pub voice: VoiceConfig,
}

/// Voice processing configuration
#[derive(Debug, Clone)]
pub struct VoiceConfig {
    /// Enable audio output (a silent sink is used otherwise)
    pub enabled: bool,

    /// Playback rate multiplier (0.25 to 4.0)
    pub speech_rate: f32,

    /// Peak amplitude below which a recording is rejected
    pub min_amplitude: f32,

    /// Capture buffer drain interval in milliseconds
    pub chunk_interval_ms: u64,

    /// Speak status announcements
    pub announce_status: bool,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            speech_rate: 1.0,
            min_amplitude: 0.01,
            chunk_interval_ms: 100,
            announce_status: true,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_URL.to_string(),
            data_dir: default_data_dir(),
            relevance_threshold: DEFAULT_RELEVANCE_THRESHOLD,
            top_k: DEFAULT_TOP_K,
            voice: VoiceConfig::default(),
        }
    }
}

/// Return the data directory (`~/.local/share/vidya` on Linux)
pub fn default_data_dir() -> PathBuf {
    directories::ProjectDirs::from("dev", "vidya", "vidya")
        .map_or_else(|| PathBuf::from(".vidya"), |d| d.data_dir().to_path_buf())
}

impl Config {
    /// Load configuration from the config file and process environment
    ///
    /// # Errors
    ///
    /// Returns error if a configured value is invalid
    pub fn load() -> Result<Self> {
        Self::from_sources(file::load_config_file(), |key| std::env::var(key).ok())
    }

    /// Build configuration from a parsed file and an environment lookup
    ///
    /// # Errors
    ///
    /// Returns error if a configured value is invalid
    pub fn from_sources<F>(file: VidyaConfigFile, env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let api_base_url = env("VIDYA_API_URL")
            .or(file.backend.api_url)
            .unwrap_or(defaults.api_base_url);

        let data_dir = env("VIDYA_DATA_DIR")
            .or(file.backend.data_dir)
            .map_or(defaults.data_dir, PathBuf::from);

        let relevance_threshold = parse_env(&env, "VIDYA_RELEVANCE_THRESHOLD")?
            .or(file.retrieval.relevance_threshold)
            .unwrap_or(defaults.relevance_threshold);

        let top_k = parse_env(&env, "VIDYA_TOP_K")?
            .or(file.retrieval.top_k)
            .unwrap_or(defaults.top_k);

        let speech_rate = parse_env(&env, "VIDYA_SPEECH_RATE")?
            .or(file.voice.speech_rate)
            .unwrap_or(defaults.voice.speech_rate);

        let voice = VoiceConfig {
            enabled: file.voice.enabled.unwrap_or(defaults.voice.enabled),
            speech_rate: speech_rate.clamp(MIN_SPEECH_RATE, MAX_SPEECH_RATE),
            min_amplitude: file
                .voice
                .min_amplitude
                .unwrap_or(defaults.voice.min_amplitude),
            chunk_interval_ms: file
                .voice
                .chunk_interval_ms
                .unwrap_or(defaults.voice.chunk_interval_ms),
            announce_status: file
                .voice
                .announce_status
                .unwrap_or(defaults.voice.announce_status),
        };

        let config = Self {
            api_base_url: api_base_url.trim_end_matches('/').to_string(),
            data_dir,
            relevance_threshold,
            top_k,
            voice,
        };
        config.validate()?;

        Ok(config)
    }

    /// Check that configured values are usable
    ///
    /// # Errors
    ///
    /// Returns error describing the first invalid value
    pub fn validate(&self) -> Result<()> {
        let url = url::Url::parse(&self.api_base_url)
            .map_err(|e| Error::Config(format!("invalid api url '{}': {e}", self.api_base_url)))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(Error::Config(format!(
                "api url must be http or https, got '{}'",
                url.scheme()
            )));
        }

        if self.top_k == 0 {
            return Err(Error::Config("top_k must be at least 1".to_string()));
        }

        if self.voice.chunk_interval_ms == 0 {
            return Err(Error::Config(
                "voice.chunk_interval_ms must be positive".to_string(),
            ));
        }

        Ok(())
    }

    /// Path of the persisted credentials file
    #[must_use]
    pub fn credentials_path(&self) -> PathBuf {
        self.data_dir.join("credentials.json")
    }
}

/// Parse an optional environment value, rejecting malformed numbers
fn parse_env<T, F>(env: &F, key: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    env(key)
        .map(|raw| {
            raw.trim()
                .parse()
                .map_err(|_| Error::Config(format!("{key} has invalid value '{raw}'")))
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn env_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_sources(VidyaConfigFile::default(), env_from(&[])).unwrap();

        assert_eq!(config.api_base_url, DEFAULT_API_URL);
        assert!((config.relevance_threshold - 10.0).abs() < f64::EPSILON);
        assert_eq!(config.top_k, 3);
        assert!((config.voice.speech_rate - 1.0).abs() < f32::EPSILON);
        assert!(config.voice.announce_status);
    }

    #[test]
    fn test_env_overrides_file() {
        let mut file = VidyaConfigFile::default();
        file.backend.api_url = Some("http://file.example/api".to_string());
        file.retrieval.top_k = Some(7);

        let config = Config::from_sources(
            file,
            env_from(&[("VIDYA_API_URL", "https://env.example/api/"), ("VIDYA_RELEVANCE_THRESHOLD", "4.5")]),
        )
        .unwrap();

        assert_eq!(config.api_base_url, "https://env.example/api");
        assert_eq!(config.top_k, 7);
        assert!((config.relevance_threshold - 4.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_speech_rate_clamped() {
        let config =
            Config::from_sources(VidyaConfigFile::default(), env_from(&[("VIDYA_SPEECH_RATE", "9")]))
                .unwrap();
        assert!((config.voice.speech_rate - MAX_SPEECH_RATE).abs() < f32::EPSILON);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let bad_number =
            Config::from_sources(VidyaConfigFile::default(), env_from(&[("VIDYA_TOP_K", "many")]));
        assert!(matches!(bad_number, Err(Error::Config(_))));

        let bad_url =
            Config::from_sources(VidyaConfigFile::default(), env_from(&[("VIDYA_API_URL", "ftp://x")]));
        assert!(matches!(bad_url, Err(Error::Config(_))));

        let zero_k =
            Config::from_sources(VidyaConfigFile::default(), env_from(&[("VIDYA_TOP_K", "0")]));
        assert!(matches!(zero_k, Err(Error::Config(_))));
    }
}
