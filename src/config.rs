use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{PortabookError, Result};

/// Environment variable overriding the transcoder binary
pub const ENV_TRANSCODER_BIN: &str = "PORTABOOK_FFMPEG_BIN";
/// Environment variable overriding the diagnostic tool binary
pub const ENV_DIAGNOSTIC_BIN: &str = "PORTABOOK_MKVINFO_BIN";
/// Environment variable overriding the dashcam source extension
pub const ENV_DASHCAM_EXTENSION: &str = "PORTABOOK_DASHCAM_FILE_EXT";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub tools: ToolsConfig,
    pub audiobook: AudiobookConfig,
    pub dashcam: DashcamConfig,
    pub pipeline: PipelineConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    /// Path to the transcoder binary (ffmpeg)
    pub transcoder_path: String,
    /// Path to the container diagnostic binary (mkvinfo)
    pub diagnostic_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudiobookConfig {
    /// Extension of encrypted source files, matched case-insensitively
    pub source_extension: String,
    /// Bitrate of the per-chapter mp3 files
    pub audio_bitrate: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DashcamConfig {
    /// Extension of dashcam clips, matched case-insensitively
    pub source_extension: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Number of source files processed at once. 1 keeps the batch strictly sequential.
    pub concurrency: usize,
    /// Kill any external process running longer than this
    pub process_timeout_secs: Option<u64>,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            transcoder_path: "ffmpeg".to_string(),
            diagnostic_path: "mkvinfo".to_string(),
        }
    }
}

impl Default for AudiobookConfig {
    fn default() -> Self {
        Self {
            source_extension: ".aax".to_string(),
            audio_bitrate: "128k".to_string(),
        }
    }
}

impl Default for DashcamConfig {
    fn default() -> Self {
        Self {
            source_extension: ".mov".to_string(),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            concurrency: 1,
            process_timeout_secs: None,
        }
    }
}

impl PipelineConfig {
    pub fn process_timeout(&self) -> Option<Duration> {
        self.process_timeout_secs.map(Duration::from_secs)
    }
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| PortabookError::Config(format!("Failed to read config file: {}", e)))?;

        Ok(toml::from_str(&content)?)
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)?;

        std::fs::write(path, content)
            .map_err(|e| PortabookError::Config(format!("Failed to write config file: {}", e)))?;

        Ok(())
    }

    /// Apply overrides from the process environment
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    /// Apply overrides from an arbitrary variable lookup. Empty values are ignored.
    pub fn apply_overrides_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let lookup = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        if let Some(path) = lookup(ENV_TRANSCODER_BIN) {
            self.tools.transcoder_path = path;
        }
        if let Some(path) = lookup(ENV_DIAGNOSTIC_BIN) {
            self.tools.diagnostic_path = path;
        }
        if let Some(extension) = lookup(ENV_DASHCAM_EXTENSION) {
            self.dashcam.source_extension = extension.to_lowercase();
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.tools.transcoder_path.trim().is_empty() {
            return Err(PortabookError::Validation(
                "tools.transcoder_path must not be empty".to_string(),
            ));
        }
        if self.tools.diagnostic_path.trim().is_empty() {
            return Err(PortabookError::Validation(
                "tools.diagnostic_path must not be empty".to_string(),
            ));
        }
        for (key, extension) in [
            ("audiobook.source_extension", &self.audiobook.source_extension),
            ("dashcam.source_extension", &self.dashcam.source_extension),
        ] {
            if extension.len() < 2 || !extension.starts_with('.') {
                return Err(PortabookError::Validation(format!(
                    "{} must look like \".ext\", got {:?}",
                    key, extension
                )));
            }
        }
        if self.audiobook.audio_bitrate.trim().is_empty() {
            return Err(PortabookError::Validation(
                "audiobook.audio_bitrate must not be empty".to_string(),
            ));
        }
        if self.pipeline.concurrency == 0 {
            return Err(PortabookError::Validation(
                "pipeline.concurrency must be at least 1".to_string(),
            ));
        }
        if self.pipeline.process_timeout_secs == Some(0) {
            return Err(PortabookError::Validation(
                "pipeline.process_timeout_secs must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.tools.transcoder_path, "ffmpeg");
        assert_eq!(config.tools.diagnostic_path, "mkvinfo");
        assert_eq!(config.audiobook.source_extension, ".aax");
        assert_eq!(config.audiobook.audio_bitrate, "128k");
        assert_eq!(config.dashcam.source_extension, ".mov");
        assert_eq!(config.pipeline.concurrency, 1);
        assert!(config.pipeline.process_timeout().is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_falls_back_to_defaults() {
        let config: Config = toml::from_str(
            r#"
            [tools]
            transcoder_path = "/opt/ffmpeg/bin/ffmpeg"

            [pipeline]
            process_timeout_secs = 600
            "#,
        )
        .unwrap();

        assert_eq!(config.tools.transcoder_path, "/opt/ffmpeg/bin/ffmpeg");
        assert_eq!(config.tools.diagnostic_path, "mkvinfo");
        assert_eq!(config.pipeline.concurrency, 1);
        assert_eq!(config.pipeline.process_timeout(), Some(Duration::from_secs(600)));
    }

    #[test]
    fn test_save_and_load_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("portabook.toml");

        let mut config = Config::default();
        config.pipeline.concurrency = 2;
        config.save_to_file(&path).unwrap();

        let loaded = Config::from_file(&path).unwrap();
        assert_eq!(loaded.pipeline.concurrency, 2);
        assert_eq!(loaded.tools.transcoder_path, "ffmpeg");
    }

    #[test]
    fn test_load_missing_file_is_config_error() {
        let err = Config::from_file("/nonexistent/portabook.toml").unwrap_err();
        assert!(matches!(err, PortabookError::Config(_)));
    }

    #[test]
    fn test_load_malformed_file_is_toml_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("portabook.toml");
        std::fs::write(&path, "[pipeline]\nconcurrency = \"many\"\n").unwrap();

        let err = Config::from_file(&path).unwrap_err();
        assert!(matches!(err, PortabookError::Toml(_)));
        assert!(err.to_string().starts_with("TOML parsing error"));
    }

    #[test]
    fn test_overrides() {
        let vars: HashMap<&str, &str> = HashMap::from([
            (ENV_TRANSCODER_BIN, "/usr/local/bin/ffmpeg"),
            (ENV_DIAGNOSTIC_BIN, ""),
            (ENV_DASHCAM_EXTENSION, ".MP4"),
        ]);

        let mut config = Config::default();
        config.apply_overrides_from(|key| vars.get(key).map(|v| v.to_string()));

        assert_eq!(config.tools.transcoder_path, "/usr/local/bin/ffmpeg");
        assert_eq!(config.tools.diagnostic_path, "mkvinfo");
        assert_eq!(config.dashcam.source_extension, ".mp4");
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = Config::default();
        config.pipeline.concurrency = 0;
        assert!(matches!(config.validate(), Err(PortabookError::Validation(_))));

        let mut config = Config::default();
        config.audiobook.source_extension = "aax".to_string();
        assert!(matches!(config.validate(), Err(PortabookError::Validation(_))));

        let mut config = Config::default();
        config.tools.diagnostic_path = " ".to_string();
        assert!(matches!(config.validate(), Err(PortabookError::Validation(_))));
    }
}
