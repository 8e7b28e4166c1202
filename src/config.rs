//! Pipeline configuration
//!
//! One explicit struct handed to every component constructor. Values come
//! from defaults, an optional JSON file, then `ALCHEMY_*` environment
//! overrides, in that order.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{AlchemyError, Result};

/// External command: program plus leading arguments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandSpec {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Parse a whitespace-separated command line (no quoting support).
    pub fn parse(line: &str) -> Option<Self> {
        let mut parts = line.split_whitespace();
        let program = parts.next()?;
        Some(Self::new(program).with_args(parts))
    }
}

/// Configuration shared by every stage of the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Root holding `stems/`, `processed/`, `mixed/` and `projects/`.
    pub root_dir: PathBuf,

    /// Codec / filter-graph executable.
    pub ffmpeg_path: String,

    /// Spectral analyzer; the audio path is appended as the last argument.
    pub analyzer: CommandSpec,

    pub analysis_timeout_secs: u64,

    /// Timeout for enhancement, mix and normalize renders.
    pub render_timeout_secs: u64,

    /// Upper bound on live external processes across all projects.
    pub max_concurrent_processes: usize,

    /// Add a -1 dBTP limiter after the normalization gain stage.
    pub true_peak_guard: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            root_dir: PathBuf::from("uploads"),
            ffmpeg_path: "ffmpeg".to_string(),
            analyzer: CommandSpec::new("python3").with_args(["scripts/audio_analyzer.py"]),
            analysis_timeout_secs: 30,
            render_timeout_secs: 300,
            max_concurrent_processes: default_parallelism(),
            true_peak_guard: false,
        }
    }
}

fn default_parallelism() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

impl PipelineConfig {
    /// Load configuration from an optional JSON file plus environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Read a JSON config file; missing fields keep their defaults.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| AlchemyError::File {
            path: path.to_path_buf(),
            source: e,
        })?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Apply `ALCHEMY_*` overrides through the given lookup.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(root) = lookup("ALCHEMY_ROOT") {
            self.root_dir = PathBuf::from(root);
        }
        if let Some(ffmpeg) = lookup("ALCHEMY_FFMPEG") {
            self.ffmpeg_path = ffmpeg;
        }
        if let Some(analyzer) = lookup("ALCHEMY_ANALYZER").and_then(|v| CommandSpec::parse(&v)) {
            self.analyzer = analyzer;
        }
        if let Some(max) = lookup("ALCHEMY_MAX_PROCESSES").and_then(|v| v.parse().ok()) {
            self.max_concurrent_processes = max;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent_processes == 0 {
            return Err(AlchemyError::validation(
                "max_concurrent_processes must be at least 1",
            ));
        }
        if self.analysis_timeout_secs == 0 || self.render_timeout_secs == 0 {
            return Err(AlchemyError::validation("timeouts must be non-zero"));
        }
        Ok(())
    }

    pub fn analysis_timeout(&self) -> Duration {
        Duration::from_secs(self.analysis_timeout_secs)
    }

    pub fn render_timeout(&self) -> Duration {
        Duration::from_secs(self.render_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::default();
        assert_eq!(config.analysis_timeout(), Duration::from_secs(30));
        assert!(config.render_timeout() > config.analysis_timeout());
        assert!(config.max_concurrent_processes >= 1);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("alchemy.json");
        fs::write(&path, r#"{ "ffmpeg_path": "/opt/ffmpeg/bin/ffmpeg", "render_timeout_secs": 900 }"#)
            .unwrap();

        let config = PipelineConfig::from_file(&path).unwrap();
        assert_eq!(config.ffmpeg_path, "/opt/ffmpeg/bin/ffmpeg");
        assert_eq!(config.render_timeout_secs, 900);
        assert_eq!(config.analysis_timeout_secs, 30);
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("ALCHEMY_ROOT", "/var/data/alchemy"),
            ("ALCHEMY_ANALYZER", "/usr/bin/analyze --json"),
            ("ALCHEMY_MAX_PROCESSES", "3"),
        ]
        .into_iter()
        .collect();

        let mut config = PipelineConfig::default();
        config.apply_env(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.root_dir, PathBuf::from("/var/data/alchemy"));
        assert_eq!(
            config.analyzer,
            CommandSpec::new("/usr/bin/analyze").with_args(["--json"])
        );
        assert_eq!(config.max_concurrent_processes, 3);
        assert_eq!(config.ffmpeg_path, "ffmpeg");
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        let config = PipelineConfig {
            max_concurrent_processes: 0,
            ..PipelineConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
