//! Error handling for AudioAlchemy
//!
//! Stage-level errors are kept separate so each component can state exactly
//! what it may fail with; `AlchemyError` is what the pipeline surfaces upward.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::project::ProjectId;

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, AlchemyError>;

/// Failures reported by the external process gateway
#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("Failed to start '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Input file not found: {path}")]
    InputNotFound { path: PathBuf },

    #[error("'{program}' timed out after {timeout:?}")]
    TimedOut { program: String, timeout: Duration },

    #[error("'{program}' exited with {}", exit_label(.code))]
    ExitFailure {
        program: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("I/O error while supervising '{program}': {source}")]
    Io {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

fn exit_label(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("status {}", code),
        None => "a signal".to_string(),
    }
}

impl ProcessError {
    /// Captured diagnostic output, when the process got far enough to produce any
    pub fn diagnostic(&self) -> Option<&str> {
        match self {
            ProcessError::ExitFailure { stderr, .. } if !stderr.trim().is_empty() => {
                Some(stderr.as_str())
            }
            _ => None,
        }
    }
}

/// Analysis of a single file failed; there are no partial results
#[derive(Error, Debug)]
pub enum AnalysisError {
    #[error("Analyzer failed for {path}: {source}")]
    Process {
        path: PathBuf,
        #[source]
        source: ProcessError,
    },

    #[error("Analyzer output for {path} does not match the expected schema: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Analyzer produced no output for {path}")]
    EmptyOutput { path: PathBuf },
}

/// Mixing failed; no partial master is ever kept
#[derive(Error, Debug)]
pub enum MixError {
    #[error("No stems to mix")]
    NoStems,

    #[error("Stem input missing on disk: {path}")]
    MissingInput { path: PathBuf },

    #[error("Stem {index} ({path}) has no processed file: {reason}")]
    StemUnavailable {
        index: usize,
        path: PathBuf,
        reason: String,
    },

    #[error("Mix render failed: {0}")]
    Process(#[from] ProcessError),

    #[error("Mix render reported success but wrote no file at {path}")]
    NoOutput { path: PathBuf },

    #[error("Mix output {path} has unexpected format: {found}")]
    UnexpectedFormat { path: PathBuf, found: String },

    #[error("I/O error during mix: {0}")]
    Io(#[from] std::io::Error),
}

/// Loudness measurement or normalization failed
#[derive(Error, Debug)]
pub enum LoudnessError {
    #[error("Loudness process failed: {0}")]
    Process(#[from] ProcessError),

    #[error("Could not read {field} from loudness summary")]
    Unparseable { field: &'static str, output: String },

    #[error("Source is silent (integrated loudness at or below -70 LUFS); no gain can reach the target")]
    SilentSource,

    #[error("Normalized output {path} is not usable: {reason}")]
    BadOutput { path: PathBuf, reason: String },

    #[error("I/O error during normalization: {0}")]
    Io(#[from] std::io::Error),
}

/// Rejected project state transitions
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StateError {
    #[error("Cannot apply '{event}' while project is {from}")]
    InvalidTransition { from: String, event: &'static str },

    #[error("A project needs at least one stem before processing")]
    NoStems,

    #[error("Stems without a processed file: {missing:?}")]
    StemsNotProcessed { missing: Vec<usize> },

    #[error("Stem index {index} out of range (project has {len} stems)")]
    StemIndexOutOfRange { index: usize, len: usize },

    #[error("Project is already processing")]
    Busy,
}

/// Main error type surfaced by the pipeline
#[derive(Error, Debug)]
pub enum AlchemyError {
    #[error("Validation failed: {reason}")]
    Validation { reason: String },

    #[error("Project not found: {id}")]
    ProjectNotFound { id: ProjectId },

    #[error("Project {id} was changed by another process; reload and retry")]
    Conflict { id: ProjectId },

    #[error(transparent)]
    Process(#[from] ProcessError),

    #[error(transparent)]
    Analysis(#[from] AnalysisError),

    #[error(transparent)]
    Mix(#[from] MixError),

    #[error(transparent)]
    Loudness(#[from] LoudnessError),

    #[error(transparent)]
    State(#[from] StateError),

    #[error("File error at {path}: {source}")]
    File {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl AlchemyError {
    pub fn validation(reason: impl Into<String>) -> Self {
        AlchemyError::Validation {
            reason: reason.into(),
        }
    }

    /// Get the error code for this error type
    pub fn error_code(&self) -> &'static str {
        match self {
            AlchemyError::Validation { .. } => "VALIDATION_ERROR",
            AlchemyError::ProjectNotFound { .. } => "PROJECT_NOT_FOUND",
            AlchemyError::Conflict { .. } => "PROJECT_CONFLICT",
            AlchemyError::Process(ProcessError::TimedOut { .. }) => "PROCESS_TIMED_OUT",
            AlchemyError::Process(_) => "PROCESS_ERROR",
            AlchemyError::Analysis(_) => "ANALYSIS_ERROR",
            AlchemyError::Mix(_) => "MIX_ERROR",
            AlchemyError::Loudness(_) => "LOUDNESS_ERROR",
            AlchemyError::State(_) => "STATE_ERROR",
            AlchemyError::File { .. } | AlchemyError::Io(_) => "IO_ERROR",
            AlchemyError::Serialization(_) => "SERIALIZATION_ERROR",
        }
    }

    /// Whether retrying the same request can succeed without user changes
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            AlchemyError::Process(ProcessError::TimedOut { .. })
                | AlchemyError::Mix(MixError::Process(ProcessError::TimedOut { .. }))
                | AlchemyError::Loudness(LoudnessError::Process(ProcessError::TimedOut { .. }))
                | AlchemyError::State(StateError::Busy)
                | AlchemyError::Conflict { .. }
        )
    }

    /// Underlying process output worth keeping for support
    pub fn diagnostic(&self) -> Option<String> {
        let process = match self {
            AlchemyError::Process(e) => Some(e),
            AlchemyError::Analysis(AnalysisError::Process { source, .. }) => Some(source),
            AlchemyError::Mix(MixError::Process(e)) => Some(e),
            AlchemyError::Loudness(LoudnessError::Process(e)) => Some(e),
            _ => None,
        };
        match (process.and_then(ProcessError::diagnostic), self) {
            (Some(stderr), _) => Some(stderr.to_string()),
            (None, AlchemyError::Loudness(LoudnessError::Unparseable { output, .. })) => {
                Some(output.clone())
            }
            (None, AlchemyError::Mix(MixError::StemUnavailable { reason, .. })) => {
                Some(reason.clone())
            }
            _ => None,
        }
    }

    /// Get recovery suggestions for this error
    pub fn recovery_suggestions(&self) -> Vec<&'static str> {
        match self {
            AlchemyError::Validation { .. } => vec![
                "Target loudness must be between -23 and -14 LUFS",
                "Upload at least one stem before processing",
            ],
            AlchemyError::Process(ProcessError::Spawn { .. }) => vec![
                "Check that ffmpeg is installed and on PATH",
                "Set ALCHEMY_FFMPEG or ALCHEMY_ANALYZER to the right executable",
            ],
            AlchemyError::Mix(
                MixError::MissingInput { .. } | MixError::StemUnavailable { .. },
            ) => vec![
                "Re-process the project so every stem has a processed file",
                "Verify the processed/ directory has not been cleaned up",
            ],
            AlchemyError::Loudness(LoudnessError::SilentSource) => vec![
                "The master contains only silence; check the stem levels",
            ],
            AlchemyError::State(StateError::Busy) => {
                vec!["Wait for the running request on this project to finish"]
            }
            AlchemyError::Conflict { .. } => {
                vec!["Another command updated this project; run the request again"]
            }
            _ if self.is_recoverable() => vec![
                "Retry the request",
                "Raise the render timeout for long material",
            ],
            _ => vec![],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        let err = AlchemyError::validation("bad target");
        assert_eq!(err.error_code(), "VALIDATION_ERROR");

        let err = AlchemyError::from(ProcessError::TimedOut {
            program: "sleep".to_string(),
            timeout: Duration::from_millis(10),
        });
        assert_eq!(err.error_code(), "PROCESS_TIMED_OUT");
        assert!(err.is_recoverable());
    }

    #[test]
    fn test_diagnostic_from_mix_failure() {
        let err = AlchemyError::from(MixError::Process(ProcessError::ExitFailure {
            program: "ffmpeg".to_string(),
            code: Some(1),
            stderr: "Invalid data found when processing input".to_string(),
        }));
        assert_eq!(
            err.diagnostic().as_deref(),
            Some("Invalid data found when processing input")
        );
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_diagnostic_from_unavailable_stem() {
        let err = AlchemyError::from(MixError::StemUnavailable {
            index: 1,
            path: PathBuf::from("/stems/drums.wav"),
            reason: "No such file or directory".to_string(),
        });
        assert!(err.to_string().contains("/stems/drums.wav"));
        assert_eq!(err.diagnostic().as_deref(), Some("No such file or directory"));
    }

    #[test]
    fn test_exit_failure_display() {
        let err = ProcessError::ExitFailure {
            program: "analyzer".to_string(),
            code: None,
            stderr: String::new(),
        };
        assert_eq!(err.to_string(), "'analyzer' exited with a signal");
        assert!(err.diagnostic().is_none());
    }
}
