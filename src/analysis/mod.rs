//! Analysis Engine
//!
//! Runs the external spectral analyzer against one file and parses the single
//! JSON document it prints. All-or-nothing: any process failure or schema
//! mismatch is an `AnalysisError`.

pub mod result;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::config::{CommandSpec, PipelineConfig};
use crate::error::AnalysisError;
use crate::gateway::{Invocation, ProcessRunner};

pub use result::{AnalysisResult, Band, Bands, Dynamics, Frequency, Issues, Rhythm, Stereo};

pub struct AnalysisEngine<R> {
    runner: Arc<R>,
    command: CommandSpec,
    timeout: Duration,
}

impl<R: ProcessRunner> AnalysisEngine<R> {
    pub fn new(runner: Arc<R>, command: CommandSpec, timeout: Duration) -> Self {
        Self {
            runner,
            command,
            timeout,
        }
    }

    pub fn from_config(runner: Arc<R>, config: &PipelineConfig) -> Self {
        Self::new(runner, config.analyzer.clone(), config.analysis_timeout())
    }

    /// Analyze one audio file.
    pub async fn analyze(&self, path: &Path) -> Result<AnalysisResult, AnalysisError> {
        let invocation = Invocation::new(self.command.program.clone(), self.timeout)
            .args(&self.command.args)
            .input(path);

        let output = self
            .runner
            .run(&invocation)
            .await
            .map_err(|e| AnalysisError::Process {
                path: path.to_path_buf(),
                source: e,
            })?;

        let document = output.stdout.trim();
        if document.is_empty() {
            return Err(AnalysisError::EmptyOutput {
                path: path.to_path_buf(),
            });
        }

        let result: AnalysisResult =
            serde_json::from_str(document).map_err(|e| AnalysisError::Parse {
                path: path.to_path_buf(),
                source: e,
            })?;

        debug!(
            path = %path.display(),
            issues = ?result.issues.raised(),
            crest_factor = result.dynamics.crest_factor,
            "Analysis complete"
        );

        Ok(result)
    }
}
