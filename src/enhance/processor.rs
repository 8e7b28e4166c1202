//! Enhancement Processor
//!
//! Applies a decided chain to one stem. The destination always starts as a
//! verbatim copy of the source; a non-empty chain is rendered to a sibling
//! scratch file and only moved over the copy once the render succeeds. A
//! failed render logs a warning and leaves the copy in place.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::config::PipelineConfig;
use crate::error::{AlchemyError, Result};
use crate::format::output_format_args;
use crate::gateway::{Invocation, ProcessRunner};
use crate::layout::file_digest;

use super::filters::FilterChain;

/// What happened to one stem.
#[derive(Debug, Clone)]
pub struct EnhancementOutcome {
    pub output: PathBuf,
    /// Filters actually rendered; empty when copied through or fallen back.
    pub applied: FilterChain,
    pub fell_back: bool,
    pub failure: Option<String>,
    pub output_sha256: String,
}

pub struct EnhancementProcessor<R> {
    runner: Arc<R>,
    ffmpeg: String,
    timeout: Duration,
}

impl<R: ProcessRunner> EnhancementProcessor<R> {
    pub fn new(runner: Arc<R>, ffmpeg: impl Into<String>, timeout: Duration) -> Self {
        Self {
            runner,
            ffmpeg: ffmpeg.into(),
            timeout,
        }
    }

    pub fn from_config(runner: Arc<R>, config: &PipelineConfig) -> Self {
        Self::new(runner, config.ffmpeg_path.clone(), config.render_timeout())
    }

    /// Enhance `input` into `dest`.
    ///
    /// Only fails when the identity copy itself cannot be made; render
    /// failures are absorbed.
    pub async fn enhance(
        &self,
        input: &Path,
        chain: &FilterChain,
        dest: &Path,
    ) -> Result<EnhancementOutcome> {
        tokio::fs::copy(input, dest)
            .await
            .map_err(|e| AlchemyError::File {
                path: input.to_path_buf(),
                source: e,
            })?;

        let Some(graph) = chain.to_graph() else {
            debug!(input = %input.display(), "No enhancement needed, copied through");
            return self.outcome(dest, FilterChain::new(), None).await;
        };

        let scratch = scratch_path(dest);
        let invocation = self.render_invocation(input, &graph, &scratch);
        debug!(input = %input.display(), graph = %graph, "Rendering enhancement");

        let failure = match self.runner.run(&invocation).await {
            Ok(_) => match tokio::fs::rename(&scratch, dest).await {
                Ok(()) => None,
                Err(e) => Some(format!("could not move render into place: {}", e)),
            },
            Err(e) => Some(e.to_string()),
        };

        match failure {
            None => {
                info!(
                    input = %input.display(),
                    filters = ?chain.names(),
                    "Stem enhanced"
                );
                self.outcome(dest, chain.clone(), None).await
            }
            Some(reason) => {
                warn!(
                    input = %input.display(),
                    reason = %reason,
                    "Enhancement failed, keeping unprocessed copy"
                );
                let _ = tokio::fs::remove_file(&scratch).await;
                self.outcome(dest, FilterChain::new(), Some(reason)).await
            }
        }
    }

    fn render_invocation(&self, input: &Path, graph: &str, output: &Path) -> Invocation {
        Invocation::new(self.ffmpeg.clone(), self.timeout)
            .args(["-hide_banner", "-nostdin", "-y", "-i"])
            .input(input)
            .args(["-af", graph])
            .args(output_format_args())
            .output(output)
    }

    async fn outcome(
        &self,
        dest: &Path,
        applied: FilterChain,
        failure: Option<String>,
    ) -> Result<EnhancementOutcome> {
        let path = dest.to_path_buf();
        let digest = tokio::task::spawn_blocking(move || file_digest(&path))
            .await
            .map_err(|e| {
                AlchemyError::Io(std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))
            })?
            .map_err(|e| AlchemyError::File {
                path: dest.to_path_buf(),
                source: e,
            })?;

        Ok(EnhancementOutcome {
            output: dest.to_path_buf(),
            applied,
            fell_back: failure.is_some(),
            failure,
            output_sha256: digest,
        })
    }
}

fn scratch_path(dest: &Path) -> PathBuf {
    let name = dest
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    dest.with_file_name(format!(".{}.render.wav", name))
}
