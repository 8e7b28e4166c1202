//! Mixer
//!
//! Sums N processed stems into one master through a single `amix` graph.
//! The master lasts as long as the longest stem; shorter stems fall silent
//! after their end. The sum is leveled with `loudnorm` (-23 LUFS integrated,
//! -1 dBTP) unless the request turns it off. All-or-nothing: any
//! precondition or render failure removes the partial output and returns a
//! `MixError`.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::PipelineConfig;
use crate::enhance::filters::num;
use crate::error::MixError;
use crate::format::{output_format_args, verify_wav, OutputFormat};
use crate::gateway::{Invocation, ProcessRunner};
use crate::layout::discard;

/// One mixer input.
#[derive(Debug, Clone, PartialEq)]
pub struct MixInput {
    pub path: PathBuf,
    /// Linear gain applied before summing.
    pub volume: f64,
}

impl MixInput {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            volume: 1.0,
        }
    }

    pub fn with_volume(mut self, volume: f64) -> Self {
        self.volume = volume;
        self
    }
}

/// Integrated loudness the summed signal is leveled to before the gain trim.
pub const MIX_LOUDNORM: &str = "loudnorm=I=-23:TP=-1:LRA=11";

/// Per-request mix settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MixOptions {
    /// Gain trim applied to the summed signal, in dB.
    pub gain_db: f64,
    /// Level the summed signal with `loudnorm` before the trim.
    pub loudnorm: bool,
}

impl Default for MixOptions {
    fn default() -> Self {
        Self {
            gain_db: 0.0,
            loudnorm: true,
        }
    }
}

impl MixOptions {
    pub fn with_gain_db(mut self, gain_db: f64) -> Self {
        self.gain_db = gain_db;
        self
    }

    pub fn without_loudnorm(mut self) -> Self {
        self.loudnorm = false;
        self
    }
}

/// Result of a successful mix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MixReport {
    pub output: PathBuf,
    pub inputs: usize,
    pub method: String,
    pub filter_graph: String,
    pub format: OutputFormat,
}

/// Build the `-filter_complex` expression for the given inputs.
pub fn build_graph(inputs: &[MixInput], options: &MixOptions) -> String {
    let n = inputs.len();
    let volumes = inputs
        .iter()
        .enumerate()
        .map(|(i, input)| format!("[{}:a]volume={}[v{}]", i, num(input.volume), i))
        .collect::<Vec<_>>()
        .join(";");
    let labels: String = (0..n).map(|i| format!("[v{}]", i)).collect();

    let (leveled, summed) = if options.loudnorm {
        (format!(";[mixed]{}[normalized]", MIX_LOUDNORM), "normalized")
    } else {
        (String::new(), "mixed")
    };
    let tail = if options.gain_db != 0.0 {
        format!("[{}]volume={}dB[aout]", summed, num(options.gain_db))
    } else {
        format!("[{}]acopy[aout]", summed)
    };

    format!(
        "{};{}amix=inputs={}:duration=longest:dropout_transition=0[mixed]{};{}",
        volumes, labels, n, leveled, tail
    )
}

pub struct Mixer<R> {
    runner: Arc<R>,
    ffmpeg: String,
    timeout: Duration,
}

impl<R: ProcessRunner> Mixer<R> {
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

    /// Mix `inputs` into a new master at `dest`.
    pub async fn mix(
        &self,
        inputs: &[MixInput],
        dest: &Path,
        options: &MixOptions,
    ) -> Result<MixReport, MixError> {
        if inputs.is_empty() {
            return Err(MixError::NoStems);
        }
        for input in inputs {
            let present = !input.path.as_os_str().is_empty()
                && tokio::fs::try_exists(&input.path).await.unwrap_or(false);
            if !present {
                return Err(MixError::MissingInput {
                    path: input.path.clone(),
                });
            }
        }

        let graph = build_graph(inputs, options);
        let mut invocation = Invocation::new(self.ffmpeg.clone(), self.timeout)
            .args(["-hide_banner", "-nostdin", "-y"]);
        for input in inputs {
            invocation = invocation.arg("-i").input(&input.path);
        }
        let invocation = invocation
            .args(["-filter_complex", graph.as_str(), "-map", "[aout]"])
            .args(output_format_args())
            .output(dest);

        info!(inputs = inputs.len(), dest = %dest.display(), "Mixing stems");
        debug!(graph = %graph, "Mix filter graph");

        if let Err(e) = self.runner.run(&invocation).await {
            warn!(error = %e, "Mix render failed");
            discard(dest).await;
            return Err(MixError::Process(e));
        }

        if !tokio::fs::try_exists(dest).await.unwrap_or(false) {
            return Err(MixError::NoOutput {
                path: dest.to_path_buf(),
            });
        }

        let path = dest.to_path_buf();
        let verified = tokio::task::spawn_blocking(move || verify_wav(&path))
            .await
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))?;
        if let Err(found) = verified {
            discard(dest).await;
            return Err(MixError::UnexpectedFormat {
                path: dest.to_path_buf(),
                found,
            });
        }

        info!(dest = %dest.display(), "Mix complete");

        Ok(MixReport {
            output: dest.to_path_buf(),
            inputs: inputs.len(),
            method: "complex filter graph".to_string(),
            filter_graph: graph,
            format: OutputFormat::default(),
        })
    }
}
