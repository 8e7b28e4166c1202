//! Loudness Service
//!
//! Measures integrated loudness, loudness range and true peak with an
//! `ebur128` pass, and normalizes a master by a uniform gain change rendered
//! to a new file. The source master is never overwritten.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::PipelineConfig;
use crate::enhance::filters::num;
use crate::error::{AlchemyError, LoudnessError, Result};
use crate::format::{output_format_args, verify_wav};
use crate::gateway::{Invocation, ProcessRunner};
use crate::layout::discard;

/// Accepted normalization targets, in LUFS.
pub const MIN_TARGET_LUFS: f64 = -23.0;
pub const MAX_TARGET_LUFS: f64 = -14.0;

/// Ceiling applied by the optional true-peak guard.
pub const TRUE_PEAK_CEILING_DB: f64 = -1.0;
/// `ebur128` reports an all-silent input at this floor rather than `-inf`.
pub const SILENCE_FLOOR_LUFS: f64 = -70.0;

/// EBU R128 summary of one file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Measurement {
    /// LUFS
    pub integrated_loudness: f64,
    /// LU
    pub loudness_range: f64,
    /// dBTP
    pub true_peak_max: f64,
}

/// Result of a normalization render.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizeOutcome {
    pub output: PathBuf,
    pub target_lufs: f64,
    /// Loudness of the source before the gain change.
    pub original_loudness: f64,
    /// Gain applied, in dB.
    pub adjusted_by: f64,
}

/// Reject targets outside the accepted range (NaN included).
pub fn validate_target(target_lufs: f64) -> Result<()> {
    if (MIN_TARGET_LUFS..=MAX_TARGET_LUFS).contains(&target_lufs) {
        Ok(())
    } else {
        Err(AlchemyError::validation(format!(
            "target loudness {} LUFS is outside [{}, {}]",
            target_lufs, MIN_TARGET_LUFS, MAX_TARGET_LUFS
        )))
    }
}

/// Parse the summary block `ebur128` prints on stderr.
pub fn parse_summary(output: &str) -> std::result::Result<Measurement, LoudnessError> {
    // Per-frame lines also carry "I:" and "LRA:"; only trust the summary.
    let section = output
        .rfind("Summary:")
        .map(|i| &output[i..])
        .unwrap_or(output);

    let field = |key: &'static str, name: &'static str| {
        section
            .lines()
            .filter_map(|line| line.trim().strip_prefix(key))
            .find_map(|rest| rest.split_whitespace().next()?.parse::<f64>().ok())
            .ok_or_else(|| LoudnessError::Unparseable {
                field: name,
                output: section.to_string(),
            })
    };

    Ok(Measurement {
        integrated_loudness: field("I:", "integrated loudness")?,
        loudness_range: field("LRA:", "loudness range")?,
        true_peak_max: field("Peak:", "true peak")?,
    })
}

pub struct LoudnessService<R> {
    runner: Arc<R>,
    ffmpeg: String,
    timeout: Duration,
    true_peak_guard: bool,
}

impl<R: ProcessRunner> LoudnessService<R> {
    pub fn new(runner: Arc<R>, ffmpeg: impl Into<String>, timeout: Duration) -> Self {
        Self {
            runner,
            ffmpeg: ffmpeg.into(),
            timeout,
            true_peak_guard: false,
        }
    }

    pub fn from_config(runner: Arc<R>, config: &PipelineConfig) -> Self {
        Self::new(runner, config.ffmpeg_path.clone(), config.render_timeout())
            .with_true_peak_guard(config.true_peak_guard)
    }

    pub fn with_true_peak_guard(mut self, enabled: bool) -> Self {
        self.true_peak_guard = enabled;
        self
    }

    /// Measure a file. Read-only.
    pub async fn measure(&self, path: &Path) -> std::result::Result<Measurement, LoudnessError> {
        let invocation = Invocation::new(self.ffmpeg.clone(), self.timeout)
            .args(["-hide_banner", "-nostdin", "-nostats", "-i"])
            .input(path)
            .args(["-af", "ebur128=peak=true", "-f", "null", "-"]);

        let output = self.runner.run(&invocation).await?;
        let measurement = parse_summary(&output.stderr)?;

        debug!(
            path = %path.display(),
            integrated = measurement.integrated_loudness,
            range = measurement.loudness_range,
            true_peak = measurement.true_peak_max,
            "Loudness measured"
        );
        Ok(measurement)
    }

    /// Render `source` at `target_lufs` into `dest`.
    pub async fn normalize(
        &self,
        source: &Path,
        dest: &Path,
        target_lufs: f64,
    ) -> Result<NormalizeOutcome> {
        validate_target(target_lufs)?;
        if source == dest {
            return Err(AlchemyError::validation(
                "normalization must render to a new file",
            ));
        }

        let measurement = self.measure(source).await?;
        let original = measurement.integrated_loudness;
        if !original.is_finite() || original <= SILENCE_FLOOR_LUFS {
            return Err(LoudnessError::SilentSource.into());
        }

        let adjusted_by = target_lufs - original;
        let mut graph = format!("volume={}dB", num(adjusted_by));
        if self.true_peak_guard {
            graph.push_str(&format!(
                ",alimiter=limit={}dB:level=0",
                num(TRUE_PEAK_CEILING_DB)
            ));
        }

        let invocation = Invocation::new(self.ffmpeg.clone(), self.timeout)
            .args(["-hide_banner", "-nostdin", "-y", "-i"])
            .input(source)
            .args(["-af", graph.as_str()])
            .args(output_format_args())
            .output(dest);

        info!(
            source = %source.display(),
            original_lufs = original,
            target_lufs,
            adjusted_by,
            "Normalizing loudness"
        );

        if let Err(e) = self.runner.run(&invocation).await {
            warn!(error = %e, "Normalization render failed");
            discard(dest).await;
            return Err(LoudnessError::Process(e).into());
        }

        let path = dest.to_path_buf();
        let verified = tokio::task::spawn_blocking(move || verify_wav(&path))
            .await
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))?;
        if let Err(reason) = verified {
            discard(dest).await;
            return Err(LoudnessError::BadOutput {
                path: dest.to_path_buf(),
                reason,
            }
            .into());
        }

        Ok(NormalizeOutcome {
            output: dest.to_path_buf(),
            target_lufs,
            original_loudness: original,
            adjusted_by,
        })
    }
}
