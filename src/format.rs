//! Rendered output format
//!
//! Every render (enhancement, mix, normalization) produces 2-channel,
//! 48 kHz, 24-bit PCM WAV.

use std::path::Path;

use serde::{Deserialize, Serialize};

pub const OUTPUT_CHANNELS: u16 = 2;
pub const OUTPUT_SAMPLE_RATE: u32 = 48_000;
pub const OUTPUT_BITS: u16 = 24;
pub const OUTPUT_CODEC: &str = "pcm_s24le";

/// Descriptor reported alongside mixes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputFormat {
    pub container: String,
    pub sample_rate: u32,
    pub bit_depth: u16,
    pub channels: u16,
}

impl Default for OutputFormat {
    fn default() -> Self {
        Self {
            container: "wav".to_string(),
            sample_rate: OUTPUT_SAMPLE_RATE,
            bit_depth: OUTPUT_BITS,
            channels: OUTPUT_CHANNELS,
        }
    }
}

/// Codec arguments appended before the output path of every render.
pub fn output_format_args() -> Vec<String> {
    vec![
        "-ac".to_string(),
        OUTPUT_CHANNELS.to_string(),
        "-ar".to_string(),
        OUTPUT_SAMPLE_RATE.to_string(),
        "-c:a".to_string(),
        OUTPUT_CODEC.to_string(),
    ]
}

/// Read a WAV header and check it against the output format.
///
/// The error string describes what was found instead.
pub fn verify_wav(path: &Path) -> Result<(), String> {
    let reader = hound::WavReader::open(path).map_err(|e| format!("unreadable WAV: {}", e))?;
    let spec = reader.spec();
    if spec.channels == OUTPUT_CHANNELS
        && spec.sample_rate == OUTPUT_SAMPLE_RATE
        && spec.bits_per_sample == OUTPUT_BITS
        && spec.sample_format == hound::SampleFormat::Int
    {
        Ok(())
    } else {
        Err(format!(
            "{} ch / {} Hz / {}-bit {:?}",
            spec.channels, spec.sample_rate, spec.bits_per_sample, spec.sample_format
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::mock::write_silent_wav;
    use hound::{SampleFormat, WavSpec, WavWriter};

    #[test]
    fn test_accepts_output_format() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ok.wav");
        write_silent_wav(&path).unwrap();
        assert_eq!(verify_wav(&path), Ok(()));
    }

    #[test]
    fn test_rejects_mono_16_bit() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mono.wav");
        let spec = WavSpec {
            channels: 1,
            sample_rate: 44_100,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let mut writer = WavWriter::create(&path, spec).unwrap();
        writer.write_sample(0i16).unwrap();
        writer.finalize().unwrap();

        let err = verify_wav(&path).unwrap_err();
        assert!(err.starts_with("1 ch / 44100 Hz / 16-bit"), "got {}", err);
    }

    #[test]
    fn test_rejects_non_wav() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("junk.wav");
        std::fs::write(&path, b"junk").unwrap();
        assert!(verify_wav(&path).is_err());
    }
}
