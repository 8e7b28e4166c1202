//! Analyzer output schema
//!
//! Mirrors the JSON document the spectral analyzer prints on stdout. Fields
//! the decision rules depend on are required; descriptive extras default.

use serde::{Deserialize, Serialize};

/// Complete per-file analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub issues: Issues,
    pub frequency: Frequency,
    pub dynamics: Dynamics,
    pub stereo: Stereo,
    pub rhythm: Rhythm,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub info: Option<FileInfo>,
}

/// Boolean issue flags raised by the analyzer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Issues {
    pub muddy: bool,
    pub harsh: bool,
    pub phase_cancellation: bool,
    pub excessive_stereo_width: bool,
    #[serde(default)]
    pub clipping: bool,
}

impl Issues {
    /// Names of the raised flags, in a stable order.
    pub fn raised(&self) -> Vec<&'static str> {
        [
            (self.muddy, "muddy"),
            (self.harsh, "harsh"),
            (self.phase_cancellation, "phaseCancellation"),
            (self.excessive_stereo_width, "excessiveStereoWidth"),
            (self.clipping, "clipping"),
        ]
        .into_iter()
        .filter_map(|(set, name)| set.then_some(name))
        .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Frequency {
    pub bands: Bands,
    pub spectral_features: SpectralFeatures,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bands {
    pub low_mids: Band,
    pub presence: Band,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub: Option<Band>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bass: Option<Band>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mids: Option<Band>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub highs: Option<Band>,
}

/// Energy and characteristic frequencies of one band.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Band {
    pub energy: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub centroid: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub peak_freq: Option<f64>,
}

impl Band {
    pub fn new(energy: f64, frequency: f64) -> Self {
        Self {
            energy,
            centroid: Some(frequency),
            peak_freq: Some(frequency),
        }
    }

    /// Centroid, falling back to the peak frequency.
    pub fn centroid_hz(&self) -> Option<f64> {
        self.centroid.or(self.peak_freq)
    }

    /// Peak frequency, falling back to the centroid.
    pub fn peak_hz(&self) -> Option<f64> {
        self.peak_freq.or(self.centroid)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpectralFeatures {
    pub flatness: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub centroid: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Dynamics {
    pub crest_factor: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub peak_level: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rms_level: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stereo {
    pub correlation: f64,
    pub width_ratio: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rhythm {
    pub transient_density: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tempo: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileInfo {
    pub duration: f64,
    pub sample_rate: u32,
    pub channels: u16,
}

impl AnalysisResult {
    /// A clean, unremarkable stem: no rule fires for it.
    pub fn neutral() -> Self {
        Self {
            issues: Issues::default(),
            frequency: Frequency {
                bands: Bands {
                    low_mids: Band::new(1.0, 350.0),
                    presence: Band::new(0.1, 3000.0),
                    sub: None,
                    bass: None,
                    mids: None,
                    highs: None,
                },
                spectral_features: SpectralFeatures {
                    flatness: 0.1,
                    centroid: None,
                },
            },
            dynamics: Dynamics {
                crest_factor: 10.0,
                peak_level: None,
                rms_level: None,
            },
            stereo: Stereo {
                correlation: 0.9,
                width_ratio: 1.0,
            },
            rhythm: Rhythm {
                transient_density: 0.5,
                tempo: None,
            },
            info: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_analyzer_document() {
        let json = r#"{
            "issues": {"muddy": true, "harsh": false, "phaseCancellation": false,
                       "excessiveStereoWidth": true, "clipping": false},
            "frequency": {
                "bands": {
                    "sub": {"energy": 0.5, "peak_freq": 41.0},
                    "lowMids": {"energy": 3.4, "peak_freq": 312.5},
                    "mids": {"energy": 1.2, "peak_freq": 1000.0},
                    "presence": {"energy": 0.2, "peak_freq": 2890.0}
                },
                "spectralFeatures": {"flatness": 0.05, "centroid": 1800.0}
            },
            "dynamics": {"crestFactor": 12.5, "peakLevel": 0.9, "rmsLevel": 0.07},
            "stereo": {"correlation": 0.6, "width_ratio": 2.8},
            "rhythm": {"tempo": 120.0, "transientDensity": 1.4},
            "info": {"duration": 12.0, "sampleRate": 44100, "channels": 2}
        }"#;

        let result: AnalysisResult = serde_json::from_str(json).unwrap();
        assert!(result.issues.muddy);
        assert_eq!(result.frequency.bands.low_mids.centroid_hz(), Some(312.5));
        assert_eq!(result.stereo.width_ratio, 2.8);
        assert_eq!(result.info.unwrap().sample_rate, 44100);
        assert_eq!(
            result.issues.raised(),
            vec!["muddy", "excessiveStereoWidth"]
        );
    }

    #[test]
    fn test_missing_required_field_is_rejected() {
        let json = r#"{"issues": {"muddy": false, "harsh": false,
                       "phaseCancellation": false, "excessiveStereoWidth": false}}"#;
        assert!(serde_json::from_str::<AnalysisResult>(json).is_err());
    }

    #[test]
    fn test_centroid_preferred_over_peak() {
        let band = Band {
            energy: 1.0,
            centroid: Some(280.0),
            peak_freq: Some(400.0),
        };
        assert_eq!(band.centroid_hz(), Some(280.0));
        assert_eq!(band.peak_hz(), Some(400.0));
    }
}
