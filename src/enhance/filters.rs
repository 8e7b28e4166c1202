//! Enhancement filters and chains
//!
//! Each filter kind carries its own typed parameter record. A chain is
//! applied as one filter graph, stages joined in order (index 0 first).

use std::fmt;

use serde::{Deserialize, Serialize};

/// Peaking equalizer band.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EqualizerParams {
    pub frequency_hz: f64,
    /// Quality factor (bandwidth as Q).
    pub q: f64,
    pub gain_db: f64,
}

/// Downward compressor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompressorParams {
    pub threshold_db: f64,
    pub ratio: f64,
    pub attack_ms: f64,
    pub release_ms: f64,
    pub knee_db: f64,
}

impl CompressorParams {
    /// Slow attack/release with a wide knee, for taming peaky stems.
    pub fn gentle() -> Self {
        Self {
            threshold_db: -20.0,
            ratio: 2.0,
            attack_ms: 50.0,
            release_ms: 400.0,
            knee_db: 6.0,
        }
    }
}

/// Phase-correction stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseCorrectParams {
    pub in_gain: f64,
    pub out_gain: f64,
    pub delay_ms: f64,
    pub decay: f64,
    pub speed_hz: f64,
}

impl Default for PhaseCorrectParams {
    fn default() -> Self {
        Self {
            in_gain: 0.9,
            out_gain: 0.9,
            delay_ms: 1.0,
            decay: 0.2,
            speed_hz: 0.5,
        }
    }
}

/// Mid/side level adjustment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StereoToolParams {
    pub mid_level: f64,
    pub side_level: f64,
    pub balance: f64,
}

impl StereoToolParams {
    pub fn narrowing() -> Self {
        Self {
            mid_level: 1.0,
            side_level: 0.6,
            balance: 0.0,
        }
    }
}

/// Non-local-means denoiser.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DenoiserParams {
    pub strength: f64,
}

/// Noise gate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateParams {
    pub attack_ms: f64,
    pub release_ms: f64,
    pub ratio: f64,
}

/// One enhancement stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "filter", content = "options", rename_all = "snake_case")]
pub enum Filter {
    Equalizer(EqualizerParams),
    Compressor(CompressorParams),
    PhaseCorrect(PhaseCorrectParams),
    StereoTool(StereoToolParams),
    Denoiser(DenoiserParams),
    Gate(GateParams),
}

impl Filter {
    /// Name of the filter in the graph language.
    pub fn graph_name(&self) -> &'static str {
        match self {
            Filter::Equalizer(_) => "equalizer",
            Filter::Compressor(_) => "acompressor",
            Filter::PhaseCorrect(_) => "aphaser",
            Filter::StereoTool(_) => "stereotools",
            Filter::Denoiser(_) => "anlmdn",
            Filter::Gate(_) => "agate",
        }
    }

    /// Serialize as one filter-graph stage, e.g. `equalizer=f=312.5:t=q:w=2:g=-0.75`.
    pub fn to_graph(&self) -> String {
        let options = match self {
            Filter::Equalizer(p) => format!(
                "f={}:t=q:w={}:g={}",
                num(p.frequency_hz),
                num(p.q),
                num(p.gain_db)
            ),
            Filter::Compressor(p) => format!(
                "threshold={}dB:ratio={}:attack={}:release={}:knee={}",
                num(p.threshold_db),
                num(p.ratio),
                num(p.attack_ms),
                num(p.release_ms),
                num(p.knee_db)
            ),
            Filter::PhaseCorrect(p) => format!(
                "in_gain={}:out_gain={}:delay={}:decay={}:speed={}:type=t",
                num(p.in_gain),
                num(p.out_gain),
                num(p.delay_ms),
                num(p.decay),
                num(p.speed_hz)
            ),
            Filter::StereoTool(p) => format!(
                "mlev={}:slev={}:sbal={}",
                num(p.mid_level),
                num(p.side_level),
                num(p.balance)
            ),
            Filter::Denoiser(p) => format!("s={}", num(p.strength)),
            Filter::Gate(p) => format!(
                "attack={}:release={}:ratio={}",
                num(p.attack_ms),
                num(p.release_ms),
                num(p.ratio)
            ),
        };
        format!("{}={}", self.graph_name(), options)
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_graph())
    }
}

/// Fixed-precision number without trailing zeros.
pub(crate) fn num(value: f64) -> String {
    let s = format!("{:.3}", value);
    let s = s.trim_end_matches('0').trim_end_matches('.');
    if s == "-0" {
        "0".to_string()
    } else {
        s.to_string()
    }
}

/// Ordered enhancement chain. Empty means "copy through".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FilterChain {
    filters: Vec<Filter>,
}

impl FilterChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, filter: Filter) {
        self.filters.push(filter);
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Filter> {
        self.filters.iter()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.filters.iter().map(Filter::graph_name).collect()
    }

    /// Single filter-graph expression, `None` for an empty chain.
    pub fn to_graph(&self) -> Option<String> {
        if self.filters.is_empty() {
            return None;
        }
        Some(
            self.filters
                .iter()
                .map(Filter::to_graph)
                .collect::<Vec<_>>()
                .join(","),
        )
    }
}

impl From<Vec<Filter>> for FilterChain {
    fn from(filters: Vec<Filter>) -> Self {
        Self { filters }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_number_formatting() {
        assert_eq!(num(2.0), "2");
        assert_eq!(num(-0.75), "-0.75");
        assert_eq!(num(312.5), "312.5");
        assert_eq!(num(0.12345), "0.123");
        assert_eq!(num(-0.0001), "0");
    }

    #[test]
    fn test_equalizer_graph() {
        let eq = Filter::Equalizer(EqualizerParams {
            frequency_hz: 312.5,
            q: 2.0,
            gain_db: -0.75,
        });
        assert_eq!(eq.to_graph(), "equalizer=f=312.5:t=q:w=2:g=-0.75");
    }

    #[test]
    fn test_chain_joins_in_order() {
        let chain = FilterChain::from(vec![
            Filter::Gate(GateParams {
                attack_ms: 20.0,
                release_ms: 200.0,
                ratio: 1.2,
            }),
            Filter::Denoiser(DenoiserParams { strength: 0.2 }),
        ]);
        assert_eq!(
            chain.to_graph().unwrap(),
            "agate=attack=20:release=200:ratio=1.2,anlmdn=s=0.2"
        );
        assert_eq!(chain.names(), vec!["agate", "anlmdn"]);
    }

    #[test]
    fn test_empty_chain_has_no_graph() {
        assert_eq!(FilterChain::new().to_graph(), None);
    }

    #[test]
    fn test_serialized_shape() {
        let chain = FilterChain::from(vec![Filter::StereoTool(StereoToolParams::narrowing())]);
        let json = serde_json::to_value(&chain).unwrap();
        assert_eq!(
            json,
            serde_json::json!([
                {"filter": "stereo_tool", "options": {"mid_level": 1.0, "side_level": 0.6, "balance": 0.0}}
            ])
        );
    }
}
