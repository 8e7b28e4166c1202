//! Filter Decision Engine
//!
//! Maps analysis metrics to an enhancement chain. Rules are evaluated in a
//! fixed order and each appends at most one filter; that order is the order
//! of the rendered graph.

use crate::analysis::AnalysisResult;

use super::filters::{
    CompressorParams, DenoiserParams, EqualizerParams, Filter, FilterChain, GateParams,
    PhaseCorrectParams, StereoToolParams,
};

/// Rule thresholds
pub mod thresholds {
    pub const LOW_MIDS_ENERGY: f64 = 3.0;
    pub const PRESENCE_ENERGY: f64 = 0.3;
    pub const CREST_FACTOR: f64 = 25.0;
    pub const PHASE_CORRELATION: f64 = 0.2;
    pub const WIDTH_RATIO: f64 = 2.5;
    pub const SPECTRAL_FLATNESS: f64 = 0.7;
    pub const TRANSIENT_DENSITY: f64 = 0.95;
    pub const MAX_DENOISE_STRENGTH: f64 = 0.2;
}

// Used when the analyzer reports a band without frequency information.
const LOW_MIDS_FALLBACK_HZ: f64 = 350.0;
const PRESENCE_FALLBACK_HZ: f64 = 3000.0;

/// Decide the enhancement chain for one stem. Pure and deterministic.
pub fn decide(analysis: &AnalysisResult) -> FilterChain {
    let mut chain = FilterChain::new();
    let bands = &analysis.frequency.bands;

    // 1. Low-mid mud
    if analysis.issues.muddy && bands.low_mids.energy > thresholds::LOW_MIDS_ENERGY {
        chain.push(Filter::Equalizer(EqualizerParams {
            frequency_hz: bands.low_mids.centroid_hz().unwrap_or(LOW_MIDS_FALLBACK_HZ),
            q: 2.0,
            gain_db: -0.75,
        }));
    }

    // 2. Presence harshness
    if analysis.issues.harsh && bands.presence.energy > thresholds::PRESENCE_ENERGY {
        chain.push(Filter::Equalizer(EqualizerParams {
            frequency_hz: bands.presence.peak_hz().unwrap_or(PRESENCE_FALLBACK_HZ),
            q: 1.5,
            gain_db: -1.0,
        }));
    }

    // 3. Peaky dynamics
    if analysis.dynamics.crest_factor > thresholds::CREST_FACTOR {
        chain.push(Filter::Compressor(CompressorParams::gentle()));
    }

    // 4. Phase cancellation
    if analysis.issues.phase_cancellation
        && analysis.stereo.correlation < thresholds::PHASE_CORRELATION
    {
        chain.push(Filter::PhaseCorrect(PhaseCorrectParams::default()));
    }

    // 5. Over-wide stereo image
    if analysis.issues.excessive_stereo_width
        && analysis.stereo.width_ratio > thresholds::WIDTH_RATIO
    {
        chain.push(Filter::StereoTool(StereoToolParams::narrowing()));
    }

    // 6. Noise floor
    let flatness = analysis.frequency.spectral_features.flatness;
    if flatness > thresholds::SPECTRAL_FLATNESS {
        chain.push(Filter::Denoiser(DenoiserParams {
            strength: flatness.min(thresholds::MAX_DENOISE_STRENGTH),
        }));
    }

    // 7. Dense transients
    if analysis.rhythm.transient_density > thresholds::TRANSIENT_DENSITY {
        chain.push(Filter::Gate(GateParams {
            attack_ms: 20.0,
            release_ms: 200.0,
            ratio: 1.2,
        }));
    }

    chain
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use test_case::test_case;

    fn everything_wrong() -> AnalysisResult {
        let mut a = AnalysisResult::neutral();
        a.issues.muddy = true;
        a.issues.harsh = true;
        a.issues.phase_cancellation = true;
        a.issues.excessive_stereo_width = true;
        a.frequency.bands.low_mids.energy = 4.2;
        a.frequency.bands.low_mids.centroid = Some(310.0);
        a.frequency.bands.presence.energy = 0.5;
        a.frequency.bands.presence.peak_freq = Some(3150.0);
        a.dynamics.crest_factor = 31.0;
        a.stereo.correlation = 0.05;
        a.stereo.width_ratio = 3.1;
        a.frequency.spectral_features.flatness = 0.82;
        a.rhythm.transient_density = 1.3;
        a
    }

    #[test]
    fn test_neutral_stem_copies_through() {
        assert!(decide(&AnalysisResult::neutral()).is_empty());
    }

    #[test]
    fn test_full_chain_in_rule_order() {
        let chain = decide(&everything_wrong());
        assert_eq!(
            chain.names(),
            vec![
                "equalizer",
                "equalizer",
                "acompressor",
                "aphaser",
                "stereotools",
                "anlmdn",
                "agate"
            ]
        );

        let filters: Vec<_> = chain.iter().cloned().collect();
        assert_eq!(
            filters[0],
            Filter::Equalizer(EqualizerParams {
                frequency_hz: 310.0,
                q: 2.0,
                gain_db: -0.75
            })
        );
        assert_eq!(
            filters[1],
            Filter::Equalizer(EqualizerParams {
                frequency_hz: 3150.0,
                q: 1.5,
                gain_db: -1.0
            })
        );
        assert_eq!(filters[5], Filter::Denoiser(DenoiserParams { strength: 0.2 }));
    }

    #[test]
    fn test_deterministic() {
        let input = everything_wrong();
        assert_eq!(decide(&input), decide(&input));
        assert_eq!(decide(&input).to_graph(), decide(&input.clone()).to_graph());
    }

    // Each rule needs both its flag and its metric
    #[test_case(|a: &mut AnalysisResult| { a.issues.muddy = true; } ; "muddy flag without energy")]
    #[test_case(|a: &mut AnalysisResult| { a.frequency.bands.low_mids.energy = 5.0; } ; "low mid energy without flag")]
    #[test_case(|a: &mut AnalysisResult| { a.issues.harsh = true; a.frequency.bands.presence.energy = 0.3; } ; "presence at threshold")]
    #[test_case(|a: &mut AnalysisResult| { a.dynamics.crest_factor = 25.0; } ; "crest factor at threshold")]
    #[test_case(|a: &mut AnalysisResult| { a.issues.phase_cancellation = true; a.stereo.correlation = 0.2; } ; "correlation at threshold")]
    #[test_case(|a: &mut AnalysisResult| { a.stereo.width_ratio = 4.0; } ; "wide without flag")]
    #[test_case(|a: &mut AnalysisResult| { a.frequency.spectral_features.flatness = 0.7; } ; "flatness at threshold")]
    #[test_case(|a: &mut AnalysisResult| { a.rhythm.transient_density = 0.95; } ; "transients at threshold")]
    fn test_rule_not_triggered(tweak: fn(&mut AnalysisResult)) {
        let mut analysis = AnalysisResult::neutral();
        tweak(&mut analysis);
        assert!(decide(&analysis).is_empty());
    }

    #[test_case(|a: &mut AnalysisResult| { a.dynamics.crest_factor = 25.5; }, "acompressor" ; "compressor")]
    #[test_case(|a: &mut AnalysisResult| { a.issues.phase_cancellation = true; a.stereo.correlation = 0.1; }, "aphaser" ; "phase")]
    #[test_case(|a: &mut AnalysisResult| { a.issues.excessive_stereo_width = true; a.stereo.width_ratio = 2.6; }, "stereotools" ; "width")]
    #[test_case(|a: &mut AnalysisResult| { a.frequency.spectral_features.flatness = 0.71; }, "anlmdn" ; "denoise")]
    #[test_case(|a: &mut AnalysisResult| { a.rhythm.transient_density = 0.96; }, "agate" ; "gate")]
    fn test_single_rule(tweak: fn(&mut AnalysisResult), expected: &str) {
        let mut analysis = AnalysisResult::neutral();
        tweak(&mut analysis);
        assert_eq!(decide(&analysis).names(), vec![expected]);
    }

    #[test]
    fn test_missing_band_frequency_uses_fallback() {
        let mut analysis = AnalysisResult::neutral();
        analysis.issues.muddy = true;
        analysis.frequency.bands.low_mids.energy = 3.5;
        analysis.frequency.bands.low_mids.centroid = None;
        analysis.frequency.bands.low_mids.peak_freq = None;

        let chain = decide(&analysis);
        assert_eq!(
            chain.to_graph().as_deref(),
            Some("equalizer=f=350:t=q:w=2:g=-0.75")
        );
    }
}
