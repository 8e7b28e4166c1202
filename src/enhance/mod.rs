//! Stem enhancement: decide a filter chain from analysis, then render it.

pub mod decision;
pub mod filters;
pub mod processor;

pub use decision::decide;
pub use filters::{
    CompressorParams, DenoiserParams, EqualizerParams, Filter, FilterChain, GateParams,
    PhaseCorrectParams, StereoToolParams,
};
pub use processor::{EnhancementOutcome, EnhancementProcessor};
