//! AudioAlchemy - stem enhancement and mixing pipeline
//!
//! Takes a set of uploaded stems through analysis, conditional per-stem
//! enhancement, multi-track mixing and loudness normalization. The DSP
//! itself is done by external processes (a spectral analyzer and ffmpeg);
//! this crate decides what to run, supervises it, and tracks each project's
//! status.
//!
//! # Architecture
//!
//! - `gateway`: spawns and supervises external processes
//! - `analysis`, `enhance`, `mix`, `loudness`: the pipeline stages
//! - `project`: records, the status state machine and the store
//! - `pipeline`: project-level operations tying the stages together

pub mod analysis;
pub mod cli;
pub mod config;
pub mod enhance;
pub mod error;
pub mod format;
pub mod gateway;
pub mod layout;
pub mod loudness;
pub mod mix;
pub mod pipeline;
pub mod project;

pub use config::PipelineConfig;
pub use error::{AlchemyError, Result};
pub use pipeline::{MixOutcome, Pipeline, StemUpload};
