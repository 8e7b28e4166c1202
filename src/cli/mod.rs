//! CLI Module
//!
//! Command-line interface for the AudioAlchemy pipeline.

pub mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// AudioAlchemy - stem enhancement, mixing and loudness normalization
#[derive(Parser, Debug)]
#[command(name = "alchemy-cli")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// JSON configuration file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Root directory for stems, renders and project records
    #[arg(long, global = true)]
    pub root: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create the directory layout under the root
    Init,

    /// Analyze one file and print the metrics with the decided filter chain
    Analyze {
        /// Audio file to analyze
        file: PathBuf,
    },

    /// Analyze and enhance a single file
    Enhance {
        /// Audio file to enhance
        file: PathBuf,

        /// Destination for the enhanced file
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Create a project from stem files or directories and process it
    Create {
        /// Project name
        #[arg(short, long, default_value = "")]
        name: String,

        /// Mix style tag
        #[arg(short, long, default_value = "")]
        style: String,

        /// Stem files, or directories to scan for audio files
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },

    /// Print a project record
    Show {
        /// Project id
        id: String,
    },

    /// List every project
    List,

    /// Re-mix a project
    Mix {
        /// Project id
        id: String,

        /// Gain trim applied after summing, in dB
        #[arg(long, default_value_t = 0.0, allow_hyphen_values = true)]
        gain_db: f64,

        /// Skip the loudnorm stage after summing
        #[arg(long)]
        no_loudnorm: bool,
    },

    /// Normalize a project's master to a target loudness
    Normalize {
        /// Project id
        id: String,

        /// Target integrated loudness in LUFS (-23 to -14)
        #[arg(short, long, allow_hyphen_values = true)]
        target: f64,
    },

    /// Measure a project's master
    Measure {
        /// Project id
        id: String,
    },
}
