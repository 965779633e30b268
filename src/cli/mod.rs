//! CLI Module
//!
//! Command-line interface for the cascade sampler.

pub mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Cascade - hierarchical audio code sampler
#[derive(Parser, Debug)]
#[command(name = "cascade")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run one sampling job from a JSON config
    #[command(name = "sample")]
    Sample {
        /// Run configuration (JSON)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Override the sampling mode (ancestral, primed, upsample)
        #[arg(short, long)]
        mode: Option<String>,

        /// Comma-separated prompt files for primed sampling
        #[arg(long)]
        audio_file: Option<String>,

        /// Checkpoint bundle to upsample from
        #[arg(long)]
        codes_file: Option<PathBuf>,

        /// Root directory for run artifacts
        #[arg(short, long)]
        output_dir: Option<PathBuf>,

        #[arg(long, default_value = "unknown")]
        artist: String,

        #[arg(long, default_value = "unknown")]
        genre: String,

        #[arg(long, default_value = "")]
        lyrics: String,
    },

    /// Print the windows a level would be sampled with
    #[command(name = "plan")]
    Plan {
        /// Tokens at the level
        #[arg(long)]
        total_length: usize,

        /// Context length of the level's prior
        #[arg(long)]
        n_ctx: usize,

        #[arg(long, default_value_t = 0.5)]
        hop_fraction: f32,
    },

    /// List the checkpoints of a run directory
    #[command(name = "inspect")]
    Inspect {
        /// Run directory (`<output_dir>/<job_id>_<name>`)
        path: PathBuf,
    },

    /// Queue a job
    #[command(name = "submit")]
    Submit {
        /// Queue directory
        #[arg(short, long)]
        queue: PathBuf,

        #[arg(long)]
        artist: String,

        #[arg(long)]
        genre: String,

        #[arg(long, default_value = "")]
        lyrics: String,

        /// Length in seconds
        #[arg(long, default_value_t = 20.0)]
        length: f64,

        #[arg(long, default_value = "5b_lyrics")]
        model: String,

        #[arg(long, default_value = "sample")]
        name: String,
    },

    /// Process queued jobs until the queue is empty
    #[command(name = "serve")]
    Serve {
        /// Queue directory
        #[arg(short, long)]
        queue: PathBuf,

        /// Base run configuration (JSON)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Root directory for run artifacts
        #[arg(short, long)]
        output_dir: Option<PathBuf>,
    },
}
