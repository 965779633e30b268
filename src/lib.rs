//! Cascade - Hierarchical Audio Code Sampling
//!
//! Cascade drives a stack of autoregressive priors, one per level of a
//! multi-level audio codec, to generate long code sequences that are decoded
//! back into audio.
//!
//! # Architecture
//!
//! Levels run from 0 (finest, closest to raw audio) to the top (coarsest):
//! - Each level is filled window by window; a window conditions on the tokens
//!   already present and only appends what is new
//! - Levels are sampled coarsest first, each conditioned on the level above
//! - Only one prior holds the accelerator at a time
//! - Every finished level is decoded, checkpointed and exported
//!
//! Runs start ancestrally (from nothing), from an encoded audio prompt, or by
//! upsampling existing top-level codes.

pub mod artifacts;
pub mod audio;
pub mod cli;
pub mod codes;
pub mod config;
pub mod error;
pub mod jobs;
pub mod prior;
pub mod sampling;

pub use codes::{Code, CodeBatch, CodeTable, LabelBatch, SampleMetadata};
pub use config::{RunConfig, SamplePlan, SamplingConfig, SamplingMode};
pub use error::{CascadeError, Result};
