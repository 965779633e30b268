//! Sampling Module
//!
//! Windowed autoregressive sampling across levels:
//! - `window`: window start planning and the partial window
//! - `batch`: memory-bounded batch splitting
//! - `level`: sampling the windows of one level
//! - `orchestrator`: sequencing levels with exclusive accelerator residency
//! - `strategy`: ancestral, upsample and primed entry points

pub mod batch;
pub mod level;
pub mod orchestrator;
pub mod strategy;
pub mod window;

pub use batch::{group_ranges, map_in_groups, merge_batches, split_batch, Batched};
pub use level::{LevelReport, LevelSampler, WindowOutcome};
pub use orchestrator::{Collaborators, LevelOutcome, LevelState, Orchestrator};
pub use strategy::{ancestral_sample, batch_labels, primed_sample, upsample, SampleRun};
pub use window::{partial_window, window_starts, Window};
