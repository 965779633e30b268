//! Jobs Module
//!
//! The outer layer that feeds queued requests to the sampler one at a time.

pub mod queue;
pub mod runner;

pub use queue::{DirectoryJobQueue, Job, JobParams, JobQueue, JobStatus};
pub use runner::{process_queue, run_config, run_request, QueueSummary, RunRequest};
