//! Running requests
//!
//! `run_request` turns one request into checkpoint artifacts and touches no
//! shared state. `process_queue` is the outer loop that polls a `JobQueue`,
//! locks and tracks each job, and calls `run_request` once per job.

use log::{debug, info, warn};
use serde::Serialize;

use crate::artifacts::DirectoryCheckpointStore;
use crate::audio::load_prompts;
use crate::codes::SampleMetadata;
use crate::config::{ModelPreset, RunConfig, SamplingMode};
use crate::error::{CascadeError, Result};
use crate::jobs::queue::{Job, JobQueue, JobStatus};
use crate::prior::Prior;
use crate::sampling::{ancestral_sample, batch_labels, primed_sample, upsample, Collaborators, SampleRun};

/// One request to generate music
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunRequest {
    pub job_id: String,
    pub name: String,
    pub artist: String,
    pub genre: String,
    pub lyrics: String,
    /// Song length in seconds
    pub length: f64,
    pub model: String,
}

impl RunRequest {
    pub fn from_job(job: &Job) -> Self {
        Self {
            job_id: job.job_id.clone(),
            name: job.params.name.clone(),
            artist: job.params.artist.clone(),
            genre: job.params.genre.clone(),
            lyrics: job.params.lyrics.clone(),
            length: job.params.length,
            model: job.params.model.clone(),
        }
    }

    /// Base configuration specialised to this request.
    pub fn config(&self, base: &RunConfig) -> RunConfig {
        RunConfig {
            sample_length: None,
            sample_length_in_seconds: self.length.trunc(),
            n_samples: ModelPreset::for_model(&self.model).job_samples,
            job_id: self.job_id.clone(),
            name: self.name.clone(),
            model: self.model.clone(),
            ..base.clone()
        }
    }

    pub fn metadata(&self, sample_rate: u32) -> SampleMetadata {
        SampleMetadata {
            artist: self.artist.clone(),
            genre: self.genre.clone(),
            lyrics: self.lyrics.clone(),
            total_length: (self.length * sample_rate as f64) as usize,
            offset: 0,
        }
    }
}

/// Run one configuration to completion with the given priors.
///
/// `metas` is cycled to fill the batch.
pub fn run_config(
    config: &RunConfig,
    priors: &[Box<dyn Prior>],
    sinks: Collaborators<'_>,
    metas: &[SampleMetadata],
) -> Result<SampleRun> {
    let plan = config.plan(priors)?;
    let metas = SampleMetadata::fill_batch(metas, config.n_samples)?;
    let labels = batch_labels(priors, &metas)?;

    match config.sampling_mode()? {
        SamplingMode::Ancestral => ancestral_sample(priors, &plan, sinks, &labels),
        SamplingMode::Upsample => {
            let source = config
                .codes_file
                .as_deref()
                .ok_or_else(|| CascadeError::InvalidConfig {
                    reason: "upsampling requires codes_file".to_string(),
                })?;
            let bundle = DirectoryCheckpointStore::load_bundle(source)?;
            let top = priors.len() - 1;
            let top_codes = bundle.codes.level(top)?.clone();
            info!("Upsampling {} top-level tokens from {}", top_codes.len(), source.display());
            upsample(priors, &plan, sinks, top_codes, &labels)
        }
        SamplingMode::Primed => {
            let top_raw_to_tokens = priors[priors.len() - 1].raw_to_tokens();
            let prompt = load_prompts(
                &config.prompt_files(),
                config.prompt_duration(top_raw_to_tokens),
                config.sr,
                config.n_samples,
            )?;
            primed_sample(priors, &plan, sinks, &prompt, &labels)
        }
    }
}

/// Turn one request into checkpoint artifacts.
pub fn run_request(
    request: &RunRequest,
    base: &RunConfig,
    priors: &[Box<dyn Prior>],
    sinks: Collaborators<'_>,
) -> Result<SampleRun> {
    let config = request.config(base);
    info!(
        "Running job {} ({}): {} / {}, {}s with {}",
        request.job_id, request.name, request.artist, request.genre, request.length, request.model
    );
    run_config(&config, priors, sinks, &[request.metadata(config.sr)])
}

/// What a pass over the queue did
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QueueSummary {
    pub completed: Vec<String>,
    /// `(job_id, error)` pairs
    pub failed: Vec<(String, String)>,
}

/// Process `top_ready` jobs until none are left.
///
/// # Arguments
/// * `queue` - Source of jobs
/// * `base` - Configuration shared by every job
/// * `load_priors` - Loads the priors for a model name
/// * `sinks` - Where artifacts go
pub fn process_queue<F>(
    queue: &dyn JobQueue,
    base: &RunConfig,
    mut load_priors: F,
    sinks: Collaborators<'_>,
) -> Result<QueueSummary>
where
    F: FnMut(&str) -> Result<Vec<Box<dyn Prior>>>,
{
    let mut summary = QueueSummary::default();

    while let Some(job) = queue.next_job(JobStatus::TopReady)? {
        let job_id = job.job_id.clone();
        match queue.lock(&job_id) {
            Ok(()) => {}
            Err(CascadeError::JobLocked { .. }) => {
                debug!("Job {} was taken by another worker", job_id);
                continue;
            }
            Err(e) => return Err(e),
        }
        queue.update_status(&job_id, JobStatus::TopStarted)?;

        let request = RunRequest::from_job(&job);
        let config = request.config(base);
        let location = config.run_key().run_dir(&config.output_dir);
        queue.append_log(&job_id, &format!("Output: {}", location.display()))?;

        let result = load_priors(&request.model)
            .and_then(|priors| run_request(&request, base, &priors, sinks));

        match result {
            Ok(run) => {
                queue.update_status(&job_id, JobStatus::UpsamplingDone)?;
                info!("Job {} finished {} level(s)", job_id, run.levels.len());
                summary.completed.push(job_id);
            }
            Err(e) => {
                warn!("Job {} failed: {}", job_id, e);
                queue.append_log(&job_id, &format!("Failed: {}", e))?;
                queue.update_status(&job_id, JobStatus::Failed)?;
                queue.unlock(&job_id)?;
                summary.failed.push((job_id, e.to_string()));
            }
        }
    }

    info!(
        "Queue drained: {} completed, {} failed",
        summary.completed.len(),
        summary.failed.len()
    );
    Ok(summary)
}
