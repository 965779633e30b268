//! CLI Command Implementations
//!
//! Runs go through the deterministic mock prior bank, which has the same
//! geometry as the released three-level models.

use std::fs;
use std::path::{Path, PathBuf};

use log::info;

use crate::artifacts::{
    sha256_hex, CheckpointBundle, CheckpointManifest, DirectoryCheckpointStore, JsonReportExporter,
    UniformAlignment, WavExporter,
};
use crate::codes::SampleMetadata;
use crate::config::RunConfig;
use crate::error::{CascadeError, Result};
use crate::jobs::{process_queue, run_config, DirectoryJobQueue, JobParams, JobQueue};
use crate::prior::mock::MockPriorBank;
use crate::sampling::{partial_window, window_starts, Collaborators, SampleRun};

/// Command-line overrides for `sample`
#[derive(Debug, Clone, Default)]
pub struct SampleOverrides {
    pub mode: Option<String>,
    pub audio_file: Option<String>,
    pub codes_file: Option<PathBuf>,
    pub output_dir: Option<PathBuf>,
}

fn load_config(path: Option<&Path>) -> Result<RunConfig> {
    match path {
        Some(path) => {
            info!("Loading run configuration from {}", path.display());
            RunConfig::from_file(path)
        }
        None => Ok(RunConfig::default()),
    }
}

/// Run one sampling job.
pub fn sample(
    config_path: Option<&Path>,
    overrides: SampleOverrides,
    artist: &str,
    genre: &str,
    lyrics: &str,
) -> Result<()> {
    let mut config = load_config(config_path)?;
    if let Some(mode) = overrides.mode {
        config.mode = mode;
    }
    if overrides.audio_file.is_some() {
        config.audio_file = overrides.audio_file;
    }
    if overrides.codes_file.is_some() {
        config.codes_file = overrides.codes_file;
    }
    if let Some(output_dir) = overrides.output_dir {
        config.output_dir = output_dir;
    }

    let bank = MockPriorBank::for_model(&config.model, config.sr);
    if config.levels != bank.priors().len() {
        return Err(CascadeError::InvalidConfig {
            reason: format!(
                "model {} has {} levels, config asks for {}",
                config.model,
                bank.priors().len(),
                config.levels
            ),
        });
    }

    let meta = SampleMetadata {
        artist: artist.to_string(),
        genre: genre.to_string(),
        lyrics: lyrics.to_string(),
        total_length: config
            .sample_length
            .unwrap_or((config.sample_length_in_seconds * config.sr as f64) as usize),
        offset: 0,
    };

    let store = DirectoryCheckpointStore::new(&config.output_dir);
    let waveforms = WavExporter::default();
    let sinks = Collaborators {
        checkpoints: &store,
        waveforms: &waveforms,
        alignment: &UniformAlignment,
        visualization: &JsonReportExporter,
    };

    let run = run_config(&config, bank.priors(), sinks, &[meta])?;
    print_run(&run);
    println!(
        "Artifacts: {}",
        config.run_key().run_dir(&config.output_dir).display()
    );
    Ok(())
}

fn print_run(run: &SampleRun) {
    println!("Sampled {} level(s):", run.levels.len());
    println!("{:-<60}", "");
    for outcome in &run.levels {
        let report = &outcome.report;
        println!(
            "level {}: {} tokens, {} window(s), {} skipped -> {}",
            report.level,
            report.final_length,
            report.windows,
            report.skipped,
            outcome.checkpoint.display()
        );
    }
    println!("{:-<60}", "");
    if let Some(alignment) = &run.alignment {
        let tokens: usize = alignment.items.iter().map(Vec::len).sum();
        println!("Aligned {} lyric token(s)", tokens);
    }
}

/// Print the window schedule of one level.
pub fn plan(total_length: usize, n_ctx: usize, hop_fraction: f32) -> Result<()> {
    if !(hop_fraction > 0.0 && hop_fraction <= 1.0) {
        return Err(CascadeError::InvalidHopFraction {
            level: 0,
            fraction: hop_fraction,
        });
    }
    let hop_length = (hop_fraction * n_ctx as f32) as usize;

    if total_length >= n_ctx {
        let starts = window_starts(total_length, n_ctx, hop_length)?;
        println!("{} window(s), hop {}:", starts.len(), hop_length);
        for start in starts {
            println!("  [{}, {})", start, start + n_ctx);
        }
    } else {
        let window = partial_window(0, n_ctx, total_length);
        println!(
            "Partial window [{}, {}) of {} tokens",
            window.start,
            window.end(),
            window.sample_tokens
        );
    }
    Ok(())
}

/// List checkpointed levels of a run directory and verify their digests.
pub fn inspect(run_dir: &Path) -> Result<()> {
    let manifest_path = run_dir.join("manifest.json");
    if !manifest_path.exists() {
        return Err(CascadeError::FileNotFound {
            path: manifest_path,
        });
    }
    let content = fs::read_to_string(&manifest_path).map_err(|e| CascadeError::FileReadError {
        path: manifest_path.clone(),
        source: e,
    })?;
    let manifest: CheckpointManifest = serde_json::from_str(&content)?;

    println!("Run: {}", run_dir.display());
    println!("{:-<60}", "");
    for (level, entry) in &manifest.levels {
        let path = run_dir.join(&entry.path);
        let bytes = fs::read(&path).map_err(|e| CascadeError::FileReadError {
            path: path.clone(),
            source: e,
        })?;
        let status = if sha256_hex(&bytes) == entry.sha256 {
            "ok"
        } else {
            "CHECKSUM MISMATCH"
        };
        let bundle: CheckpointBundle = serde_json::from_slice(&bytes)?;
        println!(
            "level {}: {} bytes [{}] codes {:?}, {:.2}s audio, saved {}",
            level,
            entry.size_bytes,
            status,
            bundle.codes.lengths(),
            bundle.waveform.duration_secs(),
            entry.created_at.format("%Y-%m-%d %H:%M:%S")
        );
    }
    println!("{:-<60}", "");
    Ok(())
}

/// Queue a job.
pub fn submit(queue_dir: &Path, params: JobParams) -> Result<()> {
    let queue = DirectoryJobQueue::open(queue_dir)?;
    let job = queue.submit(params)?;
    println!("Queued job {} ({})", job.job_id, job.name);
    Ok(())
}

/// Work through the queue until it is empty.
pub fn serve(queue_dir: &Path, config_path: Option<&Path>, output_dir: Option<&Path>) -> Result<()> {
    let mut base = load_config(config_path)?;
    if let Some(output_dir) = output_dir {
        base.output_dir = output_dir.to_path_buf();
    }

    let queue = DirectoryJobQueue::open(queue_dir)?;
    let store = DirectoryCheckpointStore::new(&base.output_dir);
    let waveforms = WavExporter::default();
    let sinks = Collaborators {
        checkpoints: &store,
        waveforms: &waveforms,
        alignment: &UniformAlignment,
        visualization: &JsonReportExporter,
    };

    let sample_rate = base.sr;
    let summary = process_queue(
        &queue,
        &base,
        |model| Ok(MockPriorBank::for_model(model, sample_rate).into_priors()),
        sinks,
    )?;

    println!(
        "Completed {} job(s), {} failed",
        summary.completed.len(),
        summary.failed.len()
    );
    for (job_id, error) in &summary.failed {
        println!("  {}: {}", job_id, error);
    }
    Ok(())
}
