//! Multi-level orchestration
//!
//! Levels are sampled one after another in the order given. Each level holds
//! the single accelerator slot while its windows run, then is decoded,
//! checkpointed and exported before the next level starts. The first failure
//! aborts the remaining levels; anything already checkpointed stays on disk.

use std::path::PathBuf;

use chrono::Utc;
use log::info;

use crate::artifacts::{
    Alignment, AlignmentExtractor, CheckpointBundle, CheckpointStore, VisualizationExporter,
    WaveformExporter,
};
use crate::codes::{CodeTable, LabelBatch};
use crate::config::SamplePlan;
use crate::error::{CascadeError, Result};
use crate::prior::{AcceleratorSlot, Device, Prior};
use crate::sampling::level::{LevelReport, LevelSampler};

/// Progress of one level through a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LevelState {
    NotStarted,
    Sampling { windows_done: usize },
    Complete,
    Checkpointed,
}

impl LevelState {
    pub fn name(&self) -> &'static str {
        match self {
            LevelState::NotStarted => "not_started",
            LevelState::Sampling { .. } => "sampling",
            LevelState::Complete => "complete",
            LevelState::Checkpointed => "checkpointed",
        }
    }

    fn rank(&self) -> (u8, usize) {
        match self {
            LevelState::NotStarted => (0, 0),
            LevelState::Sampling { windows_done } => (1, *windows_done),
            LevelState::Complete => (2, 0),
            LevelState::Checkpointed => (3, 0),
        }
    }

    /// Move forward to `next`. Backward or repeated transitions are rejected.
    pub fn advance(&mut self, level: usize, next: LevelState) -> Result<()> {
        let forward = match (self.rank(), next.rank()) {
            ((1, done), (1, next_done)) => next_done > done,
            ((0, _), (1, 0)) => true,
            ((0, _), _) => false,
            ((from, _), (to, _)) => to == from + 1,
        };
        if !forward {
            return Err(CascadeError::InvalidTransition {
                level,
                from: self.name(),
                to: next.name(),
            });
        }
        *self = next;
        Ok(())
    }
}

/// External sinks a run reports into
#[derive(Clone, Copy)]
pub struct Collaborators<'a> {
    pub checkpoints: &'a dyn CheckpointStore,
    pub waveforms: &'a dyn WaveformExporter,
    pub alignment: &'a dyn AlignmentExtractor,
    pub visualization: &'a dyn VisualizationExporter,
}

/// What a finished level left behind
#[derive(Debug, Clone, PartialEq)]
pub struct LevelOutcome {
    pub report: LevelReport,
    pub checkpoint: PathBuf,
    pub artifact_dir: PathBuf,
}

/// Drives every requested level of one run
pub struct Orchestrator<'a> {
    priors: &'a [Box<dyn Prior>],
    plan: &'a SamplePlan,
    sinks: Collaborators<'a>,
    slot: AcceleratorSlot,
    states: Vec<LevelState>,
    alignment: Option<Alignment>,
}

impl<'a> Orchestrator<'a> {
    /// Validate the plan against the priors. Nothing is sampled here.
    pub fn new(
        priors: &'a [Box<dyn Prior>],
        plan: &'a SamplePlan,
        sinks: Collaborators<'a>,
    ) -> Result<Self> {
        let levels = priors.len();
        if levels == 0 {
            return Err(CascadeError::InvalidConfig {
                reason: "at least one prior is required".to_string(),
            });
        }
        if plan.sampling.len() != levels
            || plan.max_batch_size.len() != levels
            || plan.hop_fraction.len() != levels
        {
            return Err(CascadeError::InvalidConfig {
                reason: format!("plan does not have per-level settings for {} levels", levels),
            });
        }

        for (level, prior) in priors.iter().enumerate() {
            if prior.level() != level {
                return Err(CascadeError::InvalidConfig {
                    reason: format!("prior {} reports level {}", level, prior.level()),
                });
            }
            if plan.sample_length % prior.raw_to_tokens() != 0 {
                return Err(CascadeError::LengthNotAligned {
                    level,
                    sample_length: plan.sample_length,
                    raw_to_tokens: prior.raw_to_tokens(),
                });
            }
            plan.hop_length(level, prior.n_ctx())?;
            if plan.max_batch_size[level] == 0 {
                return Err(CascadeError::InvalidBatchSize { level });
            }
        }

        Ok(Self {
            priors,
            plan,
            sinks,
            slot: AcceleratorSlot::new(Device::default()),
            states: vec![LevelState::NotStarted; levels],
            alignment: None,
        })
    }

    pub fn states(&self) -> &[LevelState] {
        &self.states
    }

    pub fn slot(&self) -> &AcceleratorSlot {
        &self.slot
    }

    /// Alignment cached from the first level that had lyric tokens.
    pub fn alignment(&self) -> Option<&Alignment> {
        self.alignment.as_ref()
    }

    /// Sample `levels` in order, checkpointing each one.
    pub fn sample_levels(
        &mut self,
        codes: &mut CodeTable,
        labels: &[LabelBatch],
        levels: &[usize],
    ) -> Result<Vec<LevelOutcome>> {
        let n_levels = self.priors.len();
        if codes.n_levels() != n_levels || labels.len() != n_levels {
            return Err(CascadeError::ShapeMismatch {
                reason: format!(
                    "{} priors but {} code levels and {} label sets",
                    n_levels,
                    codes.n_levels(),
                    labels.len()
                ),
            });
        }
        let n_samples = codes.n_samples();
        if let Some(level) = labels.iter().position(|l| l.n_samples() != n_samples) {
            return Err(CascadeError::ShapeMismatch {
                reason: format!(
                    "labels for level {} hold {} samples, codes hold {}",
                    level,
                    labels[level].n_samples(),
                    n_samples
                ),
            });
        }

        let mut outcomes = Vec::with_capacity(levels.len());
        for &level in levels {
            outcomes.push(self.sample_single_level(codes, labels, level)?);
        }
        Ok(outcomes)
    }

    fn sample_single_level(
        &mut self,
        codes: &mut CodeTable,
        labels: &[LabelBatch],
        level: usize,
    ) -> Result<LevelOutcome> {
        let priors = self.priors;
        let n_levels = priors.len();
        let prior = priors
            .get(level)
            .ok_or(CascadeError::LevelOutOfRange {
                level,
                levels: n_levels,
            })?
            .as_ref();
        let plan = self.plan;

        let total_length = plan.sample_length / prior.raw_to_tokens();
        let hop_length = plan.hop_length(level, prior.n_ctx())?;
        info!(
            "Sampling level {}: {} tokens, n_ctx {}, hop {}",
            level,
            total_length,
            prior.n_ctx(),
            hop_length
        );

        self.states[level].advance(level, LevelState::Sampling { windows_done: 0 })?;

        let report = {
            let lease = self.slot.lease(prior)?;
            let sampler = LevelSampler::new(
                lease.prior(),
                &labels[level],
                &plan.sampling[level],
                plan.max_batch_size[level],
            );
            let state = &mut self.states[level];
            let report = sampler.sample_level(codes, total_length, hop_length, |windows_done| {
                state.advance(level, LevelState::Sampling { windows_done })
            })?;
            lease.release()?;
            report
        };
        self.states[level].advance(level, LevelState::Complete)?;

        let top = n_levels - 1;
        let top_prior = priors[top].as_ref();
        let waveform = top_prior.decode(codes.from_level(level)?, level, codes.n_samples())?;

        let artifact_dir = plan.key.level_dir(&plan.output_dir, level);
        let bundle = CheckpointBundle {
            key: plan.key.clone(),
            level,
            codes: codes.clone(),
            labels: labels.to_vec(),
            sampling: plan.sampling.clone(),
            waveform,
            created_at: Utc::now(),
        };
        let checkpoint = self.sinks.checkpoints.save(&bundle)?;

        self.sinks
            .waveforms
            .export(&artifact_dir, &bundle.waveform, plan.sample_rate)?;

        if self.alignment.is_none() && top_prior.text_token_count() > 0 {
            info!("Extracting lyric alignment at level {}", level);
            self.alignment = Some(self.sinks.alignment.extract(
                &bundle.waveform,
                codes,
                &labels[top],
                plan.sampling[top].fp16,
                top_prior.info(),
            )?);
        }

        self.sinks.visualization.export(
            &artifact_dir,
            &bundle.waveform,
            codes,
            &labels[top],
            self.alignment.as_ref(),
        )?;

        self.states[level].advance(level, LevelState::Checkpointed)?;
        info!("Level {} done, artifacts in {}", level, artifact_dir.display());

        Ok(LevelOutcome {
            report,
            checkpoint,
            artifact_dir,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(LevelState::NotStarted, LevelState::Sampling { windows_done: 0 } => true; "start")]
    #[test_case(LevelState::Sampling { windows_done: 1 }, LevelState::Sampling { windows_done: 2 } => true; "progress")]
    #[test_case(LevelState::Sampling { windows_done: 2 }, LevelState::Complete => true; "finish")]
    #[test_case(LevelState::Complete, LevelState::Checkpointed => true; "checkpoint")]
    #[test_case(LevelState::NotStarted, LevelState::Complete => false; "skip sampling")]
    #[test_case(LevelState::Sampling { windows_done: 2 }, LevelState::Sampling { windows_done: 2 } => false; "repeat window")]
    #[test_case(LevelState::Checkpointed, LevelState::Sampling { windows_done: 0 } => false; "revisit")]
    #[test_case(LevelState::Complete, LevelState::Sampling { windows_done: 5 } => false; "backward")]
    fn test_transitions(from: LevelState, to: LevelState) -> bool {
        let mut state = from;
        state.advance(0, to).is_ok()
    }
}
