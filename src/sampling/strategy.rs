//! Entry strategies
//!
//! Each strategy seeds the code table, picks the levels to sample and hands
//! over to the `Orchestrator`:
//! - ancestral: every level from empty, coarsest first
//! - upsample: every level below a frozen top level
//! - primed: every level, starting from an encoded audio prompt

use log::info;

use crate::artifacts::Alignment;
use crate::audio::Waveform;
use crate::codes::{CodeBatch, CodeTable, LabelBatch, SampleMetadata};
use crate::config::SamplePlan;
use crate::error::{CascadeError, Result};
use crate::prior::{Device, Prior};
use crate::sampling::orchestrator::{Collaborators, LevelOutcome, Orchestrator};

/// Result of a complete run
#[derive(Debug, Clone)]
pub struct SampleRun {
    pub codes: CodeTable,
    pub levels: Vec<LevelOutcome>,
    pub alignment: Option<Alignment>,
}

/// Labels for every level from the run metadata.
pub fn batch_labels(priors: &[Box<dyn Prior>], metas: &[SampleMetadata]) -> Result<Vec<LabelBatch>> {
    priors
        .iter()
        .map(|prior| prior.labeller().batch_labels(metas, Device::default()))
        .collect()
}

/// Sample every level from scratch.
pub fn ancestral_sample(
    priors: &[Box<dyn Prior>],
    plan: &SamplePlan,
    sinks: Collaborators<'_>,
    labels: &[LabelBatch],
) -> Result<SampleRun> {
    let orchestrator = Orchestrator::new(priors, plan, sinks)?;
    let codes = CodeTable::empty(priors.len(), n_samples(labels)?);
    let levels: Vec<usize> = (0..priors.len()).rev().collect();

    info!("Ancestral sampling of levels {:?}", levels);
    run(orchestrator, codes, labels, &levels)
}

/// Sample every level below the top, conditioned on `top_codes`.
///
/// The top level's codes are never modified.
pub fn upsample(
    priors: &[Box<dyn Prior>],
    plan: &SamplePlan,
    sinks: Collaborators<'_>,
    top_codes: CodeBatch,
    labels: &[LabelBatch],
) -> Result<SampleRun> {
    let orchestrator = Orchestrator::new(priors, plan, sinks)?;

    let n_levels = priors.len();
    if n_levels < 2 {
        return Err(CascadeError::InvalidConfig {
            reason: "upsampling needs at least two levels".to_string(),
        });
    }

    let below_top = priors[n_levels - 2].as_ref();
    let tokens = plan.sample_length / below_top.raw_to_tokens();
    if tokens < below_top.n_ctx() {
        return Err(CascadeError::UpsampleTooShort {
            level: n_levels - 2,
            tokens,
            n_ctx: below_top.n_ctx(),
        });
    }

    let n_samples = n_samples(labels)?;
    if top_codes.n_samples() != n_samples {
        return Err(CascadeError::ShapeMismatch {
            reason: format!(
                "top-level codes hold {} samples, labels hold {}",
                top_codes.n_samples(),
                n_samples
            ),
        });
    }
    let top_length = plan.sample_length / priors[n_levels - 1].raw_to_tokens();
    if top_codes.len() < top_length {
        return Err(CascadeError::InvalidConfig {
            reason: format!(
                "top-level codes cover {} tokens, {} needed",
                top_codes.len(),
                top_length
            ),
        });
    }

    let mut levels = vec![CodeBatch::empty(n_samples); n_levels - 1];
    levels.push(top_codes);
    let codes = CodeTable::from_levels(levels)?;
    let order: Vec<usize> = (0..n_levels - 1).rev().collect();

    info!("Upsampling levels {:?}", order);
    run(orchestrator, codes, labels, &order)
}

/// Encode `prompt` into every level, then continue ancestrally.
pub fn primed_sample(
    priors: &[Box<dyn Prior>],
    plan: &SamplePlan,
    sinks: Collaborators<'_>,
    prompt: &Waveform,
    labels: &[LabelBatch],
) -> Result<SampleRun> {
    let orchestrator = Orchestrator::new(priors, plan, sinks)?;

    let n_levels = priors.len();
    let n_samples = n_samples(labels)?;
    if prompt.n_samples() != n_samples {
        return Err(CascadeError::ShapeMismatch {
            reason: format!(
                "prompt holds {} samples, labels hold {}",
                prompt.n_samples(),
                n_samples
            ),
        });
    }

    if prompt.len() >= plan.sample_length {
        return Err(CascadeError::InvalidConfig {
            reason: format!(
                "prompt of {} samples does not leave room in a {} sample run",
                prompt.len(),
                plan.sample_length
            ),
        });
    }

    let codec = priors[n_levels - 1].as_ref();
    let encoded = codec.encode(prompt, 0, n_levels, prompt.n_samples())?;
    if encoded.len() != n_levels {
        return Err(CascadeError::PriorContract {
            level: n_levels - 1,
            reason: format!("encoded {} levels, expected {}", encoded.len(), n_levels),
        });
    }
    let codes = CodeTable::from_levels(encoded)?;
    info!("Primed with prompt codes of lengths {:?}", codes.lengths());

    let levels: Vec<usize> = (0..n_levels).rev().collect();
    run(orchestrator, codes, labels, &levels)
}

fn run(
    mut orchestrator: Orchestrator<'_>,
    mut codes: CodeTable,
    labels: &[LabelBatch],
    levels: &[usize],
) -> Result<SampleRun> {
    let outcomes = orchestrator.sample_levels(&mut codes, labels, levels)?;
    Ok(SampleRun {
        codes,
        levels: outcomes,
        alignment: orchestrator.alignment().cloned(),
    })
}

fn n_samples(labels: &[LabelBatch]) -> Result<usize> {
    let n = labels.first().map_or(0, LabelBatch::n_samples);
    if n == 0 {
        return Err(CascadeError::InvalidConfig {
            reason: "labels must cover at least one sample".to_string(),
        });
    }
    Ok(n)
}
