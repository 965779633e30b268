//! Window sampling within one level
//!
//! `LevelSampler` applies a level's prior to one window at a time. The level's
//! code sequence is owned by the `CodeTable` and borrowed mutably for each
//! step; only the newly generated suffix of a window is ever appended.

use std::ops::Range;

use log::{debug, info};
use serde::Serialize;

use crate::codes::{CodeBatch, CodeTable, CrossLevelConditioning, LabelBatch};
use crate::config::SamplingConfig;
use crate::error::{CascadeError, Result};
use crate::prior::{Prior, SampleRequest};
use crate::sampling::batch::{map_in_groups, Batched};
use crate::sampling::window::{partial_window, window_starts, Window};

/// What one window step did to the level
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowOutcome {
    /// Tokens were generated and appended
    Sampled { new_tokens: usize },
    /// The window was already covered by history
    Skipped { conditioning_tokens: usize },
}

impl WindowOutcome {
    pub fn new_tokens(&self) -> usize {
        match self {
            WindowOutcome::Sampled { new_tokens } => *new_tokens,
            WindowOutcome::Skipped { .. } => 0,
        }
    }
}

/// Summary of a fully sampled level
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LevelReport {
    pub level: usize,
    pub total_length: usize,
    pub windows: usize,
    pub skipped: usize,
    pub new_tokens: usize,
    pub final_length: usize,
}

/// Everything a prior call needs, split by the same row ranges
struct WindowInputs {
    context: CodeBatch,
    conditioning: CrossLevelConditioning,
    label: LabelBatch,
}

impl Batched for WindowInputs {
    fn slice_rows(&self, range: Range<usize>) -> Self {
        Self {
            context: self.context.slice_rows(range.clone()),
            conditioning: self.conditioning.slice_rows(range.clone()),
            label: self.label.slice_rows(range),
        }
    }

    fn concat_rows(parts: Vec<Self>) -> Self {
        let mut contexts = Vec::with_capacity(parts.len());
        let mut conditionings = Vec::with_capacity(parts.len());
        let mut labels = Vec::with_capacity(parts.len());
        for part in parts {
            contexts.push(part.context);
            conditionings.push(part.conditioning);
            labels.push(part.label);
        }
        Self {
            context: CodeBatch::concat_rows(contexts),
            conditioning: CrossLevelConditioning::concat_rows(conditionings),
            label: LabelBatch::concat_rows(labels),
        }
    }
}

/// Samples windows of one level with its prior
pub struct LevelSampler<'a> {
    prior: &'a dyn Prior,
    labels: &'a LabelBatch,
    config: &'a SamplingConfig,
    max_batch_size: usize,
}

impl<'a> LevelSampler<'a> {
    pub fn new(
        prior: &'a dyn Prior,
        labels: &'a LabelBatch,
        config: &'a SamplingConfig,
        max_batch_size: usize,
    ) -> Self {
        Self {
            prior,
            labels,
            config,
            max_batch_size,
        }
    }

    pub fn level(&self) -> usize {
        self.prior.level()
    }

    /// Sample one window, appending only the tokens past the existing history.
    pub fn sample_window(&self, codes: &mut CodeTable, window: Window) -> Result<WindowOutcome> {
        let level = self.prior.level();
        let n_ctx = self.prior.n_ctx();

        let history = codes.level(level)?;
        let n_samples = history.n_samples();
        let context = history.window(window.start, window.start + n_ctx);
        let conditioning_tokens = context.len();

        if window.sample_tokens <= conditioning_tokens {
            debug!(
                "Level {} window [{},{}] already covered by {} tokens",
                level,
                window.start,
                window.end(),
                conditioning_tokens
            );
            return Ok(WindowOutcome::Skipped {
                conditioning_tokens,
            });
        }
        let new_tokens = window.sample_tokens - conditioning_tokens;

        let conditioning = self
            .prior
            .cross_level_conditioning(codes, window.start, window.end())?;
        let label = self.prior.label_at(self.labels, window.start)?;

        info!(
            "Sampling {} tokens for [{},{}]. Conditioning on {} tokens",
            window.sample_tokens,
            window.start,
            window.end(),
            conditioning_tokens
        );

        self.prior.release_transient_memory();

        let inputs = WindowInputs {
            context,
            conditioning,
            label,
        };
        let sampled = map_in_groups(&inputs, n_samples, self.max_batch_size, |range, group| {
            self.prior.sample(SampleRequest {
                n_samples: range.len(),
                context: &group.context,
                conditioning: &group.conditioning,
                label: &group.label,
                config: self.config,
                sample_tokens: window.sample_tokens,
            })
        })?;

        if sampled.n_samples() != n_samples || sampled.len() != window.sample_tokens {
            return Err(CascadeError::PriorContract {
                level,
                reason: format!(
                    "expected {} x {} codes, got {} x {}",
                    n_samples,
                    window.sample_tokens,
                    sampled.n_samples(),
                    sampled.len()
                ),
            });
        }
        if sampled.window(0, conditioning_tokens) != inputs.context {
            return Err(CascadeError::PriorContract {
                level,
                reason: "returned codes do not start with the context".to_string(),
            });
        }

        codes.level_mut(level)?.append(&sampled.tail(new_tokens))?;
        Ok(WindowOutcome::Sampled { new_tokens })
    }

    /// Sample the one right-aligned window used when a level is shorter than `n_ctx`.
    pub fn sample_partial(&self, codes: &mut CodeTable, remaining: usize) -> Result<WindowOutcome> {
        let current = codes.level(self.prior.level())?.len();
        let window = partial_window(current, self.prior.n_ctx(), remaining);
        self.sample_window(codes, window)
    }

    /// Bring the level to `total_length` tokens.
    ///
    /// `on_window` is called with the number of windows finished after each one.
    pub fn sample_level<F>(
        &self,
        codes: &mut CodeTable,
        total_length: usize,
        hop_length: usize,
        mut on_window: F,
    ) -> Result<LevelReport>
    where
        F: FnMut(usize) -> Result<()>,
    {
        let level = self.prior.level();
        let n_ctx = self.prior.n_ctx();

        let mut report = LevelReport {
            level,
            total_length,
            windows: 0,
            skipped: 0,
            new_tokens: 0,
            final_length: 0,
        };

        let mut record = |report: &mut LevelReport, outcome: WindowOutcome| {
            report.windows += 1;
            match outcome {
                WindowOutcome::Sampled { new_tokens } => report.new_tokens += new_tokens,
                WindowOutcome::Skipped { .. } => report.skipped += 1,
            }
            on_window(report.windows)
        };

        if total_length >= n_ctx {
            for start in window_starts(total_length, n_ctx, hop_length)? {
                let outcome = self.sample_window(codes, Window::new(start, n_ctx))?;
                record(&mut report, outcome)?;
            }
        } else {
            let current = codes.level(level)?.len();
            let outcome = self.sample_partial(codes, total_length.saturating_sub(current))?;
            record(&mut report, outcome)?;
        }

        report.final_length = codes.level(level)?.len();
        if report.final_length != total_length {
            return Err(CascadeError::ShapeMismatch {
                reason: format!(
                    "level {} ended with {} tokens, target is {}",
                    level, report.final_length, total_length
                ),
            });
        }
        info!(
            "Level {} has {} tokens after {} window(s), {} skipped",
            level, report.final_length, report.windows, report.skipped
        );
        Ok(report)
    }
}
