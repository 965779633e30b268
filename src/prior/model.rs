//! Prior trait and core types
//!
//! Defines the interface every level's autoregressive prior must implement.
//! The sampler never looks inside a prior: it only slices histories, asks for
//! conditioning, and appends what the prior generates.

use serde::{Deserialize, Serialize};

use crate::audio::Waveform;
use crate::codes::{CodeBatch, CodeTable, CrossLevelConditioning, LabelBatch, SampleMetadata};
use crate::config::SamplingConfig;
use crate::error::Result;

/// Where tensors live
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Device {
    Cpu,
    Cuda(usize),
}

impl Default for Device {
    fn default() -> Self {
        Device::Cuda(0)
    }
}

/// Static geometry of one level's prior
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriorInfo {
    /// Level this prior samples (0 = finest)
    pub level: usize,
    /// Maximum tokens conditioned on and generated per call
    pub n_ctx: usize,
    /// Raw audio samples per token at this level
    pub raw_to_tokens: usize,
    /// Lyric tokens in this prior's labels (0 when not lyric-conditioned)
    pub text_token_count: usize,
}

/// One call into a prior's generation operation
#[derive(Debug, Clone, Copy)]
pub struct SampleRequest<'a> {
    /// Samples in this group
    pub n_samples: usize,
    /// Already generated history (may be empty)
    pub context: &'a CodeBatch,
    pub conditioning: &'a CrossLevelConditioning,
    pub label: &'a LabelBatch,
    pub config: &'a SamplingConfig,
    /// Length of the returned sequence, history included
    pub sample_tokens: usize,
}

/// Derives per-level label tensors from run metadata
pub trait Labeller: Send + Sync {
    fn batch_labels(&self, metas: &[SampleMetadata], device: Device) -> Result<LabelBatch>;
}

/// Trait that every level's prior must implement
pub trait Prior: Send + Sync {
    /// Get prior geometry
    fn info(&self) -> &PriorInfo;

    fn labeller(&self) -> &dyn Labeller;

    /// Codes from the next-coarser level aligned with `[start, end)` at this level.
    fn cross_level_conditioning(
        &self,
        codes: &CodeTable,
        start: usize,
        end: usize,
    ) -> Result<CrossLevelConditioning>;

    /// Labels offset to token position `start`.
    fn label_at(&self, labels: &LabelBatch, start: usize) -> Result<LabelBatch>;

    /// Generate continuations of `request.context`.
    ///
    /// Returns `request.sample_tokens` codes per sample, the context included.
    fn sample(&self, request: SampleRequest<'_>) -> Result<CodeBatch>;

    /// Encode raw audio into codes for levels `start_level..end_level`, finest first.
    fn encode(
        &self,
        audio: &Waveform,
        start_level: usize,
        end_level: usize,
        batch_chunks: usize,
    ) -> Result<Vec<CodeBatch>>;

    /// Decode codes for levels `start_level..` (finest first) into audio.
    ///
    /// All priors of a stack share one codec. Runs encode and decode through
    /// the top prior.
    fn decode(&self, codes: &[CodeBatch], start_level: usize, batch_chunks: usize)
        -> Result<Waveform>;

    /// Move weights onto the accelerator.
    fn move_to_accelerator(&self) -> Result<()>;

    /// Move weights back to host memory.
    fn move_to_host(&self) -> Result<()>;

    /// Drop cached allocations between model invocations.
    fn release_transient_memory(&self) {}

    /// Check if weights are currently on the accelerator
    fn is_resident(&self) -> bool {
        false
    }

    fn n_ctx(&self) -> usize {
        self.info().n_ctx
    }

    fn raw_to_tokens(&self) -> usize {
        self.info().raw_to_tokens
    }

    fn level(&self) -> usize {
        self.info().level
    }

    fn text_token_count(&self) -> usize {
        self.info().text_token_count
    }
}
