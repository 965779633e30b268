//! Run configuration
//!
//! `RunConfig` is the user-facing JSON configuration for one sampling run.
//! It is resolved against the loaded priors into a `SamplePlan`, which is what
//! the orchestrator consumes. Persisted per-level sampling settings
//! (`SamplingConfig`) are kept apart from the per-call batch ceiling.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::artifacts::RunKey;
use crate::error::{CascadeError, Result};
use crate::prior::Prior;

/// Default hop fractions, finest level first.
pub const DEFAULT_HOP_FRACTION: [f32; 3] = [0.5, 0.5, 0.125];

/// Default sample rate in Hz.
pub const DEFAULT_SAMPLE_RATE: u32 = 44100;

/// How a run seeds its code table and which levels it samples
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SamplingMode {
    /// Every level from scratch, coarsest first
    Ancestral,
    /// Every level, seeded from an encoded audio prompt
    Primed,
    /// Every level below a supplied, frozen top level
    Upsample,
}

impl SamplingMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ancestral => "ancestral",
            Self::Primed => "primed",
            Self::Upsample => "upsample",
        }
    }
}

impl fmt::Display for SamplingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SamplingMode {
    type Err = CascadeError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "ancestral" => Ok(Self::Ancestral),
            "primed" => Ok(Self::Primed),
            "upsample" | "upsampling" => Ok(Self::Upsample),
            _ => Err(CascadeError::UnknownMode {
                mode: s.to_string(),
            }),
        }
    }
}

/// Sampling settings persisted with each level's checkpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SamplingConfig {
    pub temperature: f32,
    /// Half-precision inference
    pub fp16: bool,
    pub chunk_size: usize,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            temperature: 0.99,
            fp16: true,
            chunk_size: 32,
        }
    }
}

/// Per-model defaults for chunking, batch ceilings and job batch size
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelPreset {
    pub top_chunk_size: usize,
    pub top_max_batch_size: usize,
    pub lower_chunk_size: usize,
    pub lower_max_batch_size: usize,
    /// Samples generated per queued job
    pub job_samples: usize,
}

impl ModelPreset {
    pub fn for_model(model: &str) -> Self {
        let (top_chunk_size, top_max_batch_size) = match model {
            "1b_lyrics" => (32, 16),
            _ => (16, 3),
        };
        Self {
            top_chunk_size,
            top_max_batch_size,
            lower_chunk_size: 32,
            lower_max_batch_size: 16,
            job_samples: if model == "5b_lyrics" { 3 } else { 16 },
        }
    }
}

/// User-facing configuration for one run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// "ancestral", "primed" or "upsample"
    pub mode: String,
    /// Comma-separated prompt paths (primed mode)
    pub audio_file: Option<String>,
    pub prompt_length_in_seconds: f64,
    /// Checkpoint bundle whose top-level codes seed upsampling
    pub codes_file: Option<PathBuf>,
    /// Target length in raw samples; derived from seconds when absent
    pub sample_length: Option<usize>,
    pub sample_length_in_seconds: f64,
    pub n_samples: usize,
    /// Hop as a fraction of n_ctx, finest level first
    pub hop_fraction: Vec<f32>,
    pub temperature: f32,
    pub fp16: bool,
    /// Overrides the preset chunk size on every level
    pub chunk_size: Option<usize>,
    /// Overrides the preset batch ceilings, finest level first
    pub max_batch_size: Option<Vec<usize>>,
    pub sr: u32,
    pub levels: usize,
    pub job_id: String,
    pub name: String,
    pub output_dir: PathBuf,
    pub model: String,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            mode: SamplingMode::Ancestral.as_str().to_string(),
            audio_file: None,
            prompt_length_in_seconds: 12.0,
            codes_file: None,
            sample_length: None,
            sample_length_in_seconds: 20.0,
            n_samples: 1,
            hop_fraction: DEFAULT_HOP_FRACTION.to_vec(),
            temperature: 0.99,
            fp16: true,
            chunk_size: None,
            max_batch_size: None,
            sr: DEFAULT_SAMPLE_RATE,
            levels: DEFAULT_HOP_FRACTION.len(),
            job_id: "local".to_string(),
            name: "sample".to_string(),
            output_dir: PathBuf::from("."),
            model: "5b_lyrics".to_string(),
        }
    }
}

impl RunConfig {
    /// Load a configuration from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| CascadeError::FileReadError {
            path: path.to_path_buf(),
            source: e,
        })?;
        let config: RunConfig = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Parsed sampling mode.
    pub fn sampling_mode(&self) -> Result<SamplingMode> {
        self.mode.parse()
    }

    /// Prompt paths from `audio_file`.
    pub fn prompt_files(&self) -> Vec<PathBuf> {
        self.audio_file
            .as_deref()
            .map(|files| {
                files
                    .split(',')
                    .map(str::trim)
                    .filter(|f| !f.is_empty())
                    .map(PathBuf::from)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Checks that do not depend on the loaded priors.
    pub fn validate(&self) -> Result<()> {
        let mode = self.sampling_mode()?;

        if self.n_samples == 0 {
            return Err(CascadeError::InvalidConfig {
                reason: "n_samples must be at least 1".to_string(),
            });
        }

        for (level, &fraction) in self.hop_fraction.iter().enumerate() {
            if !(fraction > 0.0 && fraction <= 1.0) {
                return Err(CascadeError::InvalidHopFraction { level, fraction });
            }
        }

        if let Some(limits) = &self.max_batch_size {
            if let Some(level) = limits.iter().position(|&m| m == 0) {
                return Err(CascadeError::InvalidBatchSize { level });
            }
        }

        if self.sample_length.is_none() && self.sample_length_in_seconds <= 0.0 {
            return Err(CascadeError::InvalidConfig {
                reason: "sample_length_in_seconds must be positive".to_string(),
            });
        }

        match mode {
            SamplingMode::Primed => {
                if self.prompt_files().is_empty() {
                    return Err(CascadeError::InvalidConfig {
                        reason: "primed sampling requires audio_file".to_string(),
                    });
                }
                if self.prompt_length_in_seconds <= 0.0 {
                    return Err(CascadeError::InvalidConfig {
                        reason: "prompt_length_in_seconds must be positive".to_string(),
                    });
                }
            }
            SamplingMode::Upsample => {
                if self.codes_file.is_none() {
                    return Err(CascadeError::InvalidConfig {
                        reason: "upsampling requires codes_file with top-level codes".to_string(),
                    });
                }
            }
            SamplingMode::Ancestral => {}
        }

        Ok(())
    }

    /// Resolve this configuration against the loaded priors.
    pub fn plan(&self, priors: &[Box<dyn Prior>]) -> Result<SamplePlan> {
        self.validate()?;

        let levels = priors.len();
        let top = priors.last().ok_or_else(|| CascadeError::InvalidConfig {
            reason: "at least one prior is required".to_string(),
        })?;

        if self.hop_fraction.len() != levels {
            return Err(CascadeError::InvalidConfig {
                reason: format!(
                    "hop_fraction has {} entries for {} levels",
                    self.hop_fraction.len(),
                    levels
                ),
            });
        }

        let sample_length = match self.sample_length {
            Some(length) => length,
            None => {
                let raw = (self.sample_length_in_seconds * self.sr as f64) as usize;
                raw / top.raw_to_tokens() * top.raw_to_tokens()
            }
        };

        if self.sampling_mode()? == SamplingMode::Primed {
            let prompt = self.prompt_duration(top.raw_to_tokens());
            if prompt >= sample_length {
                return Err(CascadeError::InvalidConfig {
                    reason: format!(
                        "prompt of {} samples must be shorter than the sample length {}",
                        prompt, sample_length
                    ),
                });
            }
        }

        let preset = ModelPreset::for_model(&self.model);
        let max_batch_size = match &self.max_batch_size {
            Some(limits) if limits.len() != levels => {
                return Err(CascadeError::InvalidConfig {
                    reason: format!(
                        "max_batch_size has {} entries for {} levels",
                        limits.len(),
                        levels
                    ),
                })
            }
            Some(limits) => limits.clone(),
            None => (0..levels)
                .map(|l| {
                    if l + 1 == levels {
                        preset.top_max_batch_size
                    } else {
                        preset.lower_max_batch_size
                    }
                })
                .collect(),
        };

        let sampling = (0..levels)
            .map(|l| SamplingConfig {
                temperature: self.temperature,
                fp16: self.fp16,
                chunk_size: self.chunk_size.unwrap_or(if l + 1 == levels {
                    preset.top_chunk_size
                } else {
                    preset.lower_chunk_size
                }),
            })
            .collect();

        Ok(SamplePlan {
            key: self.run_key(),
            output_dir: self.output_dir.clone(),
            sample_length,
            sample_rate: self.sr,
            hop_fraction: self.hop_fraction.clone(),
            sampling,
            max_batch_size,
        })
    }

    pub fn run_key(&self) -> RunKey {
        RunKey::new(&self.job_id, &self.name)
    }

    /// Prompt length in raw samples, rounded down to whole top-level tokens.
    pub fn prompt_duration(&self, top_raw_to_tokens: usize) -> usize {
        let raw = (self.prompt_length_in_seconds * self.sr as f64) as usize;
        raw / top_raw_to_tokens * top_raw_to_tokens
    }
}

/// Fully resolved settings for one run, indexed by level (finest first)
#[derive(Debug, Clone, PartialEq)]
pub struct SamplePlan {
    pub key: RunKey,
    /// Root under which the run directory is created
    pub output_dir: PathBuf,
    /// Target length in raw samples
    pub sample_length: usize,
    pub sample_rate: u32,
    pub hop_fraction: Vec<f32>,
    pub sampling: Vec<SamplingConfig>,
    /// Per-call batch ceiling, never persisted
    pub max_batch_size: Vec<usize>,
}

impl SamplePlan {
    /// Stride between window starts at `level`.
    pub fn hop_length(&self, level: usize, n_ctx: usize) -> Result<usize> {
        let fraction = *self
            .hop_fraction
            .get(level)
            .ok_or(CascadeError::LevelOutOfRange {
                level,
                levels: self.hop_fraction.len(),
            })?;
        if !(fraction > 0.0 && fraction <= 1.0) {
            return Err(CascadeError::InvalidHopFraction { level, fraction });
        }
        let hop_length = (fraction * n_ctx as f32) as usize;
        if hop_length == 0 || hop_length > n_ctx {
            return Err(CascadeError::InvalidHopLength { hop_length, n_ctx });
        }
        Ok(hop_length)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prior::mock::MockPriorBank;
    use tempfile::tempdir;

    #[test]
    fn test_mode_parsing() {
        assert_eq!("Primed".parse::<SamplingMode>().unwrap(), SamplingMode::Primed);
        let err = "sideways".parse::<SamplingMode>().unwrap_err();
        assert!(err.is_configuration_error());
    }

    #[test]
    fn test_presets() {
        let one_b = ModelPreset::for_model("1b_lyrics");
        assert_eq!((one_b.top_chunk_size, one_b.top_max_batch_size), (32, 16));
        assert_eq!(one_b.job_samples, 16);

        let five_b = ModelPreset::for_model("5b_lyrics");
        assert_eq!((five_b.top_chunk_size, five_b.top_max_batch_size), (16, 3));
        assert_eq!(five_b.job_samples, 3);
        assert_eq!(five_b.lower_max_batch_size, 16);
    }

    #[test]
    fn test_validate_rejects_bad_hop_fraction() {
        let config = RunConfig {
            hop_fraction: vec![0.5, 1.5, 0.125],
            ..RunConfig::default()
        };
        assert_eq!(config.validate().unwrap_err().error_code(), "INVALID_HOP_FRACTION");
    }

    #[test]
    fn test_validate_mode_requirements() {
        let primed = RunConfig {
            mode: "primed".to_string(),
            ..RunConfig::default()
        };
        assert!(primed.validate().is_err());

        let upsample = RunConfig {
            mode: "upsample".to_string(),
            ..RunConfig::default()
        };
        assert!(upsample.validate().is_err());

        let unknown = RunConfig {
            mode: "sideways".to_string(),
            ..RunConfig::default()
        };
        assert_eq!(unknown.validate().unwrap_err().error_code(), "UNKNOWN_MODE");
    }

    #[test]
    fn test_plan_derives_aligned_length_and_presets() {
        let bank = MockPriorBank::uniform(3, &[2, 4, 8], 16);
        let config = RunConfig {
            sample_length_in_seconds: 1.0,
            sr: 100,
            model: "1b_lyrics".to_string(),
            ..RunConfig::default()
        };

        let plan = config.plan(bank.priors()).unwrap();
        assert_eq!(plan.sample_length, 96);
        assert_eq!(plan.max_batch_size, vec![16, 16, 16]);
        assert_eq!(plan.sampling[2].chunk_size, 32);
        assert_eq!(plan.hop_length(2, 16).unwrap(), 2);
    }

    #[test]
    fn test_prompt_must_be_shorter_than_sample() {
        let bank = MockPriorBank::uniform(3, &[1, 2, 4], 8);
        let config = RunConfig {
            mode: "primed".to_string(),
            audio_file: Some("a.wav".to_string()),
            prompt_length_in_seconds: 2.0,
            sample_length: Some(64),
            sr: 32,
            ..RunConfig::default()
        };
        assert!(config.plan(bank.priors()).is_err());
    }

    #[test]
    fn test_hop_length_rejects_degenerate_values() {
        let plan = SamplePlan {
            key: RunKey::new("1", "t"),
            output_dir: PathBuf::from("."),
            sample_length: 10,
            sample_rate: 10,
            hop_fraction: vec![0.01],
            sampling: vec![SamplingConfig::default()],
            max_batch_size: vec![1],
        };
        assert_eq!(plan.hop_length(0, 8).unwrap_err().error_code(), "INVALID_HOP_LENGTH");
        assert!(plan.hop_length(1, 8).is_err());
    }

    #[test]
    fn test_from_file_applies_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("run.json");
        fs::write(&path, r#"{"mode": "ancestral", "n_samples": 4, "audio_file": "a.wav, b.wav"}"#)
            .unwrap();

        let config = RunConfig::from_file(&path).unwrap();
        assert_eq!(config.n_samples, 4);
        assert_eq!(config.sr, DEFAULT_SAMPLE_RATE);
        assert_eq!(config.hop_fraction, DEFAULT_HOP_FRACTION.to_vec());
        assert_eq!(config.prompt_files().len(), 2);
    }
}
