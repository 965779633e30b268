//! WAV import and export
//!
//! Prompts are read with hound, mixed down to mono and resampled to the run's
//! sample rate. Decoded batches are written as one `item_<i>.wav` per sample.
//! Sample rate conversion uses linear interpolation.

use std::fs;
use std::path::{Path, PathBuf};

use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use log::info;

use crate::audio::waveform::Waveform;
use crate::error::{CascadeError, Result};

/// Bit depth used when writing WAV files
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BitDepth {
    Int16,
    Int24,
    Float32,
}

impl BitDepth {
    fn bits(self) -> u16 {
        match self {
            BitDepth::Int16 => 16,
            BitDepth::Int24 => 24,
            BitDepth::Float32 => 32,
        }
    }
}

/// Path of the WAV file for batch item `index` inside `dir`.
pub fn item_path(dir: &Path, index: usize) -> PathBuf {
    dir.join(format!("item_{}.wav", index))
}

/// Write every item of `waveform` to `dir/item_<i>.wav`.
///
/// Returns the written paths in batch order.
pub fn export_wav(dir: &Path, waveform: &Waveform, bit_depth: BitDepth) -> Result<Vec<PathBuf>> {
    fs::create_dir_all(dir).map_err(|e| CascadeError::DirectoryCreateError {
        path: dir.to_path_buf(),
        source: e,
    })?;

    let spec = WavSpec {
        channels: 1,
        sample_rate: waveform.sample_rate,
        bits_per_sample: bit_depth.bits(),
        sample_format: match bit_depth {
            BitDepth::Float32 => SampleFormat::Float,
            _ => SampleFormat::Int,
        },
    };

    let mut written = Vec::with_capacity(waveform.n_samples());
    for (index, item) in waveform.items().iter().enumerate() {
        let path = item_path(dir, index);
        let mut writer = WavWriter::create(&path, spec).map_err(|e| wav_write_error(&path, e))?;

        for &sample in item {
            let sample = sample.clamp(-1.0, 1.0);
            let written_sample = match bit_depth {
                BitDepth::Int16 => writer.write_sample((sample * 32767.0) as i16),
                // 24-bit stored as i32 in hound
                BitDepth::Int24 => writer.write_sample((sample * 8388607.0) as i32),
                BitDepth::Float32 => writer.write_sample(sample),
            };
            written_sample.map_err(|e| wav_write_error(&path, e))?;
        }

        writer.finalize().map_err(|e| wav_write_error(&path, e))?;
        written.push(path);
    }

    info!(
        "Wrote {} item(s) of {:.2}s to {}",
        written.len(),
        waveform.duration_secs(),
        dir.display()
    );
    Ok(written)
}

/// Load one prompt as mono audio at `sample_rate`, truncated to `duration` samples.
pub fn load_prompt(path: &Path, sample_rate: u32, duration: usize) -> Result<Vec<f32>> {
    if !path.exists() {
        return Err(CascadeError::FileNotFound {
            path: path.to_path_buf(),
        });
    }

    let reader = WavReader::open(path).map_err(|e| CascadeError::InvalidAudio {
        reason: format!("Failed to open WAV file {}: {}", path.display(), e),
        source: Some(Box::new(e)),
    })?;

    let spec = reader.spec();
    let channels = spec.channels.max(1) as usize;
    let interleaved = read_samples_as_f32(reader, spec.bits_per_sample, spec.sample_format)?;
    let mono = mix_to_mono(&interleaved, channels);

    let mut resampled = if spec.sample_rate != sample_rate {
        resample_linear(&mono, sample_rate as f64 / spec.sample_rate as f64)
    } else {
        mono
    };

    if resampled.len() < duration {
        return Err(CascadeError::PromptTooShort {
            path: path.to_path_buf(),
            available: resampled.len(),
            required: duration,
        });
    }
    resampled.truncate(duration);
    Ok(resampled)
}

/// Load `duration` samples of each prompt file and cycle them to fill `n_samples`.
pub fn load_prompts(
    paths: &[PathBuf],
    duration: usize,
    sample_rate: u32,
    n_samples: usize,
) -> Result<Waveform> {
    if paths.is_empty() {
        return Err(CascadeError::InvalidConfig {
            reason: "primed sampling needs at least one audio_file".to_string(),
        });
    }

    let prompts = paths
        .iter()
        .map(|p| load_prompt(p, sample_rate, duration))
        .collect::<Result<Vec<_>>>()?;

    let items: Vec<Vec<f32>> = prompts.iter().cycle().take(n_samples).cloned().collect();
    Waveform::new(sample_rate, items)
}

// ============================================================================
// Internal helper functions
// ============================================================================

fn wav_write_error(path: &Path, e: hound::Error) -> CascadeError {
    CascadeError::FileWriteError {
        path: path.to_path_buf(),
        source: std::io::Error::new(std::io::ErrorKind::Other, e.to_string()),
    }
}

/// Read samples from WAV reader and convert to f32
fn read_samples_as_f32<R: std::io::Read>(
    mut reader: WavReader<R>,
    bits_per_sample: u16,
    sample_format: SampleFormat,
) -> Result<Vec<f32>> {
    let invalid = |e: hound::Error| CascadeError::InvalidAudio {
        reason: format!("Failed to read {}-bit samples: {}", bits_per_sample, e),
        source: Some(Box::new(e)),
    };

    match (sample_format, bits_per_sample) {
        (SampleFormat::Float, _) => reader
            .samples::<f32>()
            .collect::<std::result::Result<Vec<f32>, _>>()
            .map_err(invalid),
        (SampleFormat::Int, 8) => reader
            .samples::<i8>()
            .map(|s| s.map(|v| v as f32 / 128.0))
            .collect::<std::result::Result<Vec<f32>, _>>()
            .map_err(invalid),
        (SampleFormat::Int, 16) => reader
            .samples::<i16>()
            .map(|s| s.map(|v| v as f32 / 32768.0))
            .collect::<std::result::Result<Vec<f32>, _>>()
            .map_err(invalid),
        (SampleFormat::Int, 24) => reader
            .samples::<i32>()
            .map(|s| s.map(|v| v as f32 / 8388608.0))
            .collect::<std::result::Result<Vec<f32>, _>>()
            .map_err(invalid),
        (SampleFormat::Int, 32) => reader
            .samples::<i32>()
            .map(|s| s.map(|v| v as f32 / 2147483648.0))
            .collect::<std::result::Result<Vec<f32>, _>>()
            .map_err(invalid),
        (SampleFormat::Int, bits) => Err(CascadeError::InvalidAudio {
            reason: format!("unsupported {}-bit integer audio", bits),
            source: None,
        }),
    }
}

/// Average interleaved frames down to one channel
fn mix_to_mono(samples: &[f32], channels: usize) -> Vec<f32> {
    if channels == 1 {
        return samples.to_vec();
    }
    samples
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}

/// Linear interpolation resampling
fn resample_linear(samples: &[f32], ratio: f64) -> Vec<f32> {
    if samples.is_empty() {
        return Vec::new();
    }

    let source_len = samples.len();
    let target_len = ((source_len as f64) * ratio).ceil() as usize;

    (0..target_len)
        .map(|i| {
            let src_pos = i as f64 / ratio;
            let src_idx = src_pos.floor() as usize;
            let frac = (src_pos - src_idx as f64) as f32;

            if src_idx + 1 < source_len {
                samples[src_idx] * (1.0 - frac) + samples[src_idx + 1] * frac
            } else if src_idx < source_len {
                samples[src_idx]
            } else {
                0.0
            }
        })
        .collect()
}
