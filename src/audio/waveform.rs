//! Batched raw audio
//!
//! A `Waveform` holds one mono signal per sample in the batch, all of the same
//! length, at a shared sample rate.

use std::ops::Range;

use serde::{Deserialize, Serialize};

use crate::error::{CascadeError, Result};
use crate::sampling::batch::Batched;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Waveform {
    /// Sample rate in Hz
    pub sample_rate: u32,
    items: Vec<Vec<f32>>,
}

impl Waveform {
    /// Create from per-sample signals. Signals must share a length.
    pub fn new(sample_rate: u32, items: Vec<Vec<f32>>) -> Result<Self> {
        if let Some(first) = items.first() {
            if items.iter().any(|i| i.len() != first.len()) {
                return Err(CascadeError::ShapeMismatch {
                    reason: "waveform items differ in length".to_string(),
                });
            }
        }
        Ok(Self { sample_rate, items })
    }

    /// `n_samples` silent signals of `frames` samples each.
    pub fn silence(sample_rate: u32, n_samples: usize, frames: usize) -> Self {
        Self {
            sample_rate,
            items: vec![vec![0.0; frames]; n_samples],
        }
    }

    /// A batch of identical sine tones, useful as a synthetic prompt.
    pub fn sine(sample_rate: u32, n_samples: usize, frames: usize, frequency: f32) -> Self {
        let angular_freq = 2.0 * std::f32::consts::PI * frequency / sample_rate as f32;
        let tone: Vec<f32> = (0..frames).map(|i| (angular_freq * i as f32).sin()).collect();
        Self {
            sample_rate,
            items: vec![tone; n_samples],
        }
    }

    pub fn n_samples(&self) -> usize {
        self.items.len()
    }

    /// Frames per sample.
    pub fn len(&self) -> usize {
        self.items.first().map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.len() as f64 / self.sample_rate as f64
    }

    pub fn items(&self) -> &[Vec<f32>] {
        &self.items
    }

    pub fn item(&self, index: usize) -> Option<&[f32]> {
        self.items.get(index).map(Vec::as_slice)
    }

    /// Peak absolute amplitude across the batch.
    pub fn peak(&self) -> f32 {
        self.items
            .iter()
            .flatten()
            .fold(0.0f32, |peak, s| peak.max(s.abs()))
    }
}

impl Batched for Waveform {
    fn slice_rows(&self, range: Range<usize>) -> Self {
        Self {
            sample_rate: self.sample_rate,
            items: self.items[range].to_vec(),
        }
    }

    fn concat_rows(parts: Vec<Self>) -> Self {
        let sample_rate = parts.first().map_or(0, |p| p.sample_rate);
        Self {
            sample_rate,
            items: parts.into_iter().flat_map(|p| p.items).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_ragged_items_rejected() {
        assert!(Waveform::new(44100, vec![vec![0.0; 4], vec![0.0; 3]]).is_err());
    }

    #[test]
    fn test_sine_peak_and_duration() {
        let wave = Waveform::sine(1000, 2, 1000, 10.0);
        assert_eq!(wave.n_samples(), 2);
        assert_relative_eq!(wave.duration_secs(), 1.0);
        assert_relative_eq!(wave.peak(), 1.0, epsilon = 1e-3);
    }
}
