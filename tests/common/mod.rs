//! Shared fixtures for integration tests

#![allow(dead_code)]

use std::path::Path;

use cascade::artifacts::{
    DirectoryCheckpointStore, JsonReportExporter, RunKey, UniformAlignment, WavExporter,
};
use cascade::prior::Prior;
use cascade::sampling::{batch_labels, Collaborators};
use cascade::{LabelBatch, SamplePlan, SampleMetadata, SamplingConfig};

pub const SAMPLE_RATE: u32 = 100;

/// Artifact sinks writing under one directory
pub struct Sinks {
    pub store: DirectoryCheckpointStore,
    pub waveforms: WavExporter,
}

impl Sinks {
    pub fn new(root: &Path) -> Self {
        Self {
            store: DirectoryCheckpointStore::new(root),
            waveforms: WavExporter::default(),
        }
    }

    pub fn collaborators(&self) -> Collaborators<'_> {
        Collaborators {
            checkpoints: &self.store,
            waveforms: &self.waveforms,
            alignment: &UniformAlignment,
            visualization: &JsonReportExporter,
        }
    }
}

pub fn plan(root: &Path, sample_length: usize, levels: usize, max_batch_size: usize) -> SamplePlan {
    SamplePlan {
        key: RunKey::new("test", "run"),
        output_dir: root.to_path_buf(),
        sample_length,
        sample_rate: SAMPLE_RATE,
        hop_fraction: vec![0.5; levels],
        sampling: vec![SamplingConfig::default(); levels],
        max_batch_size: vec![max_batch_size; levels],
    }
}

pub fn labels(priors: &[Box<dyn Prior>], n_samples: usize, lyrics: &str) -> Vec<LabelBatch> {
    let meta = SampleMetadata {
        artist: "unknown".to_string(),
        genre: "ambient".to_string(),
        lyrics: lyrics.to_string(),
        total_length: 4096,
        offset: 0,
    };
    let metas = SampleMetadata::fill_batch(&[meta], n_samples).unwrap();
    batch_labels(priors, &metas).unwrap()
}
