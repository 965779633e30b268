//! Export collaborators
//!
//! Called by the orchestrator after each level is decoded:
//! - `WaveformExporter` writes the decoded audio
//! - `AlignmentExtractor` maps lyric tokens onto the audio timeline
//! - `VisualizationExporter` writes a browsable summary

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::artifacts::write_atomic;
use crate::audio::{export_wav, BitDepth, Waveform};
use crate::codes::{CodeTable, LabelBatch};
use crate::error::Result;
use crate::prior::PriorInfo;

pub const REPORT_FILE: &str = "report.json";

/// Writes decoded audio for one level
pub trait WaveformExporter {
    fn export(&self, dir: &Path, waveform: &Waveform, sample_rate: u32) -> Result<()>;
}

/// One lyric token placed on the audio timeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlignedToken {
    pub text: String,
    pub start_secs: f64,
    pub end_secs: f64,
}

/// Lyric alignment per sample
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Alignment {
    pub items: Vec<Vec<AlignedToken>>,
}

/// Derives a lyric alignment from decoded audio and the top level's labels
pub trait AlignmentExtractor {
    fn extract(
        &self,
        waveform: &Waveform,
        codes: &CodeTable,
        labels: &LabelBatch,
        fp16: bool,
        prior: &PriorInfo,
    ) -> Result<Alignment>;
}

/// Writes a visualization artifact for one level
pub trait VisualizationExporter {
    fn export(
        &self,
        dir: &Path,
        waveform: &Waveform,
        codes: &CodeTable,
        labels: &LabelBatch,
        alignment: Option<&Alignment>,
    ) -> Result<()>;
}

/// `item_<i>.wav` per sample
#[derive(Debug, Clone, Copy)]
pub struct WavExporter {
    pub bit_depth: BitDepth,
}

impl Default for WavExporter {
    fn default() -> Self {
        Self {
            bit_depth: BitDepth::Int16,
        }
    }
}

impl WaveformExporter for WavExporter {
    fn export(&self, dir: &Path, waveform: &Waveform, sample_rate: u32) -> Result<()> {
        let mut waveform = waveform.clone();
        waveform.sample_rate = sample_rate;
        export_wav(dir, &waveform, self.bit_depth)?;
        Ok(())
    }
}

/// Spreads each sample's lyric words evenly over its duration.
///
/// Only the first `text_token_count` characters of the lyrics are considered,
/// matching what the top prior actually conditions on.
#[derive(Debug, Clone, Copy, Default)]
pub struct UniformAlignment;

impl AlignmentExtractor for UniformAlignment {
    fn extract(
        &self,
        waveform: &Waveform,
        _codes: &CodeTable,
        labels: &LabelBatch,
        _fp16: bool,
        prior: &PriorInfo,
    ) -> Result<Alignment> {
        let duration = waveform.duration_secs();
        let items = labels
            .info
            .iter()
            .map(|meta| {
                let visible: String = meta.lyrics.chars().take(prior.text_token_count).collect();
                let words: Vec<&str> = visible.split_whitespace().collect();
                let step = duration / words.len().max(1) as f64;
                words
                    .iter()
                    .enumerate()
                    .map(|(i, word)| AlignedToken {
                        text: word.to_string(),
                        start_secs: i as f64 * step,
                        end_secs: (i + 1) as f64 * step,
                    })
                    .collect()
            })
            .collect();
        Ok(Alignment { items })
    }
}

/// Summary written as `report.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LevelSummary {
    pub code_lengths: Vec<usize>,
    pub n_samples: usize,
    pub sample_rate: u32,
    pub duration_secs: f64,
    pub peak: f32,
    pub artists: Vec<String>,
    pub genres: Vec<String>,
    pub alignment: Option<Alignment>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct JsonReportExporter;

impl JsonReportExporter {
    pub fn report_path(dir: &Path) -> PathBuf {
        dir.join(REPORT_FILE)
    }
}

impl VisualizationExporter for JsonReportExporter {
    fn export(
        &self,
        dir: &Path,
        waveform: &Waveform,
        codes: &CodeTable,
        labels: &LabelBatch,
        alignment: Option<&Alignment>,
    ) -> Result<()> {
        let summary = LevelSummary {
            code_lengths: codes.lengths(),
            n_samples: waveform.n_samples(),
            sample_rate: waveform.sample_rate,
            duration_secs: waveform.duration_secs(),
            peak: waveform.peak(),
            artists: labels.info.iter().map(|m| m.artist.clone()).collect(),
            genres: labels.info.iter().map(|m| m.genre.clone()).collect(),
            alignment: alignment.cloned(),
        };
        let content = serde_json::to_string_pretty(&summary)?;
        write_atomic(&Self::report_path(dir), content.as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codes::SampleMetadata;
    use approx::assert_relative_eq;
    use tempfile::tempdir;

    fn labels(lyrics: &str) -> LabelBatch {
        LabelBatch {
            rows: vec![vec![0; 5]],
            info: vec![SampleMetadata {
                artist: "alan_jackson".to_string(),
                genre: "country".to_string(),
                lyrics: lyrics.to_string(),
                total_length: 400,
                offset: 0,
            }],
        }
    }

    fn top_info(text_token_count: usize) -> PriorInfo {
        PriorInfo {
            level: 2,
            n_ctx: 8,
            raw_to_tokens: 4,
            text_token_count,
        }
    }

    #[test]
    fn test_uniform_alignment_spreads_words() {
        let wave = Waveform::silence(100, 1, 400);
        let alignment = UniformAlignment
            .extract(&wave, &CodeTable::empty(3, 1), &labels("one two three four"), true, &top_info(64))
            .unwrap();

        let words = &alignment.items[0];
        assert_eq!(words.len(), 4);
        assert_eq!(words[2].text, "three");
        assert_relative_eq!(words[2].start_secs, 2.0);
        assert_relative_eq!(words[3].end_secs, 4.0);
    }

    #[test]
    fn test_alignment_respects_text_token_count() {
        let wave = Waveform::silence(100, 1, 100);
        let alignment = UniformAlignment
            .extract(&wave, &CodeTable::empty(3, 1), &labels("one two three"), false, &top_info(7))
            .unwrap();
        let words: Vec<&str> = alignment.items[0].iter().map(|t| t.text.as_str()).collect();
        assert_eq!(words, vec!["one", "two"]);
    }

    #[test]
    fn test_report_and_wav_export() {
        let dir = tempdir().unwrap();
        let wave = Waveform::sine(100, 2, 50, 5.0);
        let codes = CodeTable::empty(3, 2);
        let mut labels = labels("");
        labels.info.push(labels.info[0].clone());

        WavExporter::default().export(dir.path(), &wave, 100).unwrap();
        JsonReportExporter
            .export(dir.path(), &wave, &codes, &labels, None)
            .unwrap();

        assert!(dir.path().join("item_1.wav").exists());
        let content = std::fs::read_to_string(JsonReportExporter::report_path(dir.path())).unwrap();
        let summary: LevelSummary = serde_json::from_str(&content).unwrap();
        assert_eq!(summary.code_lengths, vec![0, 0, 0]);
        assert_eq!(summary.artists.len(), 2);
        assert!(summary.alignment.is_none());
    }
}
