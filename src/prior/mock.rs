//! Mock prior implementations for testing
//!
//! These priors don't run a model but follow the full prior contract with
//! deterministic, per-sample generation, so batch splitting never changes
//! their output. A toy scalar codec stands in for the VQ-VAE: every token is
//! the quantised mean of the raw samples it covers.
//!
//! Every call is recorded in a shared `MockTrace` for assertions.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::audio::Waveform;
use crate::codes::{Code, CodeBatch, CodeTable, CrossLevelConditioning, LabelBatch, SampleMetadata};
use crate::error::{CascadeError, Result};
use crate::prior::model::{Device, Labeller, Prior, PriorInfo, SampleRequest};
use crate::sampling::batch::map_in_groups;

/// Default vocabulary size of the mock codec.
pub const MOCK_VOCAB: u32 = 2048;

const ARTIST_BUCKETS: u64 = 4096;
const GENRE_BUCKETS: u64 = 512;

/// Label row layout: total length, offset, window length, artist, genre, lyrics...
const LABEL_OFFSET: usize = 1;
const LABEL_WINDOW: usize = 2;
const LABEL_HEADER: usize = 5;

/// Something a mock prior was asked to do
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockEvent {
    ToAccelerator {
        level: usize,
    },
    ToHost {
        level: usize,
    },
    Sample {
        level: usize,
        n_samples: usize,
        context_tokens: usize,
        sample_tokens: usize,
    },
    Encode {
        /// Level of the prior whose codec ran
        prior: usize,
        start_level: usize,
        end_level: usize,
        n_samples: usize,
    },
    Decode {
        prior: usize,
        start_level: usize,
        /// Code length of each decoded level, finest first
        level_lengths: Vec<usize>,
    },
}

/// Shared, thread-safe call log
#[derive(Debug, Clone, Default)]
pub struct MockTrace {
    events: Arc<Mutex<Vec<MockEvent>>>,
}

impl MockTrace {
    fn record(&self, event: MockEvent) {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(event);
    }

    pub fn events(&self) -> Vec<MockEvent> {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// `(n_samples, context_tokens, sample_tokens)` of every sample call at `level`.
    pub fn sample_calls(&self, level: usize) -> Vec<(usize, usize, usize)> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                MockEvent::Sample {
                    level: l,
                    n_samples,
                    context_tokens,
                    sample_tokens,
                } if l == level => Some((n_samples, context_tokens, sample_tokens)),
                _ => None,
            })
            .collect()
    }

    /// `(start_level, level_lengths)` of every decode call, in order.
    pub fn decode_calls(&self) -> Vec<(usize, Vec<usize>)> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                MockEvent::Decode {
                    start_level,
                    level_lengths,
                    ..
                } => Some((start_level, level_lengths)),
                _ => None,
            })
            .collect()
    }

    /// Most priors resident at the same time over the whole log.
    pub fn max_resident(&self) -> usize {
        let mut resident = 0usize;
        let mut max = 0usize;
        for event in self.events() {
            match event {
                MockEvent::ToAccelerator { .. } => {
                    resident += 1;
                    max = max.max(resident);
                }
                MockEvent::ToHost { .. } => resident = resident.saturating_sub(1),
                _ => {}
            }
        }
        max
    }
}

/// Toy scalar codec shared by all mock levels
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockCodec {
    /// Raw samples per token, finest level first
    pub raw_to_tokens: Vec<usize>,
    pub vocab: u32,
    pub sample_rate: u32,
}

impl MockCodec {
    pub fn quantize(&self, value: f32) -> Code {
        let unit = (value.clamp(-1.0, 1.0) + 1.0) / 2.0;
        (unit * (self.vocab - 1) as f32).round() as Code
    }

    pub fn dequantize(&self, code: Code) -> f32 {
        code.min(self.vocab - 1) as f32 / (self.vocab - 1) as f32 * 2.0 - 1.0
    }

    fn hop(&self, level: usize) -> Result<usize> {
        self.raw_to_tokens
            .get(level)
            .copied()
            .ok_or(CascadeError::LevelOutOfRange {
                level,
                levels: self.raw_to_tokens.len(),
            })
    }

    fn encode_level(&self, audio: &Waveform, level: usize) -> Result<CodeBatch> {
        let hop = self.hop(level)?;
        let rows = audio
            .items()
            .iter()
            .map(|item| {
                item.chunks_exact(hop)
                    .map(|chunk| self.quantize(chunk.iter().sum::<f32>() / hop as f32))
                    .collect()
            })
            .collect();
        CodeBatch::from_rows(rows)
    }

    fn decode_level(&self, codes: &CodeBatch, level: usize) -> Result<Waveform> {
        let hop = self.hop(level)?;
        let items = codes
            .rows()
            .iter()
            .map(|row| {
                row.iter()
                    .flat_map(|&c| std::iter::repeat(self.dequantize(c)).take(hop))
                    .collect()
            })
            .collect();
        Waveform::new(self.sample_rate, items)
    }
}

/// Labeller producing `[total_length, offset, window, artist, genre, lyrics...]` rows
#[derive(Debug, Clone)]
pub struct MockLabeller {
    /// Raw samples covered by one context window
    pub window_length: usize,
    pub text_tokens: usize,
}

impl Labeller for MockLabeller {
    fn batch_labels(&self, metas: &[SampleMetadata], _device: Device) -> Result<LabelBatch> {
        let rows = metas
            .iter()
            .map(|meta| {
                let mut row = vec![
                    meta.total_length as i64,
                    meta.offset as i64,
                    self.window_length as i64,
                    (fold_hash(meta.artist.as_bytes()) % ARTIST_BUCKETS) as i64,
                    (fold_hash(meta.genre.as_bytes()) % GENRE_BUCKETS) as i64,
                ];
                let lyrics = meta.lyrics.bytes().map(i64::from).chain(std::iter::repeat(0));
                row.extend(lyrics.take(self.text_tokens));
                row
            })
            .collect();

        Ok(LabelBatch {
            rows,
            info: metas.to_vec(),
        })
    }
}

/// Geometry of one mock level
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MockGeometry {
    pub n_ctx: usize,
    pub raw_to_tokens: usize,
    pub text_tokens: usize,
    /// Fail every sample call after this many have succeeded
    pub fail_after: Option<usize>,
}

impl MockGeometry {
    pub fn new(n_ctx: usize, raw_to_tokens: usize) -> Self {
        Self {
            n_ctx,
            raw_to_tokens,
            text_tokens: 0,
            fail_after: None,
        }
    }
}

/// Deterministic prior for one level
pub struct MockPrior {
    info: PriorInfo,
    upper_raw_to_tokens: Option<usize>,
    codec: MockCodec,
    labeller: MockLabeller,
    fail_after: Option<usize>,
    sample_count: AtomicUsize,
    resident: AtomicBool,
    trace: MockTrace,
}

impl MockPrior {
    fn generate_row(
        &self,
        context: &[Code],
        conditioning: Option<&[Code]>,
        label: &[i64],
        sample_tokens: usize,
        temperature: f32,
    ) -> Vec<Code> {
        let vocab = u64::from(self.codec.vocab);
        let seed = fold_hash_i64(label) ^ u64::from(temperature.to_bits());
        let first = (label.get(LABEL_OFFSET).copied().unwrap_or(0) as u64)
            / self.info.raw_to_tokens as u64;

        let mut row = context.to_vec();
        let mut prev = row.last().map_or(seed % vocab, |&c| u64::from(c));
        for pos in context.len()..sample_tokens {
            let cond = conditioning
                .filter(|c| !c.is_empty())
                .map_or(0, |c| u64::from(c[(pos * c.len() / sample_tokens).min(c.len() - 1)]));
            let next = prev
                .wrapping_mul(6364136223846793005)
                .wrapping_add(seed)
                .wrapping_add(cond.wrapping_mul(31))
                .wrapping_add(first + pos as u64)
                >> 17;
            prev = next % vocab;
            row.push(prev as Code);
        }
        row
    }

    fn contract_error(&self, reason: String) -> CascadeError {
        CascadeError::PriorContract {
            level: self.info.level,
            reason,
        }
    }
}

impl Prior for MockPrior {
    fn info(&self) -> &PriorInfo {
        &self.info
    }

    fn labeller(&self) -> &dyn Labeller {
        &self.labeller
    }

    fn cross_level_conditioning(
        &self,
        codes: &CodeTable,
        start: usize,
        end: usize,
    ) -> Result<CrossLevelConditioning> {
        let Some(upper) = self.upper_raw_to_tokens else {
            return Ok(None);
        };
        let ratio = (upper / self.info.raw_to_tokens).max(1);
        let upper_codes = codes.level(self.info.level + 1)?;
        Ok(Some(upper_codes.window(start / ratio, end.div_ceil(ratio))))
    }

    fn label_at(&self, labels: &LabelBatch, start: usize) -> Result<LabelBatch> {
        let mut shifted = labels.clone();
        for row in &mut shifted.rows {
            if row.len() < LABEL_HEADER {
                return Err(self.contract_error(format!("label row of length {}", row.len())));
            }
            row[LABEL_OFFSET] += (start * self.info.raw_to_tokens) as i64;
            row[LABEL_WINDOW] = (self.info.n_ctx * self.info.raw_to_tokens) as i64;
        }
        Ok(shifted)
    }

    fn sample(&self, request: SampleRequest<'_>) -> Result<CodeBatch> {
        if !self.is_resident() {
            return Err(CascadeError::Prior {
                level: self.info.level,
                reason: "sampled while not resident on the accelerator".to_string(),
            });
        }

        let done = self.sample_count.fetch_add(1, Ordering::SeqCst);
        if self.fail_after.is_some_and(|limit| done >= limit) {
            return Err(CascadeError::Prior {
                level: self.info.level,
                reason: "injected failure".to_string(),
            });
        }

        let n = request.n_samples;
        if request.context.n_samples() != n || request.label.n_samples() != n {
            return Err(self.contract_error(format!(
                "expected {} samples, got context {} / labels {}",
                n,
                request.context.n_samples(),
                request.label.n_samples()
            )));
        }
        if request.sample_tokens > self.info.n_ctx || request.context.len() > request.sample_tokens
        {
            return Err(self.contract_error(format!(
                "cannot sample {} tokens after {} with n_ctx {}",
                request.sample_tokens,
                request.context.len(),
                self.info.n_ctx
            )));
        }

        self.trace.record(MockEvent::Sample {
            level: self.info.level,
            n_samples: n,
            context_tokens: request.context.len(),
            sample_tokens: request.sample_tokens,
        });

        let rows = (0..n)
            .map(|i| {
                let conditioning = request
                    .conditioning
                    .as_ref()
                    .and_then(|c| c.row(i));
                self.generate_row(
                    &request.context.rows()[i],
                    conditioning,
                    &request.label.rows[i],
                    request.sample_tokens,
                    request.config.temperature,
                )
            })
            .collect();
        CodeBatch::from_rows(rows)
    }

    fn encode(
        &self,
        audio: &Waveform,
        start_level: usize,
        end_level: usize,
        batch_chunks: usize,
    ) -> Result<Vec<CodeBatch>> {
        if batch_chunks == 0 {
            return Err(CascadeError::Codec {
                reason: "batch_chunks must be positive".to_string(),
            });
        }
        self.trace.record(MockEvent::Encode {
            prior: self.info.level,
            start_level,
            end_level,
            n_samples: audio.n_samples(),
        });
        (start_level..end_level)
            .map(|level| self.codec.encode_level(audio, level))
            .collect()
    }

    fn decode(
        &self,
        codes: &[CodeBatch],
        start_level: usize,
        batch_chunks: usize,
    ) -> Result<Waveform> {
        let finest = codes.first().ok_or_else(|| CascadeError::Codec {
            reason: "nothing to decode".to_string(),
        })?;
        self.trace.record(MockEvent::Decode {
            prior: self.info.level,
            start_level,
            level_lengths: codes.iter().map(CodeBatch::len).collect(),
        });
        map_in_groups(finest, finest.n_samples(), batch_chunks.max(1), |_, group| {
            self.codec.decode_level(&group, start_level)
        })
    }

    fn move_to_accelerator(&self) -> Result<()> {
        self.resident.store(true, Ordering::SeqCst);
        self.trace.record(MockEvent::ToAccelerator {
            level: self.info.level,
        });
        Ok(())
    }

    fn move_to_host(&self) -> Result<()> {
        self.resident.store(false, Ordering::SeqCst);
        self.trace.record(MockEvent::ToHost {
            level: self.info.level,
        });
        Ok(())
    }

    fn is_resident(&self) -> bool {
        self.resident.load(Ordering::SeqCst)
    }
}

/// A full stack of mock priors sharing one codec and one trace
pub struct MockPriorBank {
    priors: Vec<Box<dyn Prior>>,
    codec: MockCodec,
    trace: MockTrace,
}

impl MockPriorBank {
    /// Build one prior per geometry, finest level first.
    pub fn new(geometries: &[MockGeometry], sample_rate: u32) -> Self {
        let trace = MockTrace::default();
        let codec = MockCodec {
            raw_to_tokens: geometries.iter().map(|g| g.raw_to_tokens).collect(),
            vocab: MOCK_VOCAB,
            sample_rate,
        };

        let priors = geometries
            .iter()
            .enumerate()
            .map(|(level, g)| {
                Box::new(MockPrior {
                    info: PriorInfo {
                        level,
                        n_ctx: g.n_ctx,
                        raw_to_tokens: g.raw_to_tokens,
                        text_token_count: g.text_tokens,
                    },
                    upper_raw_to_tokens: geometries.get(level + 1).map(|u| u.raw_to_tokens),
                    codec: codec.clone(),
                    labeller: MockLabeller {
                        window_length: g.n_ctx * g.raw_to_tokens,
                        text_tokens: g.text_tokens,
                    },
                    fail_after: g.fail_after,
                    sample_count: AtomicUsize::new(0),
                    resident: AtomicBool::new(false),
                    trace: trace.clone(),
                }) as Box<dyn Prior>
            })
            .collect();

        Self {
            priors,
            codec,
            trace,
        }
    }

    /// `levels` priors with a shared context length.
    pub fn uniform(levels: usize, raw_to_tokens: &[usize], n_ctx: usize) -> Self {
        let geometries: Vec<MockGeometry> = raw_to_tokens
            .iter()
            .take(levels)
            .map(|&r| MockGeometry::new(n_ctx, r))
            .collect();
        Self::new(&geometries, 44100)
    }

    /// Geometry resembling the released three-level models.
    pub fn for_model(model: &str, sample_rate: u32) -> Self {
        let text_tokens = match model {
            "5b_lyrics" => 512,
            "1b_lyrics" => 384,
            _ => 0,
        };
        let mut geometries = vec![
            MockGeometry::new(8192, 8),
            MockGeometry::new(8192, 32),
            MockGeometry::new(8192, 128),
        ];
        geometries[2].text_tokens = text_tokens;
        Self::new(&geometries, sample_rate)
    }

    pub fn priors(&self) -> &[Box<dyn Prior>] {
        &self.priors
    }

    pub fn into_priors(self) -> Vec<Box<dyn Prior>> {
        self.priors
    }

    pub fn codec(&self) -> &MockCodec {
        &self.codec
    }

    pub fn trace(&self) -> &MockTrace {
        &self.trace
    }
}

fn fold_hash(bytes: &[u8]) -> u64 {
    bytes.iter().fold(0xcbf29ce484222325u64, |h, &b| {
        (h ^ u64::from(b)).wrapping_mul(0x100000001b3)
    })
}

fn fold_hash_i64(values: &[i64]) -> u64 {
    values.iter().fold(0xcbf29ce484222325u64, |h, &v| {
        (h ^ v as u64).wrapping_mul(0x100000001b3)
    })
}
