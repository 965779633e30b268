//! Audio Module
//!
//! Raw audio handling around the sampler:
//! - Batched waveforms produced by decoding
//! - Prompt import for primed sampling
//! - WAV export

pub mod io;
pub mod waveform;

pub use io::{export_wav, item_path, load_prompt, load_prompts, BitDepth};
pub use waveform::Waveform;
