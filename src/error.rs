//! Error handling for Cascade
//!
//! Every failure is fatal to the run that raised it. Levels that were already
//! checkpointed stay valid on disk and can be resumed by hand.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for Cascade operations
pub type Result<T> = std::result::Result<T, CascadeError>;

/// Main error type for Cascade operations
#[derive(Error, Debug)]
pub enum CascadeError {
    // Configuration Errors
    #[error(
        "Sample length {sample_length} is not a multiple of raw_to_tokens {raw_to_tokens} at level {level}"
    )]
    LengthNotAligned {
        level: usize,
        sample_length: usize,
        raw_to_tokens: usize,
    },

    #[error(
        "Upsampling needs at least one context window at level {level}: {tokens} tokens < n_ctx {n_ctx}. Choose a longer sample length"
    )]
    UpsampleTooShort {
        level: usize,
        tokens: usize,
        n_ctx: usize,
    },

    #[error("Unknown sample mode: {mode}")]
    UnknownMode { mode: String },

    #[error("Invalid hop fraction {fraction} at level {level} (expected 0 < fraction <= 1)")]
    InvalidHopFraction { level: usize, fraction: f32 },

    #[error("Invalid hop length {hop_length} for context length {n_ctx}")]
    InvalidHopLength { hop_length: usize, n_ctx: usize },

    #[error("Context length {n_ctx} exceeds target length {total_length}; use a partial window")]
    WindowExceedsTarget { total_length: usize, n_ctx: usize },

    #[error("Max batch size must be positive (level {level})")]
    InvalidBatchSize { level: usize },

    #[error("Invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    #[error("Level {level} out of range ({levels} levels)")]
    LevelOutOfRange { level: usize, levels: usize },

    // Shape / Contract Errors
    #[error("Shape mismatch: {reason}")]
    ShapeMismatch { reason: String },

    #[error("Prior at level {level} violated its contract: {reason}")]
    PriorContract { level: usize, reason: String },

    #[error("Level {level} cannot move from {from} to {to}")]
    InvalidTransition {
        level: usize,
        from: &'static str,
        to: &'static str,
    },

    // Collaborator Errors
    #[error("Prior error at level {level}: {reason}")]
    Prior { level: usize, reason: String },

    #[error("Codec error: {reason}")]
    Codec { reason: String },

    #[error("Invalid audio file: {reason}")]
    InvalidAudio {
        reason: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Prompt too short: {path} has {available} samples, {required} required")]
    PromptTooShort {
        path: PathBuf,
        available: usize,
        required: usize,
    },

    // File Errors
    #[error("File not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("Failed to read file: {path}: {source}")]
    FileReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write file: {path}: {source}")]
    FileWriteError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Directory creation failed: {path}: {source}")]
    DirectoryCreateError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // Checkpoint Errors
    #[error("No checkpoint for level {level} under {path}")]
    CheckpointNotFound { level: usize, path: PathBuf },

    #[error("Checksum mismatch for {path}: expected {expected}, found {actual}")]
    ChecksumMismatch {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    // Job Queue Errors
    #[error("Unknown job: {job_id}")]
    JobNotFound { job_id: String },

    #[error("Invalid job: {reason}")]
    InvalidJob { reason: String },

    #[error("Job {job_id} is already locked by another worker")]
    JobLocked { job_id: String },

    // I/O Errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Serialization Errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl CascadeError {
    /// Get the error code for this error type
    pub fn error_code(&self) -> &'static str {
        match self {
            CascadeError::LengthNotAligned { .. } => "LENGTH_NOT_ALIGNED",
            CascadeError::UpsampleTooShort { .. } => "UPSAMPLE_TOO_SHORT",
            CascadeError::UnknownMode { .. } => "UNKNOWN_MODE",
            CascadeError::InvalidHopFraction { .. } => "INVALID_HOP_FRACTION",
            CascadeError::InvalidHopLength { .. } => "INVALID_HOP_LENGTH",
            CascadeError::WindowExceedsTarget { .. } => "WINDOW_EXCEEDS_TARGET",
            CascadeError::InvalidBatchSize { .. } => "INVALID_BATCH_SIZE",
            CascadeError::InvalidConfig { .. } => "INVALID_CONFIG",
            CascadeError::LevelOutOfRange { .. } => "LEVEL_OUT_OF_RANGE",
            CascadeError::ShapeMismatch { .. } => "SHAPE_MISMATCH",
            CascadeError::PriorContract { .. } => "PRIOR_CONTRACT",
            CascadeError::InvalidTransition { .. } => "INVALID_TRANSITION",
            CascadeError::Prior { .. } => "PRIOR_ERROR",
            CascadeError::Codec { .. } => "CODEC_ERROR",
            CascadeError::InvalidAudio { .. } => "INVALID_AUDIO",
            CascadeError::PromptTooShort { .. } => "PROMPT_TOO_SHORT",
            CascadeError::FileNotFound { .. } => "FILE_NOT_FOUND",
            CascadeError::FileReadError { .. } => "FILE_READ_ERROR",
            CascadeError::FileWriteError { .. } => "FILE_WRITE_ERROR",
            CascadeError::DirectoryCreateError { .. } => "DIRECTORY_CREATE_ERROR",
            CascadeError::CheckpointNotFound { .. } => "CHECKPOINT_NOT_FOUND",
            CascadeError::ChecksumMismatch { .. } => "CHECKSUM_MISMATCH",
            CascadeError::JobNotFound { .. } => "JOB_NOT_FOUND",
            CascadeError::InvalidJob { .. } => "INVALID_JOB",
            CascadeError::JobLocked { .. } => "JOB_LOCKED",
            CascadeError::Io(_) => "IO_ERROR",
            CascadeError::Serialization(_) => "SERIALIZATION_ERROR",
        }
    }

    /// True for errors raised while validating a run, before any sampling.
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            CascadeError::LengthNotAligned { .. }
                | CascadeError::UpsampleTooShort { .. }
                | CascadeError::UnknownMode { .. }
                | CascadeError::InvalidHopFraction { .. }
                | CascadeError::InvalidHopLength { .. }
                | CascadeError::InvalidBatchSize { .. }
                | CascadeError::InvalidConfig { .. }
                | CascadeError::LevelOutOfRange { .. }
        )
    }

    /// Returns a user-facing recovery suggestion.
    pub fn recovery_suggestion(&self) -> Option<&'static str> {
        match self {
            CascadeError::LengthNotAligned { .. } => {
                Some("Round the sample length down to a multiple of the top level's raw_to_tokens.")
            }
            CascadeError::UpsampleTooShort { .. } => Some("Choose a longer sample length."),
            CascadeError::UnknownMode { .. } => Some("Valid modes: ancestral, primed, upsample."),
            CascadeError::InvalidHopFraction { .. } => {
                Some("Use hop fractions in (0, 1], e.g. [0.5, 0.5, 0.125].")
            }
            CascadeError::InvalidBatchSize { .. } => Some("Set max_batch_size to at least 1."),
            CascadeError::PromptTooShort { .. } => {
                Some("Lower prompt_length_in_seconds or use a longer prompt file.")
            }
            CascadeError::ChecksumMismatch { .. } => {
                Some("The checkpoint was modified or partially written; re-run that level.")
            }
            CascadeError::Prior { .. } => {
                Some("Lower max_batch_size if the accelerator ran out of memory.")
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        let err = CascadeError::UnknownMode {
            mode: "sideways".to_string(),
        };
        assert_eq!(err.error_code(), "UNKNOWN_MODE");
        assert!(err.to_string().contains("sideways"));
    }

    #[test]
    fn test_configuration_errors_are_flagged() {
        let err = CascadeError::LengthNotAligned {
            level: 2,
            sample_length: 1000,
            raw_to_tokens: 128,
        };
        assert!(err.is_configuration_error());
        assert!(err.recovery_suggestion().is_some());

        let io = CascadeError::Io(std::io::Error::new(std::io::ErrorKind::Other, "boom"));
        assert!(!io.is_configuration_error());
    }
}
