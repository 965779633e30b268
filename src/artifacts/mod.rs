//! Run artifacts
//!
//! Everything a run leaves on disk lives under `<root>/<job_id>_<name>/`:
//! - `level_<l>/data.json` checkpoint bundles plus `manifest.json`
//! - `level_<l>/item_<i>.wav` decoded audio
//! - `level_<l>/report.json` visualization summaries

pub mod checkpoint;
pub mod export;

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{CascadeError, Result};

pub use checkpoint::{
    CheckpointBundle, CheckpointEntry, CheckpointManifest, CheckpointStore, DirectoryCheckpointStore,
};
pub use export::{
    Alignment, AlignmentExtractor, JsonReportExporter, UniformAlignment, VisualizationExporter,
    WavExporter, WaveformExporter,
};

/// Identifies one run's artifacts
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunKey {
    pub job_id: String,
    pub name: String,
}

impl RunKey {
    pub fn new(job_id: &str, name: &str) -> Self {
        Self {
            job_id: job_id.to_string(),
            name: name.to_string(),
        }
    }

    pub fn dir_name(&self) -> String {
        format!("{}_{}", self.job_id, self.name)
    }

    /// Directory holding every artifact of this run.
    pub fn run_dir(&self, root: &Path) -> PathBuf {
        root.join(self.dir_name())
    }

    /// Directory holding the artifacts of one level.
    pub fn level_dir(&self, root: &Path, level: usize) -> PathBuf {
        self.run_dir(root).join(format!("level_{}", level))
    }
}

/// Hex SHA-256 of `bytes`.
pub(crate) fn sha256_hex(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// Write `bytes` to a temporary sibling, sync it, then rename over `path`.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let parent = path.parent().ok_or_else(|| CascadeError::InvalidConfig {
        reason: format!("{} has no parent directory", path.display()),
    })?;
    fs::create_dir_all(parent).map_err(|e| CascadeError::DirectoryCreateError {
        path: parent.to_path_buf(),
        source: e,
    })?;

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let tmp = path.with_file_name(format!(
        "{}.tmp.{}.{}",
        file_name,
        std::process::id(),
        uuid::Uuid::new_v4().simple()
    ));

    let write_error = |e| CascadeError::FileWriteError {
        path: tmp.clone(),
        source: e,
    };
    {
        let mut file = OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&tmp)
            .map_err(write_error)?;
        file.write_all(bytes).map_err(write_error)?;
        file.sync_all().map_err(write_error)?;
    }

    fs::rename(&tmp, path).map_err(|e| CascadeError::FileWriteError {
        path: path.to_path_buf(),
        source: e,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_run_key_layout() {
        let key = RunKey::new("42", "demo");
        let root = Path::new("/runs");
        assert_eq!(key.dir_name(), "42_demo");
        assert_eq!(key.level_dir(root, 2), PathBuf::from("/runs/42_demo/level_2"));
    }

    #[test]
    fn test_write_atomic_replaces_and_leaves_no_temp() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("data.json");

        write_atomic(&path, b"first").unwrap();
        write_atomic(&path, b"second").unwrap();

        assert_eq!(fs::read(&path).unwrap(), b"second");
        let entries = fs::read_dir(path.parent().unwrap()).unwrap().count();
        assert_eq!(entries, 1);
    }

    #[test]
    fn test_sha256_hex() {
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
