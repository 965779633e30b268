//! Per-level checkpoint bundles
//!
//! After a level is decoded the whole run state is persisted as one bundle
//! per level. Bundles are written atomically and indexed in a manifest that
//! records their SHA-256 digest, which is verified on load.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use log::info;
use serde::{Deserialize, Serialize};

use crate::artifacts::{sha256_hex, write_atomic, RunKey};
use crate::audio::Waveform;
use crate::codes::{CodeTable, LabelBatch};
use crate::config::SamplingConfig;
use crate::error::{CascadeError, Result};

const BUNDLE_FILE: &str = "data.json";
const MANIFEST_FILE: &str = "manifest.json";

/// Everything needed to resume or inspect a run after `level` finished
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointBundle {
    pub key: RunKey,
    pub level: usize,
    /// Codes of every level, finest first
    pub codes: CodeTable,
    /// Labels per level
    pub labels: Vec<LabelBatch>,
    /// Persisted sampling settings per level
    pub sampling: Vec<SamplingConfig>,
    /// Audio decoded from `level` upward
    pub waveform: Waveform,
    pub created_at: DateTime<Utc>,
}

/// Manifest record of one saved bundle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointEntry {
    /// Path relative to the run directory
    pub path: PathBuf,
    pub sha256: String,
    pub size_bytes: u64,
    pub created_at: DateTime<Utc>,
}

/// Index of the bundles saved for one run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CheckpointManifest {
    pub levels: BTreeMap<usize, CheckpointEntry>,
}

/// Durable storage keyed by `(job_id, name, level)`
pub trait CheckpointStore {
    /// Persist a bundle, returning where it was written.
    fn save(&self, bundle: &CheckpointBundle) -> Result<PathBuf>;

    fn load(&self, key: &RunKey, level: usize) -> Result<CheckpointBundle>;

    /// Levels with a saved bundle, ascending.
    fn list_levels(&self, key: &RunKey) -> Result<Vec<usize>>;
}

/// Checkpoint store rooted at a directory
#[derive(Debug, Clone)]
pub struct DirectoryCheckpointStore {
    root: PathBuf,
}

impl DirectoryCheckpointStore {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn bundle_path(&self, key: &RunKey, level: usize) -> PathBuf {
        key.level_dir(&self.root, level).join(BUNDLE_FILE)
    }

    fn manifest_path(&self, key: &RunKey) -> PathBuf {
        key.run_dir(&self.root).join(MANIFEST_FILE)
    }

    /// Load the manifest of a run; missing manifests are empty.
    pub fn load_manifest(&self, key: &RunKey) -> Result<CheckpointManifest> {
        let manifest_path = self.manifest_path(key);
        if !manifest_path.exists() {
            return Ok(CheckpointManifest::default());
        }

        let content = fs::read_to_string(&manifest_path).map_err(|e| {
            CascadeError::FileReadError {
                path: manifest_path.clone(),
                source: e,
            }
        })?;
        let manifest: CheckpointManifest = serde_json::from_str(&content)?;
        Ok(manifest)
    }

    fn save_manifest(&self, key: &RunKey, manifest: &CheckpointManifest) -> Result<()> {
        let content = serde_json::to_string_pretty(manifest)?;
        write_atomic(&self.manifest_path(key), content.as_bytes())
    }

    /// Read a bundle file directly, without a manifest.
    pub fn load_bundle(path: &Path) -> Result<CheckpointBundle> {
        if !path.exists() {
            return Err(CascadeError::FileNotFound {
                path: path.to_path_buf(),
            });
        }
        let content = fs::read(path).map_err(|e| CascadeError::FileReadError {
            path: path.to_path_buf(),
            source: e,
        })?;
        let bundle: CheckpointBundle = serde_json::from_slice(&content)?;
        Ok(bundle)
    }
}

impl CheckpointStore for DirectoryCheckpointStore {
    fn save(&self, bundle: &CheckpointBundle) -> Result<PathBuf> {
        let path = self.bundle_path(&bundle.key, bundle.level);
        let content = serde_json::to_vec(bundle)?;
        write_atomic(&path, &content)?;

        let mut manifest = self.load_manifest(&bundle.key)?;
        let relative = PathBuf::from(format!("level_{}", bundle.level)).join(BUNDLE_FILE);
        manifest.levels.insert(
            bundle.level,
            CheckpointEntry {
                path: relative,
                sha256: sha256_hex(&content),
                size_bytes: content.len() as u64,
                created_at: bundle.created_at,
            },
        );
        self.save_manifest(&bundle.key, &manifest)?;

        info!(
            "Checkpointed level {} ({} bytes) to {}",
            bundle.level,
            content.len(),
            path.display()
        );
        Ok(path)
    }

    fn load(&self, key: &RunKey, level: usize) -> Result<CheckpointBundle> {
        let manifest = self.load_manifest(key)?;
        let entry = manifest
            .levels
            .get(&level)
            .ok_or_else(|| CascadeError::CheckpointNotFound {
                level,
                path: key.run_dir(&self.root),
            })?;

        let path = key.run_dir(&self.root).join(&entry.path);
        let content = fs::read(&path).map_err(|e| CascadeError::FileReadError {
            path: path.clone(),
            source: e,
        })?;

        let actual = sha256_hex(&content);
        if actual != entry.sha256 {
            return Err(CascadeError::ChecksumMismatch {
                path,
                expected: entry.sha256.clone(),
                actual,
            });
        }

        let bundle: CheckpointBundle = serde_json::from_slice(&content)?;
        Ok(bundle)
    }

    fn list_levels(&self, key: &RunKey) -> Result<Vec<usize>> {
        Ok(self.load_manifest(key)?.levels.into_keys().collect())
    }
}
