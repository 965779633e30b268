//! Job queue
//!
//! Requests to generate music arrive through a `JobQueue`. The directory
//! implementation keeps one JSON file per job. Taking a job creates a
//! `<job_id>.lock` file with `create_new`, so when several workers share a
//! queue directory only one of them can lock a given job.

use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use log::debug;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use walkdir::WalkDir;

use crate::artifacts::write_atomic;
use crate::error::{CascadeError, Result};

const JOB_EXTENSION: &str = ".json";
const LOCK_EXTENSION: &str = ".lock";

/// Where a job is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    TopReady,
    TopStarted,
    UpsamplingReady,
    UpsamplingDone,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::TopReady => "top_ready",
            JobStatus::TopStarted => "top_started",
            JobStatus::UpsamplingReady => "upsampling_ready",
            JobStatus::UpsamplingDone => "upsampling_done",
            JobStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What to generate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobParams {
    pub artist: String,
    pub genre: String,
    pub lyrics: String,
    /// Song length in seconds
    pub length: f64,
    pub model: String,
    pub name: String,
}

impl JobParams {
    pub fn validate(&self) -> Result<()> {
        if self.artist.trim().is_empty() {
            return Err(CascadeError::InvalidJob {
                reason: "an artist must be provided".to_string(),
            });
        }
        if self.genre.trim().is_empty() {
            return Err(CascadeError::InvalidJob {
                reason: "a genre must be provided".to_string(),
            });
        }
        if !(self.length > 0.0) {
            return Err(CascadeError::InvalidJob {
                reason: format!("length must be positive, got {}", self.length),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub job_id: String,
    pub name: String,
    pub locked: bool,
    pub status: JobStatus,
    pub params: JobParams,
    #[serde(default)]
    pub log: Vec<String>,
    pub created_at: DateTime<Utc>,
}

/// Storage for pending and finished jobs
pub trait JobQueue {
    /// Add a job with status `top_ready`.
    fn submit(&self, params: JobParams) -> Result<Job>;

    /// The oldest unlocked job with `status`, if any.
    fn next_job(&self, status: JobStatus) -> Result<Option<Job>>;

    fn get(&self, job_id: &str) -> Result<Job>;

    /// Keep other workers from taking the job.
    fn lock(&self, job_id: &str) -> Result<()>;

    fn unlock(&self, job_id: &str) -> Result<()>;

    fn update_status(&self, job_id: &str, status: JobStatus) -> Result<()>;

    fn append_log(&self, job_id: &str, message: &str) -> Result<()>;
}

/// One `<job_id>.json` file per job
#[derive(Debug, Clone)]
pub struct DirectoryJobQueue {
    dir: PathBuf,
}

impl DirectoryJobQueue {
    /// Open a queue directory, creating it if needed.
    pub fn open(dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir).map_err(|e| CascadeError::DirectoryCreateError {
            path: dir.to_path_buf(),
            source: e,
        })?;
        Ok(Self {
            dir: dir.to_path_buf(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn job_path(&self, job_id: &str) -> PathBuf {
        self.dir.join(format!("{}{}", job_id, JOB_EXTENSION))
    }

    fn lock_path(&self, job_id: &str) -> PathBuf {
        self.dir.join(format!("{}{}", job_id, LOCK_EXTENSION))
    }

    fn read_job(path: &Path) -> Result<Job> {
        let content = fs::read_to_string(path).map_err(|e| CascadeError::FileReadError {
            path: path.to_path_buf(),
            source: e,
        })?;
        let job: Job = serde_json::from_str(&content)?;
        Ok(job)
    }

    fn write_job(&self, job: &Job) -> Result<()> {
        let content = serde_json::to_string_pretty(job)?;
        write_atomic(&self.job_path(&job.job_id), content.as_bytes())
    }

    fn modify<F>(&self, job_id: &str, change: F) -> Result<()>
    where
        F: FnOnce(&mut Job),
    {
        let mut job = self.get(job_id)?;
        change(&mut job);
        self.write_job(&job)
    }

    /// Every job in the queue, oldest first.
    pub fn list(&self) -> Result<Vec<Job>> {
        let mut jobs = WalkDir::new(&self.dir)
            .max_depth(1)
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_file())
            .filter(|entry| entry.file_name().to_string_lossy().ends_with(JOB_EXTENSION))
            .map(|entry| Self::read_job(entry.path()))
            .collect::<Result<Vec<Job>>>()?;

        jobs.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.job_id.cmp(&b.job_id))
        });
        Ok(jobs)
    }
}

impl JobQueue for DirectoryJobQueue {
    fn submit(&self, params: JobParams) -> Result<Job> {
        params.validate()?;
        let job = Job {
            job_id: Uuid::new_v4().simple().to_string(),
            name: params.name.clone(),
            locked: false,
            status: JobStatus::TopReady,
            params,
            log: Vec::new(),
            created_at: Utc::now(),
        };
        self.write_job(&job)?;
        debug!("Queued job {} ({})", job.job_id, job.name);
        Ok(job)
    }

    fn next_job(&self, status: JobStatus) -> Result<Option<Job>> {
        Ok(self
            .list()?
            .into_iter()
            .find(|job| {
                !job.locked && job.status == status && !self.lock_path(&job.job_id).exists()
            }))
    }

    fn get(&self, job_id: &str) -> Result<Job> {
        let path = self.job_path(job_id);
        if !path.exists() {
            return Err(CascadeError::JobNotFound {
                job_id: job_id.to_string(),
            });
        }
        Self::read_job(&path)
    }

    fn lock(&self, job_id: &str) -> Result<()> {
        self.get(job_id)?;
        let path = self.lock_path(job_id);
        OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|e| match e.kind() {
                ErrorKind::AlreadyExists => CascadeError::JobLocked {
                    job_id: job_id.to_string(),
                },
                _ => CascadeError::FileWriteError {
                    path: path.clone(),
                    source: e,
                },
            })?;
        self.modify(job_id, |job| job.locked = true)
    }

    fn unlock(&self, job_id: &str) -> Result<()> {
        self.modify(job_id, |job| job.locked = false)?;
        let path = self.lock_path(job_id);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CascadeError::FileWriteError { path, source: e }),
        }
    }

    fn update_status(&self, job_id: &str, status: JobStatus) -> Result<()> {
        self.modify(job_id, |job| job.status = status)
    }

    fn append_log(&self, job_id: &str, message: &str) -> Result<()> {
        self.modify(job_id, |job| job.log.push(message.to_string()))
    }
}
