use std::fmt;
use std::fmt::{Debug, Formatter};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use anyhow::{Result, anyhow};
use zeroize_derive::{Zeroize, ZeroizeOnDrop};

pub mod error;
pub mod token;

/// One object scheduled for deletion, parsed from a single input line.
///
/// `object_key` is the raw identifier column of the input. `deletion_id` is the
/// configured key prefix joined with the preview identifier column; it is the
/// key actually sent to the deletion backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    pub bucket: String,
    pub object_key: String,
    pub deletion_id: String,
    pub display_name: String,
}

impl Job {
    pub fn new(bucket: &str, object_key: &str, deletion_id: &str, display_name: &str) -> Self {
        Self {
            bucket: bucket.to_string(),
            object_key: object_key.to_string(),
            deletion_id: deletion_id.to_string(),
            display_name: display_name.to_string(),
        }
    }
}

/// A non-empty group of jobs that share one bucket, deleted with one
/// multi-key request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobBatch {
    jobs: Vec<Job>,
}

impl JobBatch {
    /// Build a batch, rejecting empty input and jobs that span buckets.
    pub fn new(jobs: Vec<Job>) -> Result<Self> {
        let Some(first) = jobs.first() else {
            return Err(anyhow!("a job batch must contain at least one job."));
        };

        if let Some(stray) = jobs.iter().find(|job| job.bucket != first.bucket) {
            return Err(anyhow!(
                "a job batch must target a single bucket: found '{}' and '{}'.",
                first.bucket,
                stray.bucket
            ));
        }

        Ok(Self { jobs })
    }

    pub fn bucket(&self) -> &str {
        &self.jobs[0].bucket
    }

    pub fn jobs(&self) -> &[Job] {
        &self.jobs
    }

    pub fn deletion_ids(&self) -> Vec<String> {
        self.jobs.iter().map(|job| job.deletion_id.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    pub fn into_jobs(self) -> Vec<Job> {
        self.jobs
    }
}

/// Statistics sent through the stats channel during pipeline execution.
#[derive(Debug, PartialEq)]
pub enum DeletionStatistics {
    DeleteComplete { key: String },
    DeleteError { key: String },
    LineSkipped { line_number: u64 },
}

/// Shared counters updated concurrently by the ingestor and the workers.
///
/// `deleted` only ever grows. `in_flight` counts jobs currently inside a
/// backend call and is used by the idle detector.
#[derive(Debug, Default)]
pub struct DeletionStatsReport {
    deleted: AtomicU64,
    failed: AtomicU64,
    in_flight: AtomicU64,
    ingested_jobs: AtomicU64,
    skipped_lines: AtomicU64,
    ingestion_finished: AtomicBool,
}

/// Point-in-time copy of [`DeletionStatsReport`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeletionStats {
    pub stats_deleted_objects: u64,
    pub stats_failed_objects: u64,
    pub stats_ingested_jobs: u64,
    pub stats_skipped_lines: u64,
}

impl DeletionStatsReport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `count` confirmed deletions and return the new total.
    pub fn increment_deleted(&self, count: u64) -> u64 {
        self.deleted.fetch_add(count, Ordering::SeqCst) + count
    }

    pub fn increment_failed(&self, count: u64) {
        self.failed.fetch_add(count, Ordering::SeqCst);
    }

    pub fn increment_ingested(&self) {
        self.ingested_jobs.fetch_add(1, Ordering::SeqCst);
    }

    pub fn increment_skipped_lines(&self) {
        self.skipped_lines.fetch_add(1, Ordering::SeqCst);
    }

    pub fn begin_request(&self, count: u64) {
        self.in_flight.fetch_add(count, Ordering::SeqCst);
    }

    pub fn end_request(&self, count: u64) {
        self.in_flight.fetch_sub(count, Ordering::SeqCst);
    }

    pub fn mark_ingestion_finished(&self) {
        self.ingestion_finished.store(true, Ordering::SeqCst);
    }

    pub fn is_ingestion_finished(&self) -> bool {
        self.ingestion_finished.load(Ordering::SeqCst)
    }

    pub fn deleted(&self) -> u64 {
        self.deleted.load(Ordering::SeqCst)
    }

    pub fn in_flight(&self) -> u64 {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Number of jobs whose deletion attempt has finished, either way.
    pub fn activity(&self) -> u64 {
        self.deleted.load(Ordering::SeqCst) + self.failed.load(Ordering::SeqCst)
    }

    pub fn snapshot(&self) -> DeletionStats {
        DeletionStats {
            stats_deleted_objects: self.deleted.load(Ordering::SeqCst),
            stats_failed_objects: self.failed.load(Ordering::SeqCst),
            stats_ingested_jobs: self.ingested_jobs.load(Ordering::SeqCst),
            stats_skipped_lines: self.skipped_lines.load(Ordering::SeqCst),
        }
    }
}

/// AWS configuration file locations.
#[derive(Debug, Clone, Default)]
pub struct ClientConfigLocation {
    pub aws_config_file: Option<PathBuf>,
    pub aws_shared_credentials_file: Option<PathBuf>,
}

/// AWS credential sources.
#[derive(Debug, Clone)]
pub enum S3Credentials {
    Profile(String),
    Credentials { access_keys: AccessKeys },
    FromEnvironment,
}

/// AWS access key pair, cleared from memory on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct AccessKeys {
    pub access_key: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
}

impl Debug for AccessKeys {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let mut keys = f.debug_struct("AccessKeys");
        let session_token = self
            .session_token
            .as_ref()
            .map_or("None", |_| "** redacted **");
        keys.field("access_key", &self.access_key)
            .field("secret_access_key", &"** redacted **")
            .field("session_token", &session_token);
        keys.finish()
    }
}
