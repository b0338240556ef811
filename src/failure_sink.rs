//! Durable record of jobs whose deletion failed.
//!
//! The file is a headerless CSV with one row per failed job: bucket, raw id,
//! deletion key (prefix already applied) and display name. A single blocking
//! task owns the writer; workers hand records over through an unbounded
//! channel, so recording a failure never waits on disk I/O.

use std::fs::File;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use async_channel::{Receiver, Sender};
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::types::Job;
use crate::types::error::S3BulkRmError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailureRecord {
    pub bucket: String,
    pub object_key: String,
    pub deletion_id: String,
    pub display_name: String,
}

impl From<&Job> for FailureRecord {
    fn from(job: &Job) -> Self {
        Self {
            bucket: job.bucket.clone(),
            object_key: job.object_key.clone(),
            deletion_id: job.deletion_id.clone(),
            display_name: job.display_name.clone(),
        }
    }
}

/// Cloneable handle used by workers to append failed jobs.
#[derive(Debug, Clone)]
pub struct FailureRecorder {
    sender: Sender<FailureRecord>,
}

impl FailureRecorder {
    pub fn record(&self, job: &Job) -> Result<()> {
        self.sender
            .try_send(FailureRecord::from(job))
            .map_err(|_| anyhow!(S3BulkRmError::Pipeline("failure sink is closed.".to_string())))
    }
}

pub struct FailureSink {
    path: PathBuf,
    recorder: FailureRecorder,
    writer: JoinHandle<Result<u64>>,
}

impl FailureSink {
    /// Create (or truncate) the failure file and start the writer task.
    ///
    /// Must be called from within a tokio runtime.
    pub fn create(path: &Path) -> Result<Self> {
        let file = File::create(path)
            .map_err(|e| anyhow!(S3BulkRmError::Io(e.to_string())))
            .with_context(|| format!("failed to create failure file: {}", path.display()))?;

        let (sender, receiver) = async_channel::unbounded();
        let writer = tokio::task::spawn_blocking(move || write_records(file, receiver));

        debug!(path = %path.display(), "failure file created.");

        Ok(Self {
            path: path.to_path_buf(),
            recorder: FailureRecorder { sender },
            writer,
        })
    }

    pub fn recorder(&self) -> FailureRecorder {
        self.recorder.clone()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Stop accepting records, drain what is queued, flush and return the
    /// number of rows written.
    pub async fn close(self) -> Result<u64> {
        self.recorder.sender.close();

        let rows = self
            .writer
            .await
            .context("failure file writer task panicked.")??;

        info!(
            path = %self.path.display(),
            rows = rows,
            "failure file closed."
        );

        Ok(rows)
    }
}

fn write_records(file: File, receiver: Receiver<FailureRecord>) -> Result<u64> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(file);
    let mut rows = 0;

    while let Ok(record) = receiver.recv_blocking() {
        writer
            .serialize(&record)
            .context("failed to write failure record.")?;
        rows += 1;

        if receiver.is_empty() {
            writer.flush().context("failed to flush failure file.")?;
        }
    }

    writer.flush().context("failed to flush failure file.")?;
    Ok(rows)
}
