//! Turns the input list into deletion jobs.
//!
//! Each line holds at least four fields: bucket, raw id, preview id and
//! display name. The deletion key is the configured prefix followed by the
//! preview id. Lines with fewer fields are skipped with a warning.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use async_channel::Sender;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::dispatcher::Dispatcher;
use crate::types::error::S3BulkRmError;
use crate::types::token::PipelineCancellationToken;
use crate::types::{DeletionStatistics, DeletionStatsReport, Job, JobBatch};

const MIN_FIELDS: usize = 4;

/// Parse one input line. Extra fields are ignored.
pub fn parse_line(line: &str, separator: char, key_prefix: &str) -> Option<Job> {
    let mut fields = line.split(separator);
    let (Some(bucket), Some(object_key), Some(preview_id), Some(display_name)) =
        (fields.next(), fields.next(), fields.next(), fields.next())
    else {
        return None;
    };

    Some(Job {
        bucket: bucket.to_string(),
        object_key: object_key.to_string(),
        deletion_id: format!("{key_prefix}{preview_id}"),
        display_name: display_name.to_string(),
    })
}

/// Groups consecutive jobs into single-bucket batches of at most
/// `batch_size` jobs.
#[derive(Debug)]
pub struct JobBatcher {
    batch_size: usize,
    buffer: Vec<Job>,
}

impl JobBatcher {
    pub fn new(batch_size: usize) -> Self {
        let batch_size = batch_size.max(1);
        Self {
            batch_size,
            buffer: Vec::with_capacity(batch_size),
        }
    }

    /// Add a job, returning a batch when one is complete.
    ///
    /// A bucket change flushes the buffered jobs first. At most one batch
    /// comes out per call: after a bucket flush the buffer holds one job,
    /// and with a batch size of one the buffer is always empty beforehand.
    pub fn push(&mut self, job: Job) -> Option<JobBatch> {
        let flushed = if self
            .buffer
            .first()
            .is_some_and(|first| first.bucket != job.bucket)
        {
            self.take()
        } else {
            None
        };

        self.buffer.push(job);
        if self.buffer.len() >= self.batch_size {
            return self.take();
        }

        flushed
    }

    /// Emit the remaining jobs, if any.
    pub fn finish(&mut self) -> Option<JobBatch> {
        self.take()
    }

    fn take(&mut self) -> Option<JobBatch> {
        if self.buffer.is_empty() {
            return None;
        }
        let jobs = std::mem::replace(&mut self.buffer, Vec::with_capacity(self.batch_size));
        JobBatch::new(jobs).ok()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestReport {
    pub total_lines: u64,
    pub jobs: u64,
    pub skipped_lines: u64,
    pub batches: u64,
}

pub struct FileIngestor {
    path: PathBuf,
    reader: BufReader<File>,
    separator: char,
    key_prefix: String,
    batch_size: u16,
    deletion_stats_report: Arc<DeletionStatsReport>,
    stats_sender: Sender<DeletionStatistics>,
    cancellation_token: PipelineCancellationToken,
}

impl FileIngestor {
    pub async fn open(
        config: &Config,
        deletion_stats_report: Arc<DeletionStatsReport>,
        stats_sender: Sender<DeletionStatistics>,
        cancellation_token: PipelineCancellationToken,
    ) -> Result<Self> {
        let path = config.input_path.clone();
        let file = File::open(&path)
            .await
            .map_err(|e| anyhow!(S3BulkRmError::Io(e.to_string())))
            .with_context(|| format!("failed to open input file: {}", path.display()))?;

        Ok(Self {
            path,
            reader: BufReader::new(file),
            separator: config.separator,
            key_prefix: config.key_prefix.clone(),
            batch_size: config.batch_size,
            deletion_stats_report,
            stats_sender,
            cancellation_token,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the whole input and hand every job to the dispatcher.
    ///
    /// The dispatcher is consumed: once ingestion ends, for whatever reason,
    /// both queues are closed and the workers drain them.
    pub async fn ingest(mut self, dispatcher: Dispatcher) -> Result<IngestReport> {
        let mut report = IngestReport::default();
        let mut batcher = (self.batch_size > 0).then(|| JobBatcher::new(self.batch_size as usize));
        let mut buf = Vec::new();

        info!(
            path = %self.path.display(),
            batch_size = self.batch_size,
            "ingestion started."
        );

        loop {
            buf.clear();
            let read = tokio::select! {
                read = self.reader.read_until(b'\n', &mut buf) => {
                    read.with_context(|| format!("failed to read input file: {}", self.path.display()))?
                }
                _ = self.cancellation_token.cancelled() => {
                    info!(line = report.total_lines, "ingestion has been cancelled.");
                    return Ok(report);
                }
            };
            if read == 0 {
                break;
            }

            report.total_lines += 1;
            let line = String::from_utf8_lossy(&buf);
            let line = line.trim_end_matches(['\n', '\r']);

            let Some(job) = parse_line(line, self.separator, &self.key_prefix) else {
                warn!(
                    line_number = report.total_lines,
                    line = line,
                    "malformed input line: fewer than {} fields. skipping.",
                    MIN_FIELDS
                );
                report.skipped_lines += 1;
                self.deletion_stats_report.increment_skipped_lines();
                let _ = self
                    .stats_sender
                    .send(DeletionStatistics::LineSkipped {
                        line_number: report.total_lines,
                    })
                    .await;
                continue;
            };

            report.jobs += 1;
            self.deletion_stats_report.increment_ingested();

            let accepted = match batcher.as_mut() {
                None => self.dispatch_job(&dispatcher, job).await,
                Some(batcher) => match batcher.push(job) {
                    Some(batch) => {
                        report.batches += 1;
                        self.dispatch_batch(&dispatcher, batch).await
                    }
                    None => true,
                },
            };
            if !accepted {
                info!(
                    line = report.total_lines,
                    "work queues closed. ingestion stopped."
                );
                return Ok(report);
            }
        }

        if let Some(batch) = batcher.as_mut().and_then(JobBatcher::finish) {
            report.batches += 1;
            if !self.dispatch_batch(&dispatcher, batch).await {
                return Ok(report);
            }
        }

        info!(
            total_lines = report.total_lines,
            jobs = report.jobs,
            skipped_lines = report.skipped_lines,
            batches = report.batches,
            "ingestion completed."
        );

        Ok(report)
    }

    async fn dispatch_job(&self, dispatcher: &Dispatcher, job: Job) -> bool {
        debug!(
            bucket = job.bucket,
            key = job.deletion_id,
            "dispatching single job."
        );
        tokio::select! {
            accepted = dispatcher.dispatch_job(job) => accepted,
            _ = self.cancellation_token.cancelled() => false,
        }
    }

    async fn dispatch_batch(&self, dispatcher: &Dispatcher, batch: JobBatch) -> bool {
        debug!(
            bucket = batch.bucket(),
            job_count = batch.len(),
            "dispatching batch."
        );
        tokio::select! {
            accepted = dispatcher.dispatch_batch(batch) => accepted,
            _ = self.cancellation_token.cancelled() => false,
        }
    }
}
