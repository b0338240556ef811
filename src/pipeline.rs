//! Bulk deletion coordinator.
//!
//! Wires the stages of a run together:
//!
//! ```text
//! FileIngestor → Dispatcher (single / batch queues) → DeletionWorkers → FailureSink
//!                                      ↑
//!                              ProgressMonitor (idle detection)
//! ```
//!
//! The run ends when the monitor sees a full idle interval or when the
//! cancellation token fires. Workers are not joined; the coordinator only
//! flushes the failure file and closes the stats channel.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Result, anyhow};
use async_channel::{Receiver, Sender};
use tracing::{debug, error, info, warn};

use crate::backend::{Backend, MAX_DELETE_OBJECTS_KEYS, create_backend};
use crate::config::Config;
use crate::dispatcher::{Dispatcher, WorkQueues, create_dispatcher};
use crate::failure_sink::FailureSink;
use crate::ingestor::FileIngestor;
use crate::monitor::{FinalReport, ProgressMonitor, ProgressReporter};
use crate::types::error::S3BulkRmError;
use crate::types::token::{PipelineCancellationToken, create_pipeline_cancellation_token};
use crate::types::{DeletionStatistics, DeletionStats, DeletionStatsReport};
use crate::worker::{WorkerContext, spawn_workers};

/// Runs one list-driven bulk deletion.
///
/// ## Usage
///
/// ```no_run
/// # async fn example() -> anyhow::Result<()> {
/// use s3bulkrm_rs::{Config, DeletionPipeline, create_pipeline_cancellation_token};
///
/// let config = Config::for_input("targets.csv", "failures.csv");
/// let cancellation_token = create_pipeline_cancellation_token();
/// let mut pipeline = DeletionPipeline::new(config, cancellation_token).await?;
/// pipeline.close_stats_sender();
/// pipeline.run().await;
/// if pipeline.has_error() {
///     eprintln!("{:?}", pipeline.get_errors_and_consume().unwrap()[0]);
/// }
/// # Ok(())
/// # }
/// ```
pub struct DeletionPipeline {
    config: Config,
    backend: Backend,
    cancellation_token: PipelineCancellationToken,
    stats_sender: Sender<DeletionStatistics>,
    stats_receiver: Receiver<DeletionStatistics>,
    has_error: Arc<AtomicBool>,
    has_panic: Arc<AtomicBool>,
    has_warning: Arc<AtomicBool>,
    errors: Arc<Mutex<VecDeque<anyhow::Error>>>,
    ready: bool,
    deletion_stats_report: Arc<DeletionStatsReport>,
    final_report: Option<FinalReport>,
    failure_rows: u64,
}

impl DeletionPipeline {
    /// Create a pipeline with the backend selected by the configuration.
    pub async fn new(config: Config, cancellation_token: PipelineCancellationToken) -> Result<Self> {
        let backend = create_backend(&config).await?;
        Ok(Self::with_backend(config, backend, cancellation_token))
    }

    /// Create a pipeline around an existing backend.
    pub fn with_backend(
        config: Config,
        backend: Backend,
        cancellation_token: PipelineCancellationToken,
    ) -> Self {
        let (stats_sender, stats_receiver) = async_channel::unbounded();

        Self {
            config,
            backend,
            cancellation_token,
            stats_sender,
            stats_receiver,
            has_error: Arc::new(AtomicBool::new(false)),
            has_panic: Arc::new(AtomicBool::new(false)),
            has_warning: Arc::new(AtomicBool::new(false)),
            errors: Arc::new(Mutex::new(VecDeque::new())),
            ready: true,
            deletion_stats_report: Arc::new(DeletionStatsReport::new()),
            final_report: None,
            failure_rows: 0,
        }
    }

    /// Run the deletion to completion or cancellation.
    ///
    /// # Panics
    ///
    /// Panics if called more than once.
    pub async fn run(&mut self) {
        assert!(self.ready, "DeletionPipeline::run() called more than once");
        self.ready = false;

        if let Err(e) = self.validate_config() {
            self.record_error(e);
            self.shutdown();
            return;
        }

        self.execute_pipeline().await;

        self.shutdown();
    }

    pub fn has_error(&self) -> bool {
        self.has_error.load(Ordering::SeqCst)
    }

    pub fn has_panic(&self) -> bool {
        self.has_panic.load(Ordering::SeqCst)
    }

    /// True when at least one job was written to the failure file.
    pub fn has_warning(&self) -> bool {
        self.has_warning.load(Ordering::SeqCst)
    }

    /// Consume and return all accumulated errors.
    ///
    /// Returns `None` if no errors occurred.
    pub fn get_errors_and_consume(&self) -> Option<Vec<anyhow::Error>> {
        if !self.has_error() {
            return None;
        }
        let mut error_list = self.errors.lock().unwrap();
        let mut errors = Vec::with_capacity(error_list.len());
        while let Some(e) = error_list.pop_front() {
            errors.push(e);
        }
        Some(errors)
    }

    pub fn get_error_messages(&self) -> Option<Vec<String>> {
        if !self.has_error() {
            return None;
        }
        let error_list = self.errors.lock().unwrap();
        Some(error_list.iter().map(|e| format!("{e:#}")).collect())
    }

    /// Per-job events for live progress display.
    pub fn get_stats_receiver(&self) -> Receiver<DeletionStatistics> {
        self.stats_receiver.clone()
    }

    pub fn get_deletion_stats(&self) -> DeletionStats {
        self.deletion_stats_report.snapshot()
    }

    /// Close the stats channel. Call before `run()` when nobody reads it.
    pub fn close_stats_sender(&self) {
        self.stats_sender.close();
    }

    /// The summary of a run that completed by idle detection.
    pub fn final_report(&self) -> Option<FinalReport> {
        self.final_report
    }

    /// Rows written to the failure file.
    pub fn failure_rows(&self) -> u64 {
        self.failure_rows
    }

    /// Reject settings that would stall the run. The CLI already enforces
    /// these; library callers build `Config` by hand.
    fn validate_config(&self) -> Result<()> {
        let reason = if self.config.worker_size == 0 {
            "worker_size must be at least 1."
        } else if self.config.batch_size as usize > MAX_DELETE_OBJECTS_KEYS {
            "batch_size must be at most 1000."
        } else if self.config.idle_check_interval_milliseconds == 0 {
            "idle_check_interval_milliseconds must be at least 1."
        } else {
            return Ok(());
        };

        Err(anyhow!(S3BulkRmError::InvalidConfig(reason.to_string())))
    }

    async fn execute_pipeline(&mut self) {
        let ingestor = match FileIngestor::open(
            &self.config,
            self.deletion_stats_report.clone(),
            self.stats_sender.clone(),
            self.cancellation_token.clone(),
        )
        .await
        {
            Ok(ingestor) => ingestor,
            Err(e) => {
                self.record_error(e);
                return;
            }
        };

        let sink = match FailureSink::create(&self.config.failure_output_path) {
            Ok(sink) => sink,
            Err(e) => {
                self.record_error(e);
                return;
            }
        };

        info!(
            input = %self.config.input_path.display(),
            failure_output = %sink.path().display(),
            backend = self.backend.name(),
            worker_size = self.config.worker_size,
            batch_size = self.config.batch_size,
            dry_run = self.config.dry_run,
            "bulk deletion started."
        );

        let (dispatcher, work_queues) = create_dispatcher();
        let abandon_token = create_pipeline_cancellation_token();
        let reporter = ProgressReporter::new(self.config.is_batch_mode(), self.config.progress_pivot);

        self.ingest(ingestor, dispatcher);

        spawn_workers(WorkerContext {
            config: self.config.clone(),
            backend: dyn_clone::clone_box(&*self.backend),
            work_queues: work_queues.clone(),
            deletion_stats_report: self.deletion_stats_report.clone(),
            stats_sender: self.stats_sender.clone(),
            failure_recorder: sink.recorder(),
            reporter: reporter.clone(),
            cancellation_token: self.cancellation_token.clone(),
            abandon_token: abandon_token.clone(),
        });

        self.final_report = ProgressMonitor::new(
            Duration::from_millis(self.config.idle_check_interval_milliseconds),
            self.deletion_stats_report.clone(),
            work_queues.clone(),
            reporter,
            self.cancellation_token.clone(),
            abandon_token.clone(),
        )
        .run()
        .await;

        if self.final_report.is_none() {
            warn!(
                deleted = self.deletion_stats_report.deleted(),
                "bulk deletion has been cancelled."
            );
            self.wait_for_in_flight_requests(&abandon_token).await;
        }

        self.close_sink(sink, &work_queues).await;

        // A failed stage has already recorded why the run stopped.
        if self.final_report.is_none() && !self.has_error() {
            self.record_error(anyhow!(S3BulkRmError::Cancelled));
        }
    }

    /// Stage 1: read the input on its own task.
    ///
    /// Uses the double-spawn pattern to tell errors from panics. Ingestion is
    /// marked finished either way; a failure also cancels the run.
    fn ingest(&self, ingestor: FileIngestor, dispatcher: Dispatcher) {
        let has_error = self.has_error.clone();
        let has_panic = self.has_panic.clone();
        let error_list = self.errors.clone();
        let cancellation_token = self.cancellation_token.clone();
        let deletion_stats_report = self.deletion_stats_report.clone();

        tokio::spawn(async move {
            let join_result = tokio::spawn(ingestor.ingest(dispatcher)).await;
            deletion_stats_report.mark_ingestion_finished();

            match join_result {
                Ok(Ok(report)) => {
                    debug!(
                        jobs = report.jobs,
                        skipped_lines = report.skipped_lines,
                        "ingestor completed successfully."
                    );
                }
                Ok(Err(e)) => {
                    error!("ingestor failed: {:#}", e);
                    error_list.lock().unwrap().push_back(e);
                    has_error.store(true, Ordering::SeqCst);
                    // Only after the error is visible, so the coordinator
                    // does not report a plain cancellation.
                    cancellation_token.cancel();
                }
                Err(e) => {
                    error!("ingestor task panicked: {}", e);
                    error_list
                        .lock()
                        .unwrap()
                        .push_back(anyhow::anyhow!("ingestor task panicked: {}", e));
                    has_panic.store(true, Ordering::SeqCst);
                    has_error.store(true, Ordering::SeqCst);
                    cancellation_token.cancel();
                }
            }
        });
    }

    /// Give requests already sent a moment to finish so their outcome lands
    /// in the failure file. Requests still pending after that are abandoned
    /// and recorded as failed.
    async fn wait_for_in_flight_requests(&self, abandon_token: &PipelineCancellationToken) {
        const GRACE_PERIOD: Duration = Duration::from_secs(5);
        const ABANDON_PERIOD: Duration = Duration::from_secs(1);

        if self.wait_until_no_request_in_flight(GRACE_PERIOD).await {
            return;
        }

        warn!(
            in_flight = self.deletion_stats_report.in_flight(),
            "requests still in flight at shutdown. abandoning them."
        );
        abandon_token.cancel();

        if !self.wait_until_no_request_in_flight(ABANDON_PERIOD).await {
            warn!(
                in_flight = self.deletion_stats_report.in_flight(),
                "abandoned requests were not recorded."
            );
        }
    }

    async fn wait_until_no_request_in_flight(&self, limit: Duration) -> bool {
        const POLL_INTERVAL: Duration = Duration::from_millis(10);

        let waiting = async {
            while self.deletion_stats_report.in_flight() > 0 {
                tokio::time::sleep(POLL_INTERVAL).await;
            }
        };
        tokio::time::timeout(limit, waiting).await.is_ok()
    }

    async fn close_sink(&mut self, sink: FailureSink, work_queues: &WorkQueues) {
        work_queues.close();

        match sink.close().await {
            Ok(rows) => {
                self.failure_rows = rows;
                if rows > 0 {
                    self.has_warning.store(true, Ordering::SeqCst);
                    warn!(
                        rows = rows,
                        path = %self.config.failure_output_path.display(),
                        "some deletions failed. see the failure file."
                    );
                }
            }
            Err(e) => self.record_error(e),
        }
    }

    fn record_error(&self, error: anyhow::Error) {
        self.has_error.store(true, Ordering::SeqCst);
        self.errors.lock().unwrap().push_back(error);
    }

    fn shutdown(&self) {
        self.close_stats_sender();
    }
}
