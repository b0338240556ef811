//! Deletion workers.
//!
//! Each worker waits on both work queues at once and deletes whatever
//! arrives first. Failed jobs go to the failure sink; nothing is retried here.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, anyhow};
use async_channel::Sender;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::backend::Backend;
use crate::config::Config;
use crate::dispatcher::WorkQueues;
use crate::failure_sink::FailureRecorder;
use crate::monitor::ProgressReporter;
use crate::types::token::PipelineCancellationToken;
use crate::types::{DeletionStatistics, DeletionStatsReport, Job, JobBatch};

/// Everything a worker shares with its siblings.
#[derive(Clone)]
pub struct WorkerContext {
    pub config: Config,
    pub backend: Backend,
    pub work_queues: WorkQueues,
    pub deletion_stats_report: Arc<DeletionStatsReport>,
    pub stats_sender: Sender<DeletionStatistics>,
    pub failure_recorder: FailureRecorder,
    pub reporter: ProgressReporter,
    pub cancellation_token: PipelineCancellationToken,
    /// Cancelled when in-flight requests are given up on. The pending job
    /// then fails like any other backend error.
    pub abandon_token: PipelineCancellationToken,
}

pub struct DeletionWorker {
    worker_index: u16,
    context: WorkerContext,
}

impl DeletionWorker {
    pub fn new(worker_index: u16, context: WorkerContext) -> Self {
        Self {
            worker_index,
            context,
        }
    }

    pub async fn run(self) {
        debug!(worker_index = self.worker_index, "deletion worker started.");

        let queues = self.context.work_queues.clone();
        let mut single_closed = false;
        let mut batch_closed = false;

        while !(single_closed && batch_closed) {
            tokio::select! {
                result = queues.single_receiver.recv(), if !single_closed => {
                    match result {
                        Ok(job) => self.delete_single(job).await,
                        Err(_) => single_closed = true,
                    }
                }
                result = queues.batch_receiver.recv(), if !batch_closed => {
                    match result {
                        Ok(batch) => self.delete_batch(batch).await,
                        Err(_) => batch_closed = true,
                    }
                }
                _ = self.context.cancellation_token.cancelled() => {
                    info!(worker_index = self.worker_index, "deletion worker has been cancelled.");
                    return;
                }
            }
        }

        debug!(worker_index = self.worker_index, "deletion worker has been completed.");
    }

    async fn delete_single(&self, job: Job) {
        let stats = &self.context.deletion_stats_report;

        if self.context.config.dry_run {
            info!(
                bucket = job.bucket,
                key = job.deletion_id,
                "[dry-run] delete completed."
            );
            self.on_deleted(&job).await;
            return;
        }

        stats.begin_request(1);
        let result = self
            .abandonable(
                self.context
                    .backend
                    .delete_object(&job.bucket, &job.deletion_id),
            )
            .await;

        match result {
            Ok(()) => {
                debug!(
                    worker_index = self.worker_index,
                    bucket = job.bucket,
                    key = job.deletion_id,
                    "delete completed."
                );
                self.on_deleted(&job).await;
            }
            Err(e) => {
                warn!(
                    worker_index = self.worker_index,
                    bucket = job.bucket,
                    key = job.deletion_id,
                    name = job.display_name,
                    error = format!("{e:#}"),
                    "failed to delete object. recorded to the failure file."
                );
                self.on_failed(&job).await;
            }
        }

        // Released only once the outcome is counted and recorded.
        stats.end_request(1);
    }

    async fn delete_batch(&self, batch: JobBatch) {
        let stats = &self.context.deletion_stats_report;
        let count = batch.len() as u64;

        if self.context.config.dry_run {
            info!(
                bucket = batch.bucket(),
                job_count = count,
                "[dry-run] batch delete completed."
            );
            for job in batch.jobs() {
                self.send_stats(DeletionStatistics::DeleteComplete {
                    key: job.deletion_id.clone(),
                })
                .await;
            }
            let total = stats.increment_deleted(count);
            self.context.reporter.on_deleted(stats, total);
            return;
        }

        stats.begin_request(count);
        let deletion_ids = batch.deletion_ids();
        let result = self
            .abandonable(
                self.context
                    .backend
                    .delete_objects(batch.bucket(), &deletion_ids),
            )
            .await;

        let confirmed: HashSet<String> = match result {
            Ok(result) => {
                for failed in &result.failed {
                    warn!(
                        worker_index = self.worker_index,
                        bucket = batch.bucket(),
                        key = failed.key,
                        error_code = failed.error_code,
                        error_message = failed.error_message,
                        "object in batch was not deleted. recorded to the failure file."
                    );
                }
                result.deleted.into_iter().map(|deleted| deleted.key).collect()
            }
            Err(e) => {
                error!(
                    worker_index = self.worker_index,
                    bucket = batch.bucket(),
                    job_count = count,
                    error = format!("{e:#}"),
                    "batch delete failed. every job of the batch recorded to the failure file."
                );
                HashSet::new()
            }
        };

        // Jobs the backend did not confirm are treated as failed.
        let mut deleted = 0;
        for job in batch.jobs() {
            if confirmed.contains(&job.deletion_id) {
                deleted += 1;
                self.send_stats(DeletionStatistics::DeleteComplete {
                    key: job.deletion_id.clone(),
                })
                .await;
            } else {
                self.on_failed(job).await;
            }
        }

        if deleted > 0 {
            let total = stats.increment_deleted(deleted);
            self.context.reporter.on_deleted(stats, total);
        }
        stats.end_request(count);
    }

    async fn abandonable<T>(&self, request: impl Future<Output = Result<T>>) -> Result<T> {
        tokio::select! {
            result = request => result,
            _ = self.context.abandon_token.cancelled() => {
                Err(anyhow!("request abandoned after making no progress."))
            }
        }
    }

    async fn on_deleted(&self, job: &Job) {
        let stats = &self.context.deletion_stats_report;
        let total = stats.increment_deleted(1);
        self.send_stats(DeletionStatistics::DeleteComplete {
            key: job.deletion_id.clone(),
        })
        .await;
        self.context.reporter.on_deleted(stats, total);
    }

    async fn on_failed(&self, job: &Job) {
        if let Err(e) = self.context.failure_recorder.record(job) {
            error!(
                worker_index = self.worker_index,
                bucket = job.bucket,
                key = job.deletion_id,
                error = format!("{e:#}"),
                "failed to record failed job."
            );
        }
        self.context.deletion_stats_report.increment_failed(1);
        self.send_stats(DeletionStatistics::DeleteError {
            key: job.deletion_id.clone(),
        })
        .await;
    }

    async fn send_stats(&self, stats: DeletionStatistics) {
        let _ = self.context.stats_sender.send(stats).await;
    }
}

/// Start `worker_size` workers, one every `ramp_up` interval.
///
/// The returned handle completes once the last worker has been started; the
/// workers themselves are detached.
pub fn spawn_workers(context: WorkerContext) -> JoinHandle<()> {
    let worker_size = context.config.worker_size;
    let ramp_up = Duration::from_millis(context.config.worker_ramp_up_milliseconds);

    tokio::spawn(async move {
        for worker_index in 0..worker_size {
            if worker_index > 0 && !ramp_up.is_zero() {
                tokio::select! {
                    _ = tokio::time::sleep(ramp_up) => {}
                    _ = context.cancellation_token.cancelled() => {
                        debug!(started = worker_index, "worker ramp-up has been cancelled.");
                        return;
                    }
                }
            }

            let worker = DeletionWorker::new(worker_index, context.clone());
            tokio::spawn(worker.run());
        }

        debug!(worker_size = worker_size, "all deletion workers started.");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::{Dispatcher, create_dispatcher};
    use crate::failure_sink::FailureSink;
    use crate::test_utils::{MockBackend, init_dummy_tracing_subscriber, make_test_config};
    use crate::types::token::create_pipeline_cancellation_token;

    struct Harness {
        dispatcher: Dispatcher,
        context: WorkerContext,
        sink: FailureSink,
        stats_receiver: async_channel::Receiver<DeletionStatistics>,
        _dir: tempfile::TempDir,
    }

    fn harness(backend: MockBackend, config: Config) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let sink = FailureSink::create(&dir.path().join("failed.csv")).unwrap();
        let (dispatcher, work_queues) = create_dispatcher();
        let (stats_sender, stats_receiver) = async_channel::unbounded();

        let context = WorkerContext {
            reporter: ProgressReporter::new(config.is_batch_mode(), config.progress_pivot),
            config,
            backend: Box::new(backend),
            work_queues,
            deletion_stats_report: Arc::new(DeletionStatsReport::new()),
            stats_sender,
            failure_recorder: sink.recorder(),
            cancellation_token: create_pipeline_cancellation_token(),
            abandon_token: create_pipeline_cancellation_token(),
        };

        Harness {
            dispatcher,
            context,
            sink,
            stats_receiver,
            _dir: dir,
        }
    }

    async fn run_one_worker(harness: &Harness) {
        DeletionWorker::new(0, harness.context.clone()).run().await;
    }

    fn batch(jobs: &[Job]) -> JobBatch {
        JobBatch::new(jobs.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn single_job_success_counts_deletion() {
        init_dummy_tracing_subscriber();

        let backend = MockBackend::new();
        let h = harness(backend.clone(), make_test_config("in.csv", "out.csv"));
        let job = Job::new("bA", "id1", "p1", "n1");

        h.dispatcher.dispatch_job(job).await;
        h.dispatcher.close();
        run_one_worker(&h).await;

        assert_eq!(backend.single_calls(), vec![("bA".to_string(), "p1".to_string())]);
        assert_eq!(h.context.deletion_stats_report.deleted(), 1);
        assert_eq!(
            h.stats_receiver.try_recv().unwrap(),
            DeletionStatistics::DeleteComplete {
                key: "p1".to_string()
            }
        );
        assert_eq!(h.sink.close().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn single_job_failure_is_recorded() {
        init_dummy_tracing_subscriber();

        let backend = MockBackend::new().fail_key("p2");
        let h = harness(backend, make_test_config("in.csv", "out.csv"));

        h.dispatcher
            .dispatch_job(Job::new("bA", "id1", "p1", "n1"))
            .await;
        let worker = tokio::spawn(DeletionWorker::new(0, h.context.clone()).run());
        h.dispatcher
            .dispatch_job(Job::new("bA", "id2", "p2", "n2"))
            .await;
        h.dispatcher.close();
        worker.await.unwrap();

        let snapshot = h.context.deletion_stats_report.snapshot();
        assert_eq!(snapshot.stats_deleted_objects, 1);
        assert_eq!(snapshot.stats_failed_objects, 1);
        assert_eq!(h.context.deletion_stats_report.in_flight(), 0);
        assert_eq!(h.sink.close().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn batch_counts_only_confirmed_keys() {
        init_dummy_tracing_subscriber();

        let backend = MockBackend::new().fail_key("p2");
        let config = Config {
            batch_size: 3,
            ..make_test_config("in.csv", "out.csv")
        };
        let h = harness(backend.clone(), config);

        h.dispatcher
            .dispatch_batch(batch(&[
                Job::new("bA", "id1", "p1", "n1"),
                Job::new("bA", "id2", "p2", "n2"),
                Job::new("bA", "id3", "p3", "n3"),
            ]))
            .await;
        h.dispatcher.close();
        run_one_worker(&h).await;

        assert_eq!(backend.batch_calls().len(), 1);
        let snapshot = h.context.deletion_stats_report.snapshot();
        assert_eq!(snapshot.stats_deleted_objects, 2);
        assert_eq!(snapshot.stats_failed_objects, 1);
        assert_eq!(h.sink.close().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn whole_batch_failure_records_every_job() {
        init_dummy_tracing_subscriber();

        let backend = MockBackend::new().fail_batches();
        let config = Config {
            batch_size: 2,
            ..make_test_config("in.csv", "out.csv")
        };
        let h = harness(backend, config);

        h.dispatcher
            .dispatch_batch(batch(&[
                Job::new("bA", "id1", "p1", "n1"),
                Job::new("bA", "id2", "p2", "n2"),
            ]))
            .await;
        h.dispatcher.close();
        run_one_worker(&h).await;

        let snapshot = h.context.deletion_stats_report.snapshot();
        assert_eq!(snapshot.stats_deleted_objects, 0);
        assert_eq!(snapshot.stats_failed_objects, 2);
        assert_eq!(h.sink.close().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn dry_run_skips_backend() {
        init_dummy_tracing_subscriber();

        let backend = MockBackend::new().fail_key("p1").fail_batches();
        let config = Config {
            dry_run: true,
            ..make_test_config("in.csv", "out.csv")
        };
        let h = harness(backend.clone(), config);

        h.dispatcher
            .dispatch_job(Job::new("bA", "id1", "p1", "n1"))
            .await;
        let worker = tokio::spawn(DeletionWorker::new(0, h.context.clone()).run());
        h.dispatcher
            .dispatch_batch(batch(&[
                Job::new("bA", "id2", "p2", "n2"),
                Job::new("bA", "id3", "p3", "n3"),
            ]))
            .await;
        h.dispatcher.close();
        worker.await.unwrap();

        assert!(backend.single_calls().is_empty());
        assert!(backend.batch_calls().is_empty());
        assert_eq!(h.context.deletion_stats_report.deleted(), 3);
        assert_eq!(h.sink.close().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn cancelled_worker_exits() {
        init_dummy_tracing_subscriber();

        let h = harness(MockBackend::new(), make_test_config("in.csv", "out.csv"));
        h.context.cancellation_token.cancel();

        // Queues stay open, so only cancellation can end the worker.
        run_one_worker(&h).await;
        assert_eq!(h.context.deletion_stats_report.deleted(), 0);
    }

    #[tokio::test]
    async fn pool_processes_every_job_once() {
        init_dummy_tracing_subscriber();

        let backend = MockBackend::new();
        let config = Config {
            worker_size: 4,
            ..make_test_config("in.csv", "out.csv")
        };
        let h = harness(backend.clone(), config);

        spawn_workers(h.context.clone()).await.unwrap();
        for i in 0..50 {
            let id = i.to_string();
            assert!(h.dispatcher.dispatch_job(Job::new("b", &id, &id, "n")).await);
        }
        h.dispatcher.close();

        while h.context.deletion_stats_report.deleted() < 50 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        let mut keys: Vec<u32> = backend
            .single_calls()
            .into_iter()
            .map(|(_, key)| key.parse().unwrap())
            .collect();
        keys.sort();
        assert_eq!(keys, (0..50).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn abandoned_single_request_is_recorded_as_failed() {
        init_dummy_tracing_subscriber();

        let backend = MockBackend::new().hang_key("p1");
        let h = harness(backend, make_test_config("in.csv", "out.csv"));

        h.dispatcher
            .dispatch_job(Job::new("bA", "id1", "p1", "n1"))
            .await;
        h.dispatcher.close();
        let worker = tokio::spawn(DeletionWorker::new(0, h.context.clone()).run());

        while h.context.deletion_stats_report.in_flight() == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        h.context.abandon_token.cancel();
        worker.await.unwrap();

        let snapshot = h.context.deletion_stats_report.snapshot();
        assert_eq!(snapshot.stats_failed_objects, 1);
        assert_eq!(h.context.deletion_stats_report.in_flight(), 0);
        assert_eq!(h.sink.close().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn abandoned_batch_records_every_job() {
        init_dummy_tracing_subscriber();

        let backend = MockBackend::new().hang_key("p2");
        let config = Config {
            batch_size: 2,
            ..make_test_config("in.csv", "out.csv")
        };
        let h = harness(backend, config);

        h.dispatcher
            .dispatch_batch(batch(&[
                Job::new("bA", "id1", "p1", "n1"),
                Job::new("bA", "id2", "p2", "n2"),
            ]))
            .await;
        h.dispatcher.close();
        let worker = tokio::spawn(DeletionWorker::new(0, h.context.clone()).run());

        while h.context.deletion_stats_report.in_flight() == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        h.context.abandon_token.cancel();
        worker.await.unwrap();

        assert_eq!(
            h.context
                .deletion_stats_report
                .snapshot()
                .stats_failed_objects,
            2
        );
        assert_eq!(h.sink.close().await.unwrap(), 2);
    }
}
