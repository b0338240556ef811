//! Progress printing and idle-based completion detection.
//!
//! A run has no explicit end marker: it is complete once a whole check
//! interval passes with no finished deletion attempt, nothing in flight and
//! the whole input ingested.
//!
//! A request that never answers would hold the run open forever. Once the
//! input is exhausted and the only thing left is in-flight requests with no
//! progress for [`STALLED_INTERVAL_LIMIT`] intervals, the monitor abandons
//! them; the workers record those jobs as failed and the run completes.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::dispatcher::WorkQueues;
use crate::types::DeletionStatsReport;
use crate::types::token::PipelineCancellationToken;

/// Summary logged when a run completes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FinalReport {
    pub elapsed_seconds: f64,
    pub objects_per_sec: u64,
    pub deleted: u64,
    pub failed: u64,
}

/// Decides when progress is printed and formats the progress events.
#[derive(Debug, Clone)]
pub struct ProgressReporter {
    batch_mode: bool,
    pivot: u64,
    started: Instant,
}

impl ProgressReporter {
    pub fn new(batch_mode: bool, pivot: u64) -> Self {
        Self {
            batch_mode,
            pivot,
            started: Instant::now(),
        }
    }

    /// Whether a print is due after the deleted counter reached `total`.
    pub fn should_report(&self, total: u64) -> bool {
        if self.batch_mode {
            return true;
        }
        self.pivot != 0 && total % self.pivot == 0
    }

    /// Called by workers after each successful deletion.
    pub fn on_deleted(&self, stats: &DeletionStatsReport, total: u64) {
        if self.should_report(total) {
            self.report(stats);
        }
    }

    pub fn report(&self, stats: &DeletionStatsReport) {
        let snapshot = stats.snapshot();
        info!(
            deleted = snapshot.stats_deleted_objects,
            failed = snapshot.stats_failed_objects,
            objects_per_sec = objects_per_sec(snapshot.stats_deleted_objects, self.elapsed()),
            "{} objects deleted.",
            snapshot.stats_deleted_objects
        );
    }

    pub fn final_report(&self, stats: &DeletionStatsReport) -> FinalReport {
        let snapshot = stats.snapshot();
        let elapsed = self.elapsed();
        let report = FinalReport {
            elapsed_seconds: elapsed.as_secs_f64(),
            objects_per_sec: objects_per_sec(snapshot.stats_deleted_objects, elapsed),
            deleted: snapshot.stats_deleted_objects,
            failed: snapshot.stats_failed_objects,
        };

        info!(
            deleted = report.deleted,
            failed = report.failed,
            objects_per_sec = report.objects_per_sec,
            elapsed_seconds = format!("{:.3}", report.elapsed_seconds),
            "deletion completed. {} objects deleted in {:.3} seconds.",
            report.deleted,
            report.elapsed_seconds
        );

        report
    }

    fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

/// Mean rate rounded to the nearest integer.
pub fn objects_per_sec(count: u64, elapsed: Duration) -> u64 {
    let seconds = elapsed.as_secs_f64();
    if seconds <= 0.0 {
        return 0;
    }
    (count as f64 / seconds).round() as u64
}

/// Idle intervals tolerated with requests still in flight before they are
/// abandoned.
pub const STALLED_INTERVAL_LIMIT: u32 = 4;

pub struct ProgressMonitor {
    check_interval: Duration,
    deletion_stats_report: Arc<DeletionStatsReport>,
    work_queues: WorkQueues,
    reporter: ProgressReporter,
    cancellation_token: PipelineCancellationToken,
    abandon_token: PipelineCancellationToken,
}

impl ProgressMonitor {
    pub fn new(
        check_interval: Duration,
        deletion_stats_report: Arc<DeletionStatsReport>,
        work_queues: WorkQueues,
        reporter: ProgressReporter,
        cancellation_token: PipelineCancellationToken,
        abandon_token: PipelineCancellationToken,
    ) -> Self {
        Self {
            check_interval,
            deletion_stats_report,
            work_queues,
            reporter,
            cancellation_token,
            abandon_token,
        }
    }

    /// Wait until the run is idle and return the final report, or `None` if
    /// cancelled first.
    pub async fn run(self) -> Option<FinalReport> {
        let mut interval = tokio::time::interval(self.check_interval);
        // The first tick fires immediately.
        interval.tick().await;

        let mut last_activity = self.deletion_stats_report.activity();
        let mut stalled_intervals: u32 = 0;

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let activity = self.deletion_stats_report.activity();
                    if activity == last_activity && self.is_idle() {
                        debug!(activity = activity, "no activity during the last interval.");
                        return Some(self.reporter.final_report(&self.deletion_stats_report));
                    }

                    if activity == last_activity && self.is_stalled() {
                        stalled_intervals += 1;
                        if stalled_intervals >= STALLED_INTERVAL_LIMIT
                            && !self.abandon_token.is_cancelled()
                        {
                            warn!(
                                in_flight = self.deletion_stats_report.in_flight(),
                                stalled_intervals = stalled_intervals,
                                "requests made no progress. abandoning them and recording them as failed."
                            );
                            self.abandon_token.cancel();
                        }
                    } else {
                        stalled_intervals = 0;
                    }

                    debug!(
                        activity = activity,
                        in_flight = self.deletion_stats_report.in_flight(),
                        ingestion_finished = self.deletion_stats_report.is_ingestion_finished(),
                        "deletion in progress."
                    );
                    last_activity = activity;
                }
                _ = self.cancellation_token.cancelled() => {
                    info!("progress monitor has been cancelled.");
                    return None;
                }
            }
        }
    }

    fn is_idle(&self) -> bool {
        self.deletion_stats_report.in_flight() == 0 && self.is_drained()
    }

    // Nothing left to hand out, but some requests never came back.
    fn is_stalled(&self) -> bool {
        self.deletion_stats_report.in_flight() > 0 && self.is_drained()
    }

    fn is_drained(&self) -> bool {
        self.deletion_stats_report.is_ingestion_finished()
            && self.work_queues.single_receiver.is_empty()
            && self.work_queues.batch_receiver.is_empty()
    }
}
