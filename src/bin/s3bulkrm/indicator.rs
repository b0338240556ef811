// Live progress line fed by the pipeline's stats channel.
//
// Deletion velocity is a moving average over the last few one-second periods.

use std::io;
use std::io::Write;

use async_channel::Receiver;
use indicatif::{HumanCount, HumanDuration, ProgressBar, ProgressStyle};
use s3bulkrm_rs::DeletionStatistics;
use simple_moving_average::{SMA, SumTreeSMA};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::info;

/// Totals counted by [`show_indicator`] once the stats channel closes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndicatorSummary {
    pub total_delete_count: u64,
    pub total_error_count: u64,
    pub total_skipped_lines: u64,
}

impl IndicatorSummary {
    fn add(&mut self, stats: DeletionStatistics) -> u64 {
        match stats {
            DeletionStatistics::DeleteComplete { .. } => {
                self.total_delete_count += 1;
                return 1;
            }
            DeletionStatistics::DeleteError { .. } => self.total_error_count += 1,
            DeletionStatistics::LineSkipped { .. } => self.total_skipped_lines += 1,
        }
        0
    }
}

const MOVING_AVERAGE_PERIOD_SECS: usize = 10;

const REFRESH_INTERVAL: f32 = 1.0;

/// Spawn the progress display. It runs until `stats_receiver` is closed and
/// returns the totals it counted.
pub fn show_indicator(
    stats_receiver: Receiver<DeletionStatistics>,
    show_progress: bool,
    show_result: bool,
    dry_run: bool,
) -> JoinHandle<IndicatorSummary> {
    let progress_text = ProgressBar::new(0);
    if let Ok(progress_style) = ProgressStyle::with_template("{wide_msg}") {
        progress_text.set_style(progress_style);
    }

    tokio::spawn(async move {
        let start_time = Instant::now();

        let mut ma_deleted_count = SumTreeSMA::<_, u64, MOVING_AVERAGE_PERIOD_SECS>::new();
        let mut summary = IndicatorSummary::default();

        loop {
            let mut period_count: u64 = 0;

            let period = Instant::now();
            loop {
                while let Ok(stats) = stats_receiver.try_recv() {
                    period_count += summary.add(stats);
                }

                if REFRESH_INTERVAL < period.elapsed().as_secs_f32() {
                    break;
                }

                if stats_receiver.is_closed() && stats_receiver.is_empty() {
                    let elapsed = start_time.elapsed();
                    let elapsed_secs_f64 = elapsed.as_secs_f64();

                    let mut objects_per_sec =
                        (summary.total_delete_count as f64 / elapsed_secs_f64) as u64;
                    if elapsed_secs_f64 < REFRESH_INTERVAL as f64 {
                        objects_per_sec = summary.total_delete_count;
                    }
                    if dry_run {
                        objects_per_sec = 0;
                    }

                    info!(
                        message = "deletion summary",
                        deleted_objects = summary.total_delete_count,
                        deleted_objects_per_sec = objects_per_sec,
                        failed = summary.total_error_count,
                        skipped_lines = summary.total_skipped_lines,
                        duration_sec = elapsed_secs_f64,
                    );

                    if show_result {
                        if let Ok(result_style) = ProgressStyle::with_template("{msg}") {
                            progress_text.set_style(result_style);
                        }

                        progress_text.finish_with_message(format!(
                            "deleted {:>3} objects | {:>3} objects/sec,  failed {} objects,  skipped {} lines,  duration {}",
                            summary.total_delete_count,
                            HumanCount(objects_per_sec),
                            summary.total_error_count,
                            summary.total_skipped_lines,
                            HumanDuration(elapsed),
                        ));

                        println!();
                        let _ = io::stdout().flush();
                    }

                    return summary;
                }

                tokio::time::sleep(std::time::Duration::from_secs_f32(0.05)).await;
            }

            if !dry_run {
                ma_deleted_count.add_sample(period_count);
            }

            if show_progress {
                progress_text.set_message(format!(
                    "deleted {:>3} objects | {:>3} objects/sec,  failed {} objects,  skipped {} lines",
                    summary.total_delete_count,
                    HumanCount(ma_deleted_count.get_average()),
                    summary.total_error_count,
                    summary.total_skipped_lines,
                ));
            }
        }
    })
}
