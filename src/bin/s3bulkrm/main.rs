use anyhow::Result;
use clap::Parser;
use tracing::{debug, error, trace, warn};

use s3bulkrm_rs::config::Config;
use s3bulkrm_rs::config::args::CLIArgs;
use s3bulkrm_rs::{
    DeletionPipeline, S3BulkRmError, create_pipeline_cancellation_token, is_cancelled_error,
};

mod ctrl_c_handler;
pub mod indicator;
mod tracing_init;
pub mod ui_config;

/// s3bulkrm - list-driven bulk deletion for S3-compatible storage.
///
/// This binary is a thin wrapper over the s3bulkrm-rs library.
#[tokio::main]
async fn main() -> Result<()> {
    let config = load_config_exit_if_err();

    start_tracing_if_necessary(&config);

    trace!("config = {:?}", config);

    for warning in &config.argument_warnings {
        warn!("{}", warning);
    }

    run(config).await
}

fn load_config_exit_if_err() -> Config {
    match Config::try_from(CLIArgs::parse()) {
        Ok(config) => config,
        Err(error_message) => {
            clap::Error::raw(clap::error::ErrorKind::ValueValidation, error_message).exit()
        }
    }
}

fn start_tracing_if_necessary(config: &Config) -> bool {
    let Some(tracing_config) = config.tracing_config.as_ref() else {
        return false;
    };

    tracing_init::init_tracing(tracing_config);
    true
}

async fn run(config: Config) -> Result<()> {
    #[allow(unused_assignments)]
    let mut deletion_failures = None;

    {
        let cancellation_token = create_pipeline_cancellation_token();

        ctrl_c_handler::spawn_ctrl_c_handler(cancellation_token.clone());

        let start_time = tokio::time::Instant::now();
        debug!("deletion pipeline start.");

        let mut pipeline = DeletionPipeline::new(config.clone(), cancellation_token).await?;
        let indicator_join_handle = indicator::show_indicator(
            pipeline.get_stats_receiver(),
            ui_config::is_progress_indicator_needed(&config),
            ui_config::is_show_result_needed(&config),
            config.dry_run,
        );

        pipeline.run().await;
        indicator_join_handle.await?;

        let duration_sec = format!("{:.3}", start_time.elapsed().as_secs_f32());

        if pipeline.has_error() {
            let errors = pipeline.get_errors_and_consume().unwrap_or_default();
            // A real failure wins over the cancellation it may have caused.
            if errors.iter().all(is_cancelled_error) {
                debug!("deletion cancelled by user.");
                return Ok(());
            }
            for err in errors.iter().filter(|err| !is_cancelled_error(err)) {
                error!("{:#}", err);
            }
            error!(duration_sec = duration_sec, "s3bulkrm failed.");
            return Err(anyhow::anyhow!("s3bulkrm failed."));
        }

        if pipeline.has_warning() {
            let stats = pipeline.get_deletion_stats();
            deletion_failures = Some(S3BulkRmError::DeletionFailures {
                deleted: stats.stats_deleted_objects,
                failed: stats.stats_failed_objects,
            });
        }

        debug!(duration_sec = duration_sec, "s3bulkrm has been completed.");
    }

    if let Some(deletion_failures) = deletion_failures {
        warn!("{}", deletion_failures);
        std::process::exit(deletion_failures.exit_code());
    }

    Ok(())
}
