pub mod args;

use std::path::PathBuf;

use aws_smithy_types::checksum_config::RequestChecksumCalculation;
use clap::ValueEnum;

use crate::types::{ClientConfigLocation, S3Credentials};

/// Main configuration for a bulk deletion run.
///
/// Holds everything a [`DeletionPipeline`](crate::DeletionPipeline) needs: the
/// input list, the failure file, worker pool sizing, batching, idle detection
/// and the deletion backend settings. The pipeline never mutates it.
///
/// # Quick Start
///
/// ```
/// use s3bulkrm_rs::Config;
///
/// let config = Config::for_input("targets.csv", "failures.csv");
/// assert_eq!(config.worker_size, 10);
/// assert_eq!(config.batch_size, 0);
/// assert_eq!(config.progress_pivot, 100);
/// ```
#[derive(Debug, Clone)]
pub struct Config {
    pub input_path: PathBuf,
    pub failure_output_path: PathBuf,
    pub key_prefix: String,
    pub separator: char,
    pub worker_size: u16,
    /// Print progress every `progress_pivot` single deletions. Zero disables it.
    pub progress_pivot: u64,
    /// Number of jobs per multi-key request. Zero selects single-object mode.
    pub batch_size: u16,
    pub idle_check_interval_milliseconds: u64,
    pub worker_ramp_up_milliseconds: u64,
    pub deletion_backend: DeletionBackendKind,
    pub aws_cli_path: PathBuf,
    pub dry_run: bool,
    pub show_no_progress: bool,
    pub client_config: Option<ClientConfig>,
    pub tracing_config: Option<TracingConfig>,
    /// Warnings produced while reading arguments, logged once tracing is up.
    pub argument_warnings: Vec<String>,
}

impl Config {
    /// Create a `Config` with CLI defaults for the given input list and
    /// failure file.
    pub fn for_input(input_path: &str, failure_output_path: &str) -> Self {
        Config {
            input_path: PathBuf::from(input_path),
            failure_output_path: PathBuf::from(failure_output_path),
            ..Config::default()
        }
    }

    pub fn is_batch_mode(&self) -> bool {
        self.batch_size > 0
    }

    /// Endpoint passed to the backend, if one was configured.
    pub fn endpoint_url(&self) -> Option<&str> {
        self.client_config
            .as_ref()
            .and_then(|client_config| client_config.endpoint_url.as_deref())
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            input_path: PathBuf::new(),
            failure_output_path: PathBuf::new(),
            key_prefix: String::new(),
            separator: ',',
            worker_size: 10,
            progress_pivot: 100,
            batch_size: 0,
            idle_check_interval_milliseconds: 15_000,
            worker_ramp_up_milliseconds: 1_000,
            deletion_backend: DeletionBackendKind::Api,
            aws_cli_path: PathBuf::from("aws"),
            dry_run: false,
            show_no_progress: false,
            client_config: None,
            tracing_config: None,
            argument_warnings: Vec::new(),
        }
    }
}

/// How deletions reach the object store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum DeletionBackendKind {
    /// Native S3 API through the AWS SDK.
    Api,
    /// The external `aws` command line tool.
    AwsCli,
}

/// AWS S3 client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub client_config_location: ClientConfigLocation,
    pub credential: S3Credentials,
    pub region: Option<String>,
    pub endpoint_url: Option<String>,
    pub force_path_style: bool,
    pub retry_config: RetryConfig,
    pub cli_timeout_config: CLITimeoutConfig,
    pub disable_stalled_stream_protection: bool,
    pub request_checksum_calculation: RequestChecksumCalculation,
}

impl Default for ClientConfig {
    /// Credentials and region from the environment, path-style addressing.
    fn default() -> Self {
        ClientConfig {
            client_config_location: ClientConfigLocation::default(),
            credential: S3Credentials::FromEnvironment,
            region: None,
            endpoint_url: None,
            force_path_style: true,
            retry_config: RetryConfig {
                aws_max_attempts: 10,
                initial_backoff_milliseconds: 100,
            },
            cli_timeout_config: CLITimeoutConfig::default(),
            disable_stalled_stream_protection: false,
            request_checksum_calculation: RequestChecksumCalculation::WhenRequired,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub aws_max_attempts: u32,
    pub initial_backoff_milliseconds: u64,
}

#[derive(Debug, Clone, Default)]
pub struct CLITimeoutConfig {
    pub operation_timeout_milliseconds: Option<u64>,
    pub operation_attempt_timeout_milliseconds: Option<u64>,
    pub connect_timeout_milliseconds: Option<u64>,
    pub read_timeout_milliseconds: Option<u64>,
}

#[derive(Debug, Clone, Copy)]
pub struct TracingConfig {
    pub tracing_level: log::Level,
    pub json_tracing: bool,
    pub aws_sdk_tracing: bool,
    pub span_events_tracing: bool,
    pub disable_color_tracing: bool,
}
