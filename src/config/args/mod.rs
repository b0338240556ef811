use crate::config::{
    CLITimeoutConfig, ClientConfig, Config, DeletionBackendKind, RetryConfig, TracingConfig,
};
use crate::types::{AccessKeys, ClientConfigLocation, S3Credentials};
use aws_smithy_types::checksum_config::RequestChecksumCalculation;
use clap::Parser;
use clap::builder::NonEmptyStringValueParser;
use clap_verbosity_flag::{InfoLevel, Verbosity};
use std::ffi::OsString;
use std::path::PathBuf;
use std::str::FromStr;

pub mod value_parser;


const DEFAULT_WORKER_SIZE: u16 = 10;
const DEFAULT_PROGRESS_PIVOT: u64 = 100;
const DEFAULT_BATCH_SIZE: u16 = 0;
const MAX_BATCH_SIZE: u16 = 1000;
const DEFAULT_SEPARATOR: char = ',';
const DEFAULT_IDLE_CHECK_INTERVAL_SECONDS: u64 = 15;
const DEFAULT_WORKER_RAMP_UP_MILLISECONDS: u64 = 1000;
const DEFAULT_AWS_CLI_PATH: &str = "aws";
const DEFAULT_AWS_MAX_ATTEMPTS: u32 = 10;
const DEFAULT_INITIAL_BACKOFF_MILLISECONDS: u64 = 100;
const DEFAULT_JSON_TRACING: bool = false;
const DEFAULT_AWS_SDK_TRACING: bool = false;
const DEFAULT_SPAN_EVENTS_TRACING: bool = false;
const DEFAULT_DISABLE_COLOR_TRACING: bool = false;
const DEFAULT_FORCE_PATH_STYLE: bool = true;
const DEFAULT_DRY_RUN: bool = false;
const DEFAULT_SHOW_NO_PROGRESS: bool = false;
const DEFAULT_DISABLE_STALLED_STREAM_PROTECTION: bool = false;

const ERROR_MESSAGE_WORKER_SIZE_ZERO: &str = "WORKERS must be at least 1.";
const ERROR_MESSAGE_WORKER_SIZE_TOO_LARGE: &str = "WORKERS must be at most 65535.";
const ERROR_MESSAGE_BATCH_SIZE_TOO_LARGE: &str =
    "BATCH_SIZE must be at most 1000 (S3 DeleteObjects limit).";
const ERROR_MESSAGE_IDLE_CHECK_INTERVAL_ZERO: &str =
    "--idle-check-interval-seconds must be at least 1.";
const ERROR_MESSAGE_IDLE_CHECK_INTERVAL_TOO_LARGE: &str =
    "--idle-check-interval-seconds is too large.";
const ERROR_MESSAGE_SECRET_KEY_REQUIRED: &str =
    "--secret-key is required when --access-key is specified.";

/// s3bulkrm - bulk object deletion for S3-compatible storage.
///
/// Reads a list of objects (one per line: bucket, id, preview id, name) and
/// deletes them with a pool of concurrent workers. Objects that could not be
/// deleted are written to OUTPUT_PATH as CSV so the run can be repeated.
///
/// Example:
///   s3bulkrm objects.csv http://minio:9000 16 1000 0 failed.csv urn:oid:
///   s3bulkrm objects.csv https://s3.example.com 32 100 500 failed.csv "" --dry-run
#[derive(Parser, Clone, Debug)]
#[command(name = "s3bulkrm", version, about, long_about = None)]
pub struct CLIArgs {
    /// Input list. One object per line: bucket, id, preview id, display name.
    #[arg(env, value_parser = value_parser::file_exist::is_file_exist)]
    pub input_path: String,

    /// S3-compatible endpoint URL (http:// or https://).
    #[arg(env, value_parser = value_parser::url::check_scheme)]
    pub endpoint: String,

    /// Number of concurrent deletion workers. Non-numeric values fall back to 10.
    #[arg(env, allow_negative_numbers = true)]
    pub workers: String,

    /// Log progress every N single deletions (0 disables). Non-numeric values fall back to 100.
    #[arg(env, allow_negative_numbers = true)]
    pub progress_pivot: String,

    /// Objects per multi-object delete request (0 = single-object mode, max 1000).
    /// Non-numeric values fall back to 0.
    #[arg(env, allow_negative_numbers = true)]
    pub batch_size: String,

    /// CSV file receiving the objects that could not be deleted. Truncated at startup.
    #[arg(env)]
    pub output_path: PathBuf,

    /// Prefix prepended to the preview id to form the object key. May be empty.
    #[arg(env)]
    pub key_prefix: String,

    // -----------------------------------------------------------------------
    // General options
    // -----------------------------------------------------------------------
    /// Simulation mode. Reads the input and reports, but does not delete.
    #[arg(short = 'd', long, env, default_value_t = DEFAULT_DRY_RUN, help_heading = "General")]
    pub dry_run: bool,

    /// Don't show the progress indicator.
    #[arg(long, env, default_value_t = DEFAULT_SHOW_NO_PROGRESS, help_heading = "General")]
    pub show_no_progress: bool,

    /// Field separator of the input list.
    #[arg(long, env, default_value_t = DEFAULT_SEPARATOR, help_heading = "General")]
    pub separator: char,

    // -----------------------------------------------------------------------
    // Deletion options
    // -----------------------------------------------------------------------
    /// Seconds between idle checks. The run ends after one full interval
    /// without any deletion activity.
    #[arg(long, env, default_value_t = DEFAULT_IDLE_CHECK_INTERVAL_SECONDS, help_heading = "Deletion")]
    pub idle_check_interval_seconds: u64,

    /// Delay between starting consecutive workers.
    #[arg(long, env, default_value_t = DEFAULT_WORKER_RAMP_UP_MILLISECONDS, help_heading = "Deletion")]
    pub worker_ramp_up_milliseconds: u64,

    /// Use the native S3 API or the external aws command.
    #[arg(long, env, value_enum, default_value_t = DeletionBackendKind::Api, help_heading = "Deletion")]
    pub deletion_backend: DeletionBackendKind,

    /// Path of the aws command used by `--deletion-backend aws-cli`.
    #[arg(long, env, default_value = DEFAULT_AWS_CLI_PATH, help_heading = "Deletion")]
    pub aws_cli_path: PathBuf,

    // -----------------------------------------------------------------------
    // Logging options
    // -----------------------------------------------------------------------
    #[command(flatten)]
    pub verbosity: Verbosity<InfoLevel>,

    #[arg(long, env, default_value_t = DEFAULT_JSON_TRACING, help_heading = "Logging")]
    pub json_tracing: bool,

    #[arg(long, env, default_value_t = DEFAULT_AWS_SDK_TRACING, help_heading = "Logging")]
    pub aws_sdk_tracing: bool,

    #[arg(long, env, default_value_t = DEFAULT_SPAN_EVENTS_TRACING, help_heading = "Logging")]
    pub span_events_tracing: bool,

    #[arg(long, env, default_value_t = DEFAULT_DISABLE_COLOR_TRACING, help_heading = "Logging")]
    pub disable_color_tracing: bool,

    // -----------------------------------------------------------------------
    // Retry options
    // -----------------------------------------------------------------------
    /// Maximum attempts per request, handled by the AWS SDK.
    #[arg(long, env, default_value_t = DEFAULT_AWS_MAX_ATTEMPTS, help_heading = "Retry")]
    pub aws_max_attempts: u32,

    #[arg(long, env, default_value_t = DEFAULT_INITIAL_BACKOFF_MILLISECONDS, help_heading = "Retry")]
    pub initial_backoff_milliseconds: u64,

    // -----------------------------------------------------------------------
    // Timeout options
    // -----------------------------------------------------------------------
    #[arg(long, env, help_heading = "Timeout")]
    pub operation_timeout_milliseconds: Option<u64>,

    #[arg(long, env, help_heading = "Timeout")]
    pub operation_attempt_timeout_milliseconds: Option<u64>,

    #[arg(long, env, help_heading = "Timeout")]
    pub connect_timeout_milliseconds: Option<u64>,

    #[arg(long, env, help_heading = "Timeout")]
    pub read_timeout_milliseconds: Option<u64>,

    // -----------------------------------------------------------------------
    // AWS configuration
    // -----------------------------------------------------------------------
    #[arg(long, env, help_heading = "AWS")]
    pub aws_config_file: Option<PathBuf>,

    #[arg(long, env, help_heading = "AWS")]
    pub aws_shared_credentials_file: Option<PathBuf>,

    #[arg(long, env, value_parser = NonEmptyStringValueParser::new(), conflicts_with_all = ["access_key"], help_heading = "AWS")]
    pub profile: Option<String>,

    #[arg(long, env, value_parser = NonEmptyStringValueParser::new(), help_heading = "AWS")]
    pub access_key: Option<String>,

    #[arg(long, env, value_parser = NonEmptyStringValueParser::new(), help_heading = "AWS")]
    pub secret_key: Option<String>,

    #[arg(long, env, value_parser = NonEmptyStringValueParser::new(), help_heading = "AWS")]
    pub session_token: Option<String>,

    /// Region of the endpoint. Falls back to the environment, then us-east-1.
    #[arg(long, env, value_parser = NonEmptyStringValueParser::new(), help_heading = "AWS")]
    pub region: Option<String>,

    /// Path-style addressing, required by most S3-compatible services.
    #[arg(long, env, default_value_t = DEFAULT_FORCE_PATH_STYLE, action = clap::ArgAction::Set, help_heading = "AWS")]
    pub force_path_style: bool,

    #[arg(long, env, default_value_t = DEFAULT_DISABLE_STALLED_STREAM_PROTECTION, help_heading = "AWS")]
    pub disable_stalled_stream_protection: bool,
}

/// Parse command-line arguments into a `CLIArgs` struct.
///
/// ```
/// use s3bulkrm_rs::config::args::parse_from_args;
///
/// let args = vec![
///     "s3bulkrm", "Cargo.toml", "http://localhost:9000", "4", "100", "0", "failed.csv", "",
///     "--dry-run",
/// ];
/// let cli_args = parse_from_args(args).unwrap();
/// assert!(cli_args.dry_run);
/// ```
pub fn parse_from_args<I, T>(args: I) -> Result<CLIArgs, clap::Error>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    CLIArgs::try_parse_from(args)
}

/// Parse arguments and build a Config in one step.
pub fn build_config_from_args<I, T>(args: I) -> Result<Config, String>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let cli_args = CLIArgs::try_parse_from(args).map_err(|e| e.to_string())?;
    Config::try_from(cli_args)
}

/// Parse a numeric positional leniently: anything that is not an integer is
/// replaced by `default` and a warning is queued.
fn parse_or_default<T: FromStr + std::fmt::Display + Copy>(
    name: &str,
    value: &str,
    default: T,
    warnings: &mut Vec<String>,
) -> T {
    match value.trim().parse::<T>() {
        Ok(parsed) => parsed,
        Err(_) => {
            warnings.push(format!(
                "{name} '{value}' is not a valid number. using default value {default}."
            ));
            default
        }
    }
}

impl CLIArgs {
    fn validate(&self) -> Result<(), String> {
        if self.idle_check_interval_seconds == 0 {
            return Err(ERROR_MESSAGE_IDLE_CHECK_INTERVAL_ZERO.to_string());
        }
        if self.access_key.is_some() && self.secret_key.is_none() {
            return Err(ERROR_MESSAGE_SECRET_KEY_REQUIRED.to_string());
        }
        Ok(())
    }

    fn idle_check_interval_milliseconds(&self) -> Result<u64, String> {
        self.idle_check_interval_seconds
            .checked_mul(1000)
            .ok_or_else(|| ERROR_MESSAGE_IDLE_CHECK_INTERVAL_TOO_LARGE.to_string())
    }

    fn parse_worker_size(&self, warnings: &mut Vec<String>) -> Result<u16, String> {
        let worker_size = parse_or_default(
            "WORKERS",
            &self.workers,
            DEFAULT_WORKER_SIZE as u64,
            warnings,
        );
        if worker_size == 0 {
            return Err(ERROR_MESSAGE_WORKER_SIZE_ZERO.to_string());
        }
        u16::try_from(worker_size).map_err(|_| ERROR_MESSAGE_WORKER_SIZE_TOO_LARGE.to_string())
    }

    fn parse_batch_size(&self, warnings: &mut Vec<String>) -> Result<u16, String> {
        let batch_size = parse_or_default(
            "BATCH_SIZE",
            &self.batch_size,
            DEFAULT_BATCH_SIZE as u64,
            warnings,
        );
        if batch_size > MAX_BATCH_SIZE as u64 {
            return Err(ERROR_MESSAGE_BATCH_SIZE_TOO_LARGE.to_string());
        }
        Ok(batch_size as u16)
    }

    fn build_client_config(&self) -> ClientConfig {
        let credential = if let Some(ref profile) = self.profile {
            S3Credentials::Profile(profile.clone())
        } else if let Some(ref access_key) = self.access_key {
            S3Credentials::Credentials {
                access_keys: AccessKeys {
                    access_key: access_key.clone(),
                    secret_access_key: self.secret_key.clone().unwrap_or_default(),
                    session_token: self.session_token.clone(),
                },
            }
        } else {
            S3Credentials::FromEnvironment
        };

        ClientConfig {
            client_config_location: ClientConfigLocation {
                aws_config_file: self.aws_config_file.clone(),
                aws_shared_credentials_file: self.aws_shared_credentials_file.clone(),
            },
            credential,
            region: self.region.clone(),
            endpoint_url: Some(self.endpoint.clone()),
            force_path_style: self.force_path_style,
            retry_config: RetryConfig {
                aws_max_attempts: self.aws_max_attempts,
                initial_backoff_milliseconds: self.initial_backoff_milliseconds,
            },
            cli_timeout_config: CLITimeoutConfig {
                operation_timeout_milliseconds: self.operation_timeout_milliseconds,
                operation_attempt_timeout_milliseconds: self.operation_attempt_timeout_milliseconds,
                connect_timeout_milliseconds: self.connect_timeout_milliseconds,
                read_timeout_milliseconds: self.read_timeout_milliseconds,
            },
            disable_stalled_stream_protection: self.disable_stalled_stream_protection,
            request_checksum_calculation: RequestChecksumCalculation::WhenRequired,
        }
    }

    fn build_tracing_config(&self) -> Option<TracingConfig> {
        let log_level = self.verbosity.log_level()?;

        Some(TracingConfig {
            tracing_level: log_level,
            json_tracing: self.json_tracing,
            aws_sdk_tracing: self.aws_sdk_tracing,
            span_events_tracing: self.span_events_tracing,
            disable_color_tracing: self.disable_color_tracing,
        })
    }
}

impl TryFrom<CLIArgs> for Config {
    type Error = String;

    fn try_from(args: CLIArgs) -> Result<Self, Self::Error> {
        args.validate()?;

        let mut argument_warnings = Vec::new();
        let worker_size = args.parse_worker_size(&mut argument_warnings)?;
        let progress_pivot = parse_or_default(
            "PROGRESS_PIVOT",
            &args.progress_pivot,
            DEFAULT_PROGRESS_PIVOT,
            &mut argument_warnings,
        );
        let batch_size = args.parse_batch_size(&mut argument_warnings)?;
        let idle_check_interval_milliseconds = args.idle_check_interval_milliseconds()?;

        Ok(Config {
            input_path: PathBuf::from(&args.input_path),
            failure_output_path: args.output_path.clone(),
            key_prefix: args.key_prefix.clone(),
            separator: args.separator,
            worker_size,
            progress_pivot,
            batch_size,
            idle_check_interval_milliseconds,
            worker_ramp_up_milliseconds: args.worker_ramp_up_milliseconds,
            deletion_backend: args.deletion_backend,
            aws_cli_path: args.aws_cli_path.clone(),
            dry_run: args.dry_run,
            show_no_progress: args.show_no_progress,
            client_config: Some(args.build_client_config()),
            tracing_config: args.build_tracing_config(),
            argument_warnings,
        })
    }
}
