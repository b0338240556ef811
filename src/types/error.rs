use anyhow::Error;
use thiserror::Error;

/// Classified errors raised by the deletion pipeline.
///
/// ## Exit Codes
///
/// - 0: Cancelled
/// - 1: AwsCli, Io, Pipeline
/// - 2: InvalidConfig
/// - 3: DeletionFailures (the run finished but some jobs were written to the
///   failure file)
#[derive(Error, Debug, PartialEq)]
pub enum S3BulkRmError {
    /// The external `aws` command could not be spawned or returned garbage.
    #[error("aws cli error: {0}")]
    AwsCli(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Operation cancelled by user")]
    Cancelled,

    #[error("Deletion failures: {deleted} deleted, {failed} failed")]
    DeletionFailures { deleted: u64, failed: u64 },

    #[error("Pipeline error: {0}")]
    Pipeline(String),
}

impl S3BulkRmError {
    pub fn exit_code(&self) -> i32 {
        match self {
            S3BulkRmError::Cancelled => 0,
            S3BulkRmError::InvalidConfig(_) => 2,
            S3BulkRmError::DeletionFailures { .. } => 3,
            _ => 1,
        }
    }
}

pub fn is_cancelled_error(e: &Error) -> bool {
    if let Some(err) = e.downcast_ref::<S3BulkRmError>() {
        return *err == S3BulkRmError::Cancelled;
    }
    false
}

/// Extract the exit code from an anyhow::Error, defaulting to 1.
pub fn exit_code_from_error(e: &Error) -> i32 {
    if let Some(err) = e.downcast_ref::<S3BulkRmError>() {
        return err.exit_code();
    }
    1
}
