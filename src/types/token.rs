/// Token used to stop a running [`DeletionPipeline`](crate::DeletionPipeline).
///
/// Cancelling it stops ingestion, the workers and the progress monitor. The
/// failure file is still flushed before the pipeline returns.
pub type PipelineCancellationToken = tokio_util::sync::CancellationToken;

/// ```
/// use s3bulkrm_rs::create_pipeline_cancellation_token;
///
/// let token = create_pipeline_cancellation_token();
/// assert!(!token.is_cancelled());
/// token.cancel();
/// assert!(token.is_cancelled());
/// ```
pub fn create_pipeline_cancellation_token() -> PipelineCancellationToken {
    tokio_util::sync::CancellationToken::new()
}
