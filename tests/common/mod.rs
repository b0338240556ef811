//! Shared integration test infrastructure for s3bulkrm-rs.
//!
//! Scenario tests run the full pipeline, built from command line arguments,
//! against an in-memory [`RecordingBackend`]. The E2E helpers (behind
//! `--cfg e2e_test`) talk to a real S3-compatible endpoint.

#![allow(dead_code)]

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use s3bulkrm_rs::backend::{DeleteResult, DeletedKey, DeletionBackend, FailedKey};
use s3bulkrm_rs::config::args::build_config_from_args;
use s3bulkrm_rs::{Config, DeletionPipeline, DeletionStats, create_pipeline_cancellation_token};
use tempfile::TempDir;

/// Result of running a deletion pipeline.
#[derive(Debug)]
pub struct PipelineResult {
    pub stats: DeletionStats,
    pub has_error: bool,
    pub has_panic: bool,
    pub has_warning: bool,
    pub errors: Vec<String>,
    pub failure_rows: u64,
    pub completed: bool,
}

#[derive(Debug, Default)]
struct Calls {
    single: Vec<(String, String)>,
    batch: Vec<(String, Vec<String>)>,
}

/// Backend that records every request and fails the configured keys.
#[derive(Clone, Default)]
pub struct RecordingBackend {
    calls: Arc<Mutex<Calls>>,
    failing_keys: HashSet<String>,
    fail_whole_batches: bool,
}

impl RecordingBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(keys: &[&str]) -> Self {
        Self {
            failing_keys: keys.iter().map(|key| key.to_string()).collect(),
            ..Self::default()
        }
    }

    pub fn failing_whole_batches() -> Self {
        Self {
            fail_whole_batches: true,
            ..Self::default()
        }
    }

    pub fn single_calls(&self) -> Vec<(String, String)> {
        self.calls.lock().unwrap().single.clone()
    }

    pub fn batch_calls(&self) -> Vec<(String, Vec<String>)> {
        self.calls.lock().unwrap().batch.clone()
    }
}

#[async_trait]
impl DeletionBackend for RecordingBackend {
    async fn delete_object(&self, bucket: &str, key: &str) -> Result<()> {
        self.calls
            .lock()
            .unwrap()
            .single
            .push((bucket.to_string(), key.to_string()));

        if self.failing_keys.contains(key) {
            return Err(anyhow!("AccessDenied: {bucket}/{key}"));
        }
        Ok(())
    }

    async fn delete_objects(&self, bucket: &str, keys: &[String]) -> Result<DeleteResult> {
        self.calls
            .lock()
            .unwrap()
            .batch
            .push((bucket.to_string(), keys.to_vec()));

        if self.fail_whole_batches {
            return Err(anyhow!("SlowDown: {bucket}"));
        }

        let mut result = DeleteResult::default();
        for key in keys {
            if self.failing_keys.contains(key) {
                result.failed.push(FailedKey {
                    key: key.clone(),
                    error_code: "AccessDenied".to_string(),
                    error_message: "Access Denied".to_string(),
                });
            } else {
                result.deleted.push(DeletedKey { key: key.clone() });
            }
        }
        Ok(result)
    }

    fn name(&self) -> &'static str {
        "recording"
    }
}

/// Temporary directory holding one input list and its failure file.
pub struct Workspace {
    dir: TempDir,
}

impl Workspace {
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().unwrap(),
        }
    }

    pub fn write_input(&self, lines: &[&str]) -> PathBuf {
        let path = self.dir.path().join("objects.csv");
        let mut text = lines.join("\n");
        text.push('\n');
        std::fs::write(&path, text).unwrap();
        path
    }

    pub fn failure_path(&self) -> PathBuf {
        self.dir.path().join("failed.csv")
    }

    pub fn failure_rows(&self) -> Vec<String> {
        std::fs::read_to_string(self.failure_path())
            .unwrap()
            .lines()
            .map(str::to_string)
            .collect()
    }

    /// Build a Config from the seven positionals plus fast-test options.
    pub fn build_config(
        &self,
        workers: &str,
        progress_pivot: &str,
        batch_size: &str,
        key_prefix: &str,
        extra_args: &[&str],
    ) -> Config {
        let input = self.dir.path().join("objects.csv");
        let failure = self.failure_path();
        let mut args = vec![
            "s3bulkrm".to_string(),
            input.to_string_lossy().to_string(),
            "http://localhost:9000".to_string(),
            workers.to_string(),
            progress_pivot.to_string(),
            batch_size.to_string(),
            failure.to_string_lossy().to_string(),
            key_prefix.to_string(),
            "--idle-check-interval-seconds".to_string(),
            "1".to_string(),
            "--worker-ramp-up-milliseconds".to_string(),
            "0".to_string(),
            "--show-no-progress".to_string(),
        ];
        args.extend(extra_args.iter().map(|arg| arg.to_string()));

        build_config_from_args(args).unwrap()
    }
}

pub async fn run_pipeline(config: Config, backend: RecordingBackend) -> PipelineResult {
    let token = create_pipeline_cancellation_token();
    let mut pipeline = DeletionPipeline::with_backend(config, Box::new(backend), token);

    pipeline.close_stats_sender();
    pipeline.run().await;

    let has_error = pipeline.has_error();
    let errors = if has_error {
        pipeline
            .get_errors_and_consume()
            .unwrap_or_default()
            .into_iter()
            .map(|e| format!("{e:#}"))
            .collect()
    } else {
        Vec::new()
    };

    PipelineResult {
        stats: pipeline.get_deletion_stats(),
        has_error,
        has_panic: pipeline.has_panic(),
        has_warning: pipeline.has_warning(),
        errors,
        failure_rows: pipeline.failure_rows(),
        completed: pipeline.final_report().is_some(),
    }
}

/// Upper bound for a single scenario, idle interval included.
pub const SCENARIO_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(30);

#[macro_export]
macro_rules! scenario_timeout {
    ($body:expr) => {
        tokio::time::timeout(common::SCENARIO_TIMEOUT, $body)
            .await
            .expect("scenario timed out")
    };
}

#[cfg(e2e_test)]
pub mod e2e {
    //! Helpers for runs against a real S3-compatible endpoint.
    //!
    //! The endpoint comes from `S3BULKRM_E2E_ENDPOINT` (default
    //! `http://localhost:9000`); credentials and region come from the usual
    //! AWS environment variables.

    use aws_config::BehaviorVersion;
    use aws_sdk_s3::Client;
    use aws_sdk_s3::primitives::ByteStream;

    pub const ENDPOINT_ENV_VAR: &str = "S3BULKRM_E2E_ENDPOINT";
    const DEFAULT_ENDPOINT: &str = "http://localhost:9000";

    pub fn endpoint() -> String {
        std::env::var(ENDPOINT_ENV_VAR).unwrap_or_else(|_| DEFAULT_ENDPOINT.to_string())
    }

    pub struct TestHelper {
        client: Client,
    }

    impl TestHelper {
        pub async fn new() -> Self {
            let sdk_config = aws_config::defaults(BehaviorVersion::latest())
                .endpoint_url(endpoint())
                .load()
                .await;
            let s3_config = aws_sdk_s3::config::Builder::from(&sdk_config)
                .force_path_style(true)
                .build();

            Self {
                client: Client::from_conf(s3_config),
            }
        }

        pub fn generate_bucket_name(&self) -> String {
            format!("s3bulkrm-e2e-{}", uuid::Uuid::new_v4())
        }

        pub async fn create_bucket(&self, bucket: &str) {
            self.client
                .create_bucket()
                .bucket(bucket)
                .send()
                .await
                .unwrap_or_else(|e| panic!("Failed to create bucket {bucket}: {e}"));
        }

        pub async fn put_object(&self, bucket: &str, key: &str, body: Vec<u8>) {
            self.client
                .put_object()
                .bucket(bucket)
                .key(key)
                .body(ByteStream::from(body))
                .send()
                .await
                .unwrap_or_else(|e| panic!("Failed to put {bucket}/{key}: {e}"));
        }

        pub async fn list_keys(&self, bucket: &str) -> Vec<String> {
            let mut keys = vec![];
            let mut continuation_token: Option<String> = None;
            loop {
                let response = self
                    .client
                    .list_objects_v2()
                    .bucket(bucket)
                    .set_continuation_token(continuation_token.clone())
                    .send()
                    .await
                    .unwrap_or_else(|e| panic!("Failed to list {bucket}: {e}"));
                keys.extend(
                    response
                        .contents()
                        .iter()
                        .filter_map(|object| object.key().map(str::to_string)),
                );
                match response.next_continuation_token() {
                    Some(token) => continuation_token = Some(token.to_string()),
                    None => return keys,
                }
            }
        }

        /// Remove every remaining object and the bucket itself.
        pub async fn delete_bucket_cascade(&self, bucket: &str) {
            for key in self.list_keys(bucket).await {
                let _ = self
                    .client
                    .delete_object()
                    .bucket(bucket)
                    .key(key)
                    .send()
                    .await;
            }
            let _ = self.client.delete_bucket().bucket(bucket).send().await;
        }
    }
}
