//! Shared helpers for the library's unit tests.

use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, Mutex};

use anyhow::{Result, anyhow};
use async_trait::async_trait;

use crate::backend::{DeleteResult, DeletedKey, DeletionBackend, FailedKey};
use crate::config::Config;

/// Initialise a dummy tracing subscriber for tests.
///
/// Uses `try_init` so that only the first call in a process actually
/// installs the subscriber; subsequent calls are silently ignored.
pub(crate) fn init_dummy_tracing_subscriber() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("dummy=trace")
        .try_init();
}

/// Default [`Config`] with no ramp-up delay and a short idle interval.
pub(crate) fn make_test_config(input_path: &str, failure_output_path: &str) -> Config {
    Config {
        worker_size: 2,
        idle_check_interval_milliseconds: 100,
        worker_ramp_up_milliseconds: 0,
        show_no_progress: true,
        ..Config::for_input(input_path, failure_output_path)
    }
}

pub(crate) fn write_input(dir: &Path, name: &str, lines: &[&str]) -> String {
    let path = dir.join(name);
    let mut text = lines.join("\n");
    text.push('\n');
    std::fs::write(&path, text).unwrap();
    path.to_string_lossy().to_string()
}

#[derive(Default)]
struct MockState {
    single_calls: Vec<(String, String)>,
    batch_calls: Vec<(String, Vec<String>)>,
}

/// In-memory backend. Clones share their call log.
#[derive(Clone, Default)]
pub(crate) struct MockBackend {
    state: Arc<Mutex<MockState>>,
    failing_keys: HashSet<String>,
    hanging_keys: HashSet<String>,
    fail_batches: bool,
}

impl MockBackend {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Reject `key` on both the single and the batch path.
    pub(crate) fn fail_key(mut self, key: &str) -> Self {
        self.failing_keys.insert(key.to_string());
        self
    }

    /// Never answer a request that contains `key`.
    pub(crate) fn hang_key(mut self, key: &str) -> Self {
        self.hanging_keys.insert(key.to_string());
        self
    }

    /// Fail every multi-key request as a whole.
    pub(crate) fn fail_batches(mut self) -> Self {
        self.fail_batches = true;
        self
    }

    pub(crate) fn single_calls(&self) -> Vec<(String, String)> {
        self.state.lock().unwrap().single_calls.clone()
    }

    pub(crate) fn batch_calls(&self) -> Vec<(String, Vec<String>)> {
        self.state.lock().unwrap().batch_calls.clone()
    }
}

#[async_trait]
impl DeletionBackend for MockBackend {
    async fn delete_object(&self, bucket: &str, key: &str) -> Result<()> {
        self.state
            .lock()
            .unwrap()
            .single_calls
            .push((bucket.to_string(), key.to_string()));

        if self.hanging_keys.contains(key) {
            std::future::pending::<()>().await;
        }
        if self.failing_keys.contains(key) {
            return Err(anyhow!("AccessDenied: {key}"));
        }
        Ok(())
    }

    async fn delete_objects(&self, bucket: &str, keys: &[String]) -> Result<DeleteResult> {
        self.state
            .lock()
            .unwrap()
            .batch_calls
            .push((bucket.to_string(), keys.to_vec()));

        if keys.iter().any(|key| self.hanging_keys.contains(key)) {
            std::future::pending::<()>().await;
        }
        if self.fail_batches {
            return Err(anyhow!("ServiceUnavailable"));
        }

        let (failed, deleted): (Vec<&String>, Vec<&String>) =
            keys.iter().partition(|key| self.failing_keys.contains(*key));
        Ok(DeleteResult {
            deleted: deleted
                .into_iter()
                .map(|key| DeletedKey { key: key.clone() })
                .collect(),
            failed: failed
                .into_iter()
                .map(|key| FailedKey {
                    key: key.clone(),
                    error_code: "AccessDenied".to_string(),
                    error_message: "Access Denied".to_string(),
                })
                .collect(),
        })
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}
