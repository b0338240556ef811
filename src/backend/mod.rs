//! Deletion backends.
//!
//! A backend deletes one key or a group of keys from a bucket of an
//! S3-compatible store. The worker pool only sees the [`DeletionBackend`]
//! trait, so the native API client and the `aws` command line tool are
//! interchangeable.

use anyhow::Result;
use async_trait::async_trait;
use dyn_clone::DynClone;
use tracing::debug;

use crate::config::{Config, DeletionBackendKind};

pub mod aws_cli;
pub mod s3;

pub use aws_cli::AwsCliBackend;
pub use s3::S3Backend;

/// Maximum number of keys accepted by one multi-object delete request.
pub const MAX_DELETE_OBJECTS_KEYS: usize = 1000;

pub type Backend = Box<dyn DeletionBackend + Send + Sync>;

/// Per-key outcome of a multi-object delete request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeleteResult {
    pub deleted: Vec<DeletedKey>,
    pub failed: Vec<FailedKey>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeletedKey {
    pub key: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedKey {
    pub key: String,
    pub error_code: String,
    pub error_message: String,
}

#[async_trait]
pub trait DeletionBackend: DynClone {
    /// Delete one key. An `Err` means the object may still exist.
    async fn delete_object(&self, bucket: &str, key: &str) -> Result<()>;

    /// Delete up to [`MAX_DELETE_OBJECTS_KEYS`] keys from one bucket.
    ///
    /// `Ok` carries the keys the store confirmed and the keys it rejected.
    /// `Err` means the request as a whole failed and none of the keys can be
    /// assumed deleted.
    async fn delete_objects(&self, bucket: &str, keys: &[String]) -> Result<DeleteResult>;

    fn name(&self) -> &'static str;
}

dyn_clone::clone_trait_object!(DeletionBackend);

/// Build the backend selected by `config.deletion_backend`.
pub async fn create_backend(config: &Config) -> Result<Backend> {
    let client_config = config.client_config.clone().unwrap_or_default();

    let backend: Backend = match config.deletion_backend {
        DeletionBackendKind::Api => Box::new(S3Backend::new(&client_config).await),
        DeletionBackendKind::AwsCli => Box::new(AwsCliBackend::new(
            config.aws_cli_path.clone(),
            &client_config,
        )),
    };

    debug!(
        backend = backend.name(),
        endpoint = config.endpoint_url(),
        "deletion backend created."
    );

    Ok(backend)
}
