pub mod client_builder;

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use aws_sdk_s3::Client;
use aws_sdk_s3::error::SdkError;
use aws_sdk_s3::types::{Delete, ObjectIdentifier};
use aws_smithy_types::error::metadata::ProvideErrorMetadata;
use tracing::{debug, error, warn};

use crate::backend::{DeleteResult, DeletedKey, DeletionBackend, FailedKey};
use crate::config::ClientConfig;

/// Returns the S3 error code and message of a service error. Transport and
/// timeout errors have no code; their description is used as the message.
fn extract_sdk_error_details<E: std::fmt::Display + ProvideErrorMetadata>(
    e: &SdkError<E>,
) -> (String, String) {
    if let Some(service_err) = e.as_service_error() {
        (
            service_err.code().unwrap_or("unknown").to_string(),
            service_err.message().unwrap_or("no message").to_string(),
        )
    } else {
        ("N/A".to_string(), e.to_string())
    }
}

/// Deletes through the S3 `DeleteObject` and `DeleteObjects` APIs.
#[derive(Clone)]
pub struct S3Backend {
    client: Arc<Client>,
}

impl S3Backend {
    pub async fn new(client_config: &ClientConfig) -> Self {
        Self::from_client(client_config.create_client().await)
    }

    pub fn from_client(client: Client) -> Self {
        Self {
            client: Arc::new(client),
        }
    }
}

#[async_trait]
impl DeletionBackend for S3Backend {
    async fn delete_object(&self, bucket: &str, key: &str) -> Result<()> {
        self.client
            .delete_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                let (s3_error_code, s3_error_message) = extract_sdk_error_details(&e);
                warn!(
                    bucket = bucket,
                    key = key,
                    s3_error_code = s3_error_code,
                    s3_error_message = s3_error_message,
                    "S3 DeleteObject API call failed for s3://{}/{}: {} ({}).",
                    bucket,
                    key,
                    s3_error_code,
                    s3_error_message,
                );
                anyhow::anyhow!(e).context("aws_sdk_s3::client::delete_object() failed.")
            })?;

        Ok(())
    }

    async fn delete_objects(&self, bucket: &str, keys: &[String]) -> Result<DeleteResult> {
        let identifiers = keys
            .iter()
            .map(|key| ObjectIdentifier::builder().key(key).build())
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to build ObjectIdentifier")?;
        let object_count = identifiers.len();

        let delete = Delete::builder()
            .set_objects(Some(identifiers))
            .build()
            .context("Failed to build Delete request")?;

        debug!(
            bucket = bucket,
            object_count = object_count,
            "sending DeleteObjects request."
        );

        let response = self
            .client
            .delete_objects()
            .bucket(bucket)
            .delete(delete)
            .send()
            .await
            .map_err(|e| {
                let (s3_error_code, s3_error_message) = extract_sdk_error_details(&e);
                error!(
                    bucket = bucket,
                    object_count = object_count,
                    s3_error_code = s3_error_code,
                    s3_error_message = s3_error_message,
                    "S3 DeleteObjects API call failed for {} objects in s3://{}: {} ({}).",
                    object_count,
                    bucket,
                    s3_error_code,
                    s3_error_message,
                );
                anyhow::anyhow!(e).context("aws_sdk_s3::client::delete_objects() failed.")
            })?;

        let deleted = response
            .deleted()
            .iter()
            .map(|deleted| DeletedKey {
                key: deleted.key().unwrap_or_default().to_string(),
            })
            .collect();

        let failed = response
            .errors()
            .iter()
            .map(|err| {
                let failed_key = FailedKey {
                    key: err.key().unwrap_or_default().to_string(),
                    error_code: err.code().unwrap_or("unknown").to_string(),
                    error_message: err.message().unwrap_or("no message").to_string(),
                };
                warn!(
                    bucket = bucket,
                    key = failed_key.key,
                    s3_error_code = failed_key.error_code,
                    s3_error_message = failed_key.error_message,
                    "DeleteObjects reported a per-key failure."
                );
                failed_key
            })
            .collect();

        Ok(DeleteResult { deleted, failed })
    }

    fn name(&self) -> &'static str {
        "api"
    }
}
