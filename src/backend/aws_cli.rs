//! Deletion through the external `aws` command line tool.
//!
//! Single keys use `aws s3 rm s3://<bucket>/<key>`, groups of keys use
//! `aws s3api delete-objects` and the JSON document it prints.

use std::ffi::OsString;
use std::path::PathBuf;
use std::process::Output;

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::{debug, error, warn};

use crate::backend::{DeleteResult, DeletedKey, DeletionBackend, FailedKey};
use crate::config::ClientConfig;
use crate::types::error::S3BulkRmError;
use crate::types::{AccessKeys, ClientConfigLocation, S3Credentials};

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct DeleteRequest<'a> {
    objects: Vec<ObjectIdentifier<'a>>,
    quiet: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct ObjectIdentifier<'a> {
    key: &'a str,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "PascalCase")]
struct DeleteObjectsOutput {
    #[serde(default)]
    deleted: Vec<DeletedEntry>,
    #[serde(default)]
    errors: Vec<ErrorEntry>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DeletedEntry {
    key: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ErrorEntry {
    key: String,
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Clone, Debug)]
pub struct AwsCliBackend {
    aws_cli_path: PathBuf,
    endpoint_url: Option<String>,
    region: Option<String>,
    profile: Option<String>,
    access_keys: Option<AccessKeys>,
    client_config_location: ClientConfigLocation,
}

impl AwsCliBackend {
    pub fn new(aws_cli_path: PathBuf, client_config: &ClientConfig) -> Self {
        let (profile, access_keys) = match &client_config.credential {
            S3Credentials::Profile(profile) => (Some(profile.clone()), None),
            S3Credentials::Credentials { access_keys } => (None, Some(access_keys.clone())),
            S3Credentials::FromEnvironment => (None, None),
        };

        Self {
            aws_cli_path,
            endpoint_url: client_config.endpoint_url.clone(),
            region: client_config.region.clone(),
            profile,
            access_keys,
            client_config_location: client_config.client_config_location.clone(),
        }
    }

    fn common_args(&self) -> Vec<OsString> {
        let mut args = Vec::new();
        if let Some(endpoint_url) = &self.endpoint_url {
            args.push("--endpoint-url".into());
            args.push(endpoint_url.into());
        }
        if let Some(region) = &self.region {
            args.push("--region".into());
            args.push(region.into());
        }
        if let Some(profile) = &self.profile {
            args.push("--profile".into());
            args.push(profile.into());
        }
        args
    }

    fn rm_args(&self, bucket: &str, key: &str) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            "s3".into(),
            "rm".into(),
            format!("s3://{bucket}/{key}").into(),
        ];
        args.extend(self.common_args());
        args
    }

    fn delete_objects_args(&self, bucket: &str, keys: &[String]) -> Result<Vec<OsString>> {
        let request = DeleteRequest {
            objects: keys.iter().map(|key| ObjectIdentifier { key }).collect(),
            quiet: false,
        };
        let delete = serde_json::to_string(&request).context("Failed to encode delete request")?;

        let mut args: Vec<OsString> = vec![
            "s3api".into(),
            "delete-objects".into(),
            "--bucket".into(),
            bucket.into(),
            "--delete".into(),
            delete.into(),
            "--output".into(),
            "json".into(),
        ];
        args.extend(self.common_args());
        Ok(args)
    }

    async fn run(&self, args: Vec<OsString>) -> Result<Output> {
        let mut command = Command::new(&self.aws_cli_path);
        command.args(&args).kill_on_drop(true);

        if let Some(access_keys) = &self.access_keys {
            command
                .env("AWS_ACCESS_KEY_ID", &access_keys.access_key)
                .env("AWS_SECRET_ACCESS_KEY", &access_keys.secret_access_key);
            if let Some(session_token) = &access_keys.session_token {
                command.env("AWS_SESSION_TOKEN", session_token);
            }
        }
        if let Some(path) = &self.client_config_location.aws_config_file {
            command.env("AWS_CONFIG_FILE", path);
        }
        if let Some(path) = &self.client_config_location.aws_shared_credentials_file {
            command.env("AWS_SHARED_CREDENTIALS_FILE", path);
        }

        command.output().await.map_err(|e| {
            anyhow!(S3BulkRmError::AwsCli(format!(
                "failed to start {}: {e}",
                self.aws_cli_path.display()
            )))
        })
    }
}

fn stderr_of(output: &Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    if stderr.is_empty() {
        "(no stderr output)".to_string()
    } else {
        stderr
    }
}

fn parse_delete_objects_output(stdout: &[u8], keys: &[String]) -> Result<DeleteResult> {
    let text = String::from_utf8_lossy(stdout);

    // A quiet response prints nothing when every key was deleted.
    let output: DeleteObjectsOutput = if text.trim().is_empty() {
        DeleteObjectsOutput {
            deleted: keys
                .iter()
                .map(|key| DeletedEntry { key: key.clone() })
                .collect(),
            errors: vec![],
        }
    } else {
        serde_json::from_str(&text).context("Failed to parse aws s3api delete-objects output")?
    };

    Ok(DeleteResult {
        deleted: output
            .deleted
            .into_iter()
            .map(|entry| DeletedKey { key: entry.key })
            .collect(),
        failed: output
            .errors
            .into_iter()
            .map(|entry| FailedKey {
                key: entry.key,
                error_code: entry.code.unwrap_or_else(|| "unknown".to_string()),
                error_message: entry.message.unwrap_or_else(|| "no message".to_string()),
            })
            .collect(),
    })
}

#[async_trait]
impl DeletionBackend for AwsCliBackend {
    async fn delete_object(&self, bucket: &str, key: &str) -> Result<()> {
        let output = self.run(self.rm_args(bucket, key)).await?;

        if !output.status.success() {
            let stderr = stderr_of(&output);
            warn!(
                bucket = bucket,
                key = key,
                exit_status = %output.status,
                stderr = stderr,
                "aws s3 rm failed for s3://{}/{}.",
                bucket,
                key,
            );
            return Err(anyhow!(S3BulkRmError::AwsCli(stderr)).context("aws s3 rm failed."));
        }

        debug!(bucket = bucket, key = key, "aws s3 rm completed.");
        Ok(())
    }

    async fn delete_objects(&self, bucket: &str, keys: &[String]) -> Result<DeleteResult> {
        let output = self.run(self.delete_objects_args(bucket, keys)?).await?;

        // Per-key errors can come with a non-zero exit status, so a parsable
        // document wins over the status.
        match parse_delete_objects_output(&output.stdout, keys) {
            Ok(result) if output.status.success() || !output.stdout.is_empty() => {
                for failed in &result.failed {
                    warn!(
                        bucket = bucket,
                        key = failed.key,
                        s3_error_code = failed.error_code,
                        s3_error_message = failed.error_message,
                        "aws s3api delete-objects reported a per-key failure."
                    );
                }
                Ok(result)
            }
            _ => {
                let stderr = stderr_of(&output);
                error!(
                    bucket = bucket,
                    object_count = keys.len(),
                    exit_status = %output.status,
                    stderr = stderr,
                    "aws s3api delete-objects failed for {} objects in s3://{}.",
                    keys.len(),
                    bucket,
                );
                Err(anyhow!(S3BulkRmError::AwsCli(stderr))
                    .context("aws s3api delete-objects failed."))
            }
        }
    }

    fn name(&self) -> &'static str {
        "aws-cli"
    }
}
