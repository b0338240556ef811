/*!
# Overview
s3bulkrm-rs deletes large numbers of objects from S3-compatible storage,
driven by a list file rather than a bucket listing.

Each input line names a bucket, an object id, a preview id and a display
name. The key actually deleted is a configurable prefix followed by the
preview id. Jobs are deleted one by one or grouped into multi-object delete
requests, by a pool of concurrent workers. Every job that could not be
deleted is written to a failure file in the input's own column order, so a
failed run can be retried by feeding that file back in.

## Features
- **Bounded memory**: the input is streamed and the ingestor is never more
  than one job (or batch) ahead of the worker pool
- **Batching**: up to 1000 keys per `DeleteObjects` request, never mixing buckets
- **Two backends**: the native S3 API, or the `aws` command line tool
- **Idle-based completion**: the run ends after a full interval without activity
- **Library-first**: the `s3bulkrm` CLI is a thin wrapper over this crate

Example usage
=============

```toml
[dependencies]
s3bulkrm-rs = "0.1"
tokio = { version = "1", features = ["full"] }
```

```no_run
use s3bulkrm_rs::config::args::parse_from_args;
use s3bulkrm_rs::{Config, DeletionPipeline, create_pipeline_cancellation_token};

#[tokio::main]
async fn main() {
    let args = vec![
        "s3bulkrm",
        "targets.csv",
        "http://localhost:9000",
        "16",
        "1000",
        "500",
        "failures.csv",
        "urn:oid:",
    ];

    let parsed_args = parse_from_args(args).unwrap();
    let config = Config::try_from(parsed_args).unwrap();
    let cancellation_token = create_pipeline_cancellation_token();
    let mut pipeline = DeletionPipeline::new(config, cancellation_token)
        .await
        .unwrap();
    pipeline.close_stats_sender();
    pipeline.run().await;

    if pipeline.has_error() {
        eprintln!("{:?}", pipeline.get_errors_and_consume().unwrap()[0]);
    }
}
```
*/

pub mod backend;
pub mod config;
pub mod dispatcher;
pub mod failure_sink;
pub mod ingestor;
pub mod monitor;
pub mod pipeline;
pub mod types;
pub mod worker;

#[cfg(test)]
pub(crate) mod test_utils;

pub use config::Config;
pub use pipeline::DeletionPipeline;
pub use types::error::{S3BulkRmError, exit_code_from_error, is_cancelled_error};
pub use types::token::{PipelineCancellationToken, create_pipeline_cancellation_token};
pub use types::{DeletionStatistics, DeletionStats, Job, JobBatch};
