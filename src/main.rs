// Lambda entry point for the accident statistics pipeline.
// One binary serves both stages; PIPELINE_STAGE picks which handler the runtime calls.

mod aggregate;
mod config;
mod db;
mod error;
mod event;
mod locator;
mod pipeline;
mod schema;
mod secrets;
mod source;
mod storage;
mod writer;

use anyhow::Context;
use config::{Config, Stage};
use db::PgConnector;
use event::StageResponse;
use lambda_runtime::{run, service_fn, Error, LambdaEvent};
use pipeline::{AggregationDeps, DownloadDeps};
use secrets::{EnvSecretStore, SecretStore, SecretsManagerStore};
use std::time::Duration;
use storage::{load_aws_config, S3ObjectStore};
use tracing::info;

// Main function for the binary. Sets up logging, builds the clients once per
// cold start and runs the Lambda runtime with the handler for the configured stage.
#[tokio::main]
async fn main() -> Result<(), Error> {
    // CloudWatch timestamps each line, so the subscriber doesn't.
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_target(false)
        .without_time()
        .init();

    // A bad configuration stops the process before it accepts any invocation.
    let config = Config::new();
    config.validate()?;
    let stage = config.stage()?;
    info!("Starting accident-stats lambda: stage = {:?}", stage);

    let aws_config = load_aws_config(&config).await;
    let store = S3ObjectStore::new(&aws_config);
    let config = &config;

    match stage {
        Stage::Download => {
            let http = reqwest::Client::builder()
                .timeout(Duration::from_secs(config.http_timeout_secs))
                .build()
                .context("Failed to build HTTP client")?;
            let deps = DownloadDeps {
                store: &store,
                http: &http,
            };
            let deps = &deps;
            run(service_fn(move |event: LambdaEvent<serde_json::Value>| async move {
                Ok::<StageResponse, Error>(
                    pipeline::handle_download(config, deps, &event.payload).await,
                )
            }))
            .await
        }
        Stage::Aggregate => {
            // Credentials come from Secrets Manager when a secret is configured,
            // else from the DB_* variables.
            let secrets: Box<dyn SecretStore> = match &config.db_secret_arn {
                Some(arn) => Box::new(SecretsManagerStore::new(&aws_config, arn.clone())),
                None => Box::new(EnvSecretStore),
            };
            let connector = PgConnector;
            let deps = AggregationDeps {
                store: &store,
                secrets: secrets.as_ref(),
                database: &connector,
            };
            let deps = &deps;
            run(service_fn(move |event: LambdaEvent<serde_json::Value>| async move {
                Ok::<StageResponse, Error>(
                    pipeline::handle_aggregate(config, deps, &event.payload).await,
                )
            }))
            .await
        }
    }
}

// Unit tests are in a separate file (src/tests.rs) for clarity and maintainability.
#[cfg(test)]
mod tests;
