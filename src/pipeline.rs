//! Stage orchestration.
//!
//! Both stages run strictly in order and stop at the first failure; nothing
//! is retried. Errors stay typed until [`handle_download`] and
//! [`handle_aggregate`] turn them into a [`StageResponse`].

use crate::aggregate::{self, AggregationColumns, CategoryTotals};
use crate::config::Config;
use crate::db::{DatabaseConnector, StatsSession};
use crate::error::{CsvParseError, DownloadError, PipelineError};
use crate::event::{AggregateTrigger, DownloadTrigger, StageResponse};
use crate::locator;
use crate::secrets::SecretStore;
use crate::source;
use crate::storage::ObjectStore;
use serde::Serialize;
use serde_json::json;
use std::fs::File;
use std::io::BufReader;
use tracing::info;

/// Collaborators of the download stage.
pub struct DownloadDeps<'a> {
    pub store: &'a dyn ObjectStore,
    pub http: &'a reqwest::Client,
}

/// Collaborators of the aggregation stage.
pub struct AggregationDeps<'a> {
    pub store: &'a dyn ObjectStore,
    pub secrets: &'a dyn SecretStore,
    pub database: &'a dyn DatabaseConnector,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DownloadSummary {
    pub file_name: String,
    pub bucket_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregationSummary {
    pub bucket_name: String,
    pub file_key: String,
    pub records_written: usize,
}

/// Runs stage one and always returns a structured response.
pub async fn handle_download(
    config: &Config,
    deps: &DownloadDeps<'_>,
    payload: &serde_json::Value,
) -> StageResponse {
    match run_download(config, deps, payload).await {
        Ok(summary) => {
            info!(
                "Download and upload completed: file_name={}, bucket_name={}",
                summary.file_name, summary.bucket_name
            );
            StageResponse::ok(json!(summary))
        }
        Err(e) => StageResponse::failure(&e),
    }
}

/// Resolve link → fetch → locate bucket → put object.
pub async fn run_download(
    config: &Config,
    deps: &DownloadDeps<'_>,
    payload: &serde_json::Value,
) -> Result<DownloadSummary, PipelineError> {
    let trigger = DownloadTrigger::from_payload(payload)?;
    let link = match trigger.link {
        Some(link) => link,
        None => source::read_link_file(&config.link_file)?,
    };
    let file_name = source::file_name_from_link(&link)?;
    info!("Fetching dataset {} as {}", link, file_name);

    let body = source::fetch_dataset(deps.http, &link).await?;
    let location = locator::resolve(deps.store, &config.bucket_prefix).await?;
    info!(
        "Uploading {} to bucket {} (prefix {})",
        file_name, location.resolved_container, location.container_prefix
    );
    deps.store
        .put_object(&location.resolved_container, &file_name, body)
        .await?;

    Ok(DownloadSummary {
        file_name,
        bucket_name: location.resolved_container,
    })
}

/// Runs stage two and always returns a structured response.
pub async fn handle_aggregate(
    config: &Config,
    deps: &AggregationDeps<'_>,
    payload: &serde_json::Value,
) -> StageResponse {
    match run_aggregation(config, deps, payload).await {
        Ok(summary) => {
            info!(
                "Aggregation stored: bucket={}, key={}, records={}",
                summary.bucket_name, summary.file_key, summary.records_written
            );
            StageResponse::ok(json!({
                "message": "Data successfully processed and stored.",
                "bucket_name": summary.bucket_name,
                "file_key": summary.file_key,
                "records_written": summary.records_written,
            }))
        }
        Err(e) => StageResponse::failure(&e),
    }
}

/// Validate trigger → credentials → locate → download → aggregate → schema → write.
pub async fn run_aggregation(
    config: &Config,
    deps: &AggregationDeps<'_>,
    payload: &serde_json::Value,
) -> Result<AggregationSummary, PipelineError> {
    let trigger = AggregateTrigger::from_payload(payload)?;
    let credentials = deps.secrets.database_credentials().await?;

    let bucket_name = match trigger.bucket_name {
        Some(bucket) => bucket,
        None => {
            let location = locator::resolve(deps.store, &config.bucket_prefix).await?;
            info!(
                "Reading {} from bucket {} (prefix {})",
                trigger.file_key, location.resolved_container, location.container_prefix
            );
            location.resolved_container
        }
    };

    let body = deps.store.get_object(&bucket_name, &trigger.file_key).await?;
    stage_object(&config.csv_file, &bucket_name, &trigger.file_key, &body)?;

    let columns = AggregationColumns::from_config(config);
    let totals = aggregate_staged(&config.csv_file, &columns)?;
    info!(
        "Aggregated {} (category, road) pairs from {}",
        totals.len(),
        trigger.file_key
    );

    let mut session = deps.database.connect(&credentials).await?;
    let outcome = persist(session.as_mut(), &totals).await;
    session.close().await;
    let records_written = outcome?;

    Ok(AggregationSummary {
        bucket_name,
        file_key: trigger.file_key,
        records_written,
    })
}

// Schema first, then the write; a schema failure means no insert is attempted.
async fn persist(
    session: &mut dyn StatsSession,
    totals: &CategoryTotals,
) -> Result<usize, PipelineError> {
    session.ensure_schema().await?;
    Ok(session.write(totals).await?)
}

// Writes the object to local ephemeral storage; a failure here is still part of the download.
fn stage_object(path: &str, bucket: &str, key: &str, body: &[u8]) -> Result<(), DownloadError> {
    std::fs::write(path, body).map_err(|e| DownloadError {
        container: bucket.to_string(),
        key: key.to_string(),
        message: format!("failed to write {path}: {e}"),
    })
}

fn aggregate_staged(
    path: &str,
    columns: &AggregationColumns,
) -> Result<CategoryTotals, CsvParseError> {
    let file = File::open(path).map_err(|source| CsvParseError::Staging {
        path: path.to_string(),
        source,
    })?;
    aggregate::aggregate(BufReader::new(file), columns)
}
