use crate::error::{FetchError, InputError, LinkFileError, PipelineError};
use bytes::Bytes;
use reqwest::Client;
use tracing::info;

/// Reads the dataset link from the YAML link file (`link: https://...`).
///
/// An empty file or one without a string `link` key is a caller error; a file
/// that cannot be read or parsed is not.
pub fn read_link_file(path: &str) -> Result<String, PipelineError> {
    let contents = std::fs::read_to_string(path).map_err(|source| LinkFileError::Io {
        path: path.to_string(),
        source,
    })?;
    let document: serde_yaml::Value =
        serde_yaml::from_str(&contents).map_err(|source| LinkFileError::Yaml {
            path: path.to_string(),
            source,
        })?;
    let link = document
        .get("link")
        .and_then(serde_yaml::Value::as_str)
        .map(str::trim)
        .filter(|link| !link.is_empty())
        .ok_or_else(|| InputError::LinkMissing(path.to_string()))?;
    Ok(link.to_string())
}

/// The object key a link is stored under: its last path segment.
pub fn file_name_from_link(link: &str) -> Result<String, InputError> {
    link.split('/')
        .next_back()
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .ok_or_else(|| InputError::InvalidLink(link.to_string()))
}

/// Downloads the dataset, treating any non-2xx status as a failure.
pub async fn fetch_dataset(client: &Client, url: &str) -> Result<Bytes, FetchError> {
    let fetch_error = |source: reqwest::Error| FetchError {
        url: url.to_string(),
        source,
    };
    let response = client.get(url).send().await.map_err(fetch_error)?;
    info!("Response received from {}: {:?}", url, response.status());
    let body = response
        .error_for_status()
        .map_err(fetch_error)?
        .bytes()
        .await
        .map_err(fetch_error)?;
    info!("Fetched {} bytes from {}", body.len(), url);
    Ok(body)
}
