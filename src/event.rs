use crate::error::{InputError, PipelineError};
use serde::Serialize;
use serde_json::Value;
use tracing::error;

/// Stage-one trigger. Without a link in the payload the link file is used.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadTrigger {
    pub link: Option<String>,
}

/// Stage-two trigger: which object to aggregate, and optionally where it lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregateTrigger {
    pub bucket_name: Option<String>,
    pub file_key: String,
}

// Absent or null is `None`; anything other than a non-empty string is rejected.
fn optional_string(payload: &Value, field: &'static str) -> Result<Option<String>, InputError> {
    match payload.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) if !s.trim().is_empty() => Ok(Some(s.trim().to_string())),
        Some(_) => Err(InputError::InvalidField { field }),
    }
}

impl DownloadTrigger {
    pub fn from_payload(payload: &Value) -> Result<Self, InputError> {
        Ok(Self {
            link: optional_string(payload, "link")?,
        })
    }
}

impl AggregateTrigger {
    pub fn from_payload(payload: &Value) -> Result<Self, InputError> {
        let file_key =
            optional_string(payload, "file_key")?.ok_or(InputError::MissingField("file_key"))?;
        Ok(Self {
            bucket_name: optional_string(payload, "bucket_name")?,
            file_key,
        })
    }
}

/// Outward result of either stage, shaped for the invoking trigger.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageResponse {
    #[serde(rename = "statusCode")]
    pub status_code: u16,
    pub body: Value,
}

impl StageResponse {
    pub fn ok(body: Value) -> Self {
        Self {
            status_code: 200,
            body,
        }
    }

    /// Maps a failed run to its status code and logs it.
    pub fn failure(err: &PipelineError) -> Self {
        let status_code = err.status_code();
        error!(
            "Stage failed: kind={}, status={}, error={}",
            err.kind(),
            status_code,
            err
        );
        Self {
            status_code,
            body: Value::String(err.to_string()),
        }
    }
}
