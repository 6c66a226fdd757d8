// Centralised configuration struct for both pipeline stages.
// Everything is read from the Lambda environment so the same binary serves either stage.

use crate::error::AppError;
use std::str::FromStr;

/// Default vehicle categories tracked by the aggregation, in column order.
pub const DEFAULT_VEHICLE_CATEGORIES: &str = "automovel,bicicleta,caminhao,moto,onibus";

/// Which half of the pipeline this deployment runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Fetch the remote CSV and store it in the bucket.
    Download,
    /// Aggregate the stored CSV into the database.
    Aggregate,
}

impl FromStr for Stage {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "download" => Ok(Stage::Download),
            "aggregate" => Ok(Stage::Aggregate),
            other => Err(AppError::Config(format!(
                "Unknown pipeline stage '{other}', expected 'download' or 'aggregate'"
            ))),
        }
    }
}

/// Configuration for the application, loaded from environment variables or defaults.
#[derive(Debug, Clone)]
pub struct Config {
    /// Raw stage name; see [`Config::stage`].
    pub stage: String,
    /// Prefix the target bucket name starts with.
    pub bucket_prefix: String,
    /// Fallback AWS region when the provider chain has none.
    pub aws_region: String,
    /// YAML file holding the dataset link for stage one.
    pub link_file: String,
    /// Local path the downloaded CSV is staged at before aggregation.
    pub csv_file: String,
    /// Timeout for the stage-one dataset download.
    pub http_timeout_secs: u64,
    /// Column holding the road segment name.
    pub road_column: String,
    /// Column holding the death count.
    pub deaths_column: String,
    /// Category columns to aggregate, in order.
    pub vehicle_categories: Vec<String>,
    /// Secrets Manager id for the database credentials. Falls back to `DB_*` variables when unset.
    pub db_secret_arn: Option<String>,
}

impl Config {
    /// Create a new Config by reading environment variables or using defaults.
    pub fn new() -> Self {
        Self {
            stage: Self::get_env_or_default("PIPELINE_STAGE", "aggregate"),
            bucket_prefix: Self::get_env_or_default("BUCKET_PREFIX", "desafio-embarca"),
            aws_region: Self::get_env_or_default("AWS_REGION", "us-east-1"),
            link_file: Self::get_env_or_default("LINK_FILE", "link.yml"),
            csv_file: Self::get_csv_file(),
            http_timeout_secs: Self::get_env_or_default("HTTP_TIMEOUT_SECS", "60")
                .parse()
                .unwrap_or(60),
            road_column: Self::get_env_or_default("ROAD_COLUMN", "trecho"),
            deaths_column: Self::get_env_or_default("DEATHS_COLUMN", "mortos"),
            vehicle_categories: parse_categories(&Self::get_env_or_default(
                "VEHICLE_CATEGORIES",
                DEFAULT_VEHICLE_CATEGORIES,
            )),
            db_secret_arn: std::env::var("DB_SECRET_ARN")
                .ok()
                .filter(|arn| !arn.trim().is_empty()),
        }
    }

    /// Validate the configuration, returning an error if any required value is missing or invalid.
    pub fn validate(&self) -> Result<(), AppError> {
        self.stage()?;
        if self.bucket_prefix.trim().is_empty() {
            return Err(AppError::Config(
                "S3 bucket prefix must not be empty".to_string(),
            ));
        }
        if self.link_file.trim().is_empty() {
            return Err(AppError::Config(
                "Link file path must not be empty".to_string(),
            ));
        }
        if self.csv_file.trim().is_empty() {
            return Err(AppError::Config(
                "CSV file name must not be empty".to_string(),
            ));
        }
        if self.http_timeout_secs == 0 {
            return Err(AppError::Config(
                "HTTP timeout must be greater than zero".to_string(),
            ));
        }
        if self.road_column.trim().is_empty() || self.deaths_column.trim().is_empty() {
            return Err(AppError::Config(
                "Road and deaths column names must not be empty".to_string(),
            ));
        }
        if self.vehicle_categories.is_empty() {
            return Err(AppError::Config(
                "At least one vehicle category must be tracked".to_string(),
            ));
        }
        for (i, category) in self.vehicle_categories.iter().enumerate() {
            if self.vehicle_categories[..i].contains(category) {
                return Err(AppError::Config(format!(
                    "Vehicle category '{category}' is listed twice"
                )));
            }
        }
        Ok(())
    }

    /// The stage this deployment serves.
    pub fn stage(&self) -> Result<Stage, AppError> {
        self.stage.parse()
    }

    /// Helper to get an environment variable or use a default value if not set.
    fn get_env_or_default(var: &str, default: &str) -> String {
        std::env::var(var).unwrap_or_else(|_| default.to_string())
    }

    /// Returns the CSV file path. In AWS Lambda, always use /tmp/ (the only writable directory).
    fn get_csv_file() -> String {
        let filename = Self::get_env_or_default("CSV_FILE", "accidents.csv");
        if std::env::var("LAMBDA_TASK_ROOT").is_ok() {
            format!("/tmp/{filename}")
        } else {
            filename
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

/// Splits a comma-separated category list, dropping blanks.
pub fn parse_categories(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .map(str::to_string)
        .collect()
}
