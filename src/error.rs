use thiserror::Error;

/// Start-up error type. Raised before the Lambda runtime starts, so the
/// process exits instead of serving invocations with a bad configuration.
#[derive(Debug, Error)]
pub enum AppError {
    /// Configuration value missing or invalid
    #[error("Configuration error: {0}")]
    Config(String),
}

/// The trigger payload is missing a required field or carries an invalid one.
#[derive(Debug, Error)]
pub enum InputError {
    #[error("missing required information: '{0}'")]
    MissingField(&'static str),
    #[error("field '{field}' must be a non-empty string")]
    InvalidField { field: &'static str },
    #[error("link file '{0}' is empty or has no 'link' key")]
    LinkMissing(String),
    #[error("cannot derive a file name from link '{0}'")]
    InvalidLink(String),
}

/// Failures while resolving the target container by prefix.
#[derive(Debug, Error)]
pub enum LocatorError {
    #[error("no bucket available with prefix '{prefix}'")]
    NoMatchingContainer { prefix: String },
    #[error("failed to list buckets: {0}")]
    Unavailable(String),
}

/// Reading an object from the store failed.
#[derive(Debug, Error)]
#[error("failed to download s3://{container}/{key}: {message}")]
pub struct DownloadError {
    pub container: String,
    pub key: String,
    pub message: String,
}

/// Writing an object to the store failed.
#[derive(Debug, Error)]
#[error("failed to upload s3://{container}/{key}: {message}")]
pub struct UploadError {
    pub container: String,
    pub key: String,
    pub message: String,
}

/// The stage-one link file could not be read or parsed.
#[derive(Debug, Error)]
pub enum LinkFileError {
    #[error("failed to read link file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse link file '{path}': {source}")]
    Yaml {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },
}

/// Fetching the remote dataset over HTTP failed.
#[derive(Debug, Error)]
#[error("failed to fetch '{url}': {source}")]
pub struct FetchError {
    pub url: String,
    #[source]
    pub source: reqwest::Error,
}

/// The CSV object is malformed. Any of these aborts the whole aggregation.
#[derive(Debug, Error)]
pub enum CsvParseError {
    #[error("failed to read CSV input: {0}")]
    Read(#[from] csv::Error),
    #[error("failed to open staged CSV file '{path}': {source}")]
    Staging {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("CSV input has no header line")]
    MissingHeader,
    #[error("header has no '{0}' column")]
    MissingColumn(String),
    #[error("line {line}: missing value for column '{column}'")]
    MissingField { line: u64, column: String },
    #[error("line {line}: column '{column}' has non-integer value '{value}'")]
    InvalidInteger {
        line: u64,
        column: String,
        value: String,
    },
    #[error("line {line}: deaths total for road '{road}' overflowed")]
    Overflow { line: u64, road: String },
}

/// Database credentials could not be resolved.
#[derive(Debug, Error)]
pub enum SecretError {
    #[error("environment variable '{0}' is not set")]
    MissingVariable(&'static str),
    #[error("environment variable '{name}' is invalid: {message}")]
    InvalidVariable { name: &'static str, message: String },
    #[error("failed to retrieve secret '{id}': {message}")]
    Retrieval { id: String, message: String },
    #[error("secret '{0}' has no string value")]
    EmptySecret(String),
    #[error("secret '{id}' is not valid credentials JSON: {source}")]
    Malformed {
        id: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Opening the database session failed.
#[derive(Debug, Error)]
#[error("failed to connect to {host}:{port}/{dbname}: {message}")]
pub struct ConnectError {
    pub host: String,
    pub port: u16,
    pub dbname: String,
    pub message: String,
}

/// Provisioning the results table failed.
#[derive(Debug, Error)]
#[error("failed to create table: {0}")]
pub struct SchemaError(pub String);

/// Persisting the aggregation failed. Nothing from the batch is committed.
#[derive(Debug, Error)]
pub enum WriteError {
    #[error("failed to open transaction: {0}")]
    Begin(String),
    #[error("failed to insert ({vehicle}, {road}): {message}")]
    Insert {
        vehicle: String,
        road: String,
        message: String,
    },
    #[error("deaths total {value} for ({vehicle}, {road}) does not fit the table column")]
    OutOfRange {
        vehicle: String,
        road: String,
        value: i64,
    },
    #[error("failed to commit transaction: {0}")]
    Commit(String),
}

/// Every failure a stage can end in. Only the orchestrator boundary turns
/// these into outward status codes.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Invalid input: {0}")]
    Input(#[from] InputError),
    #[error("Error loading link file: {0}")]
    LinkFile(#[from] LinkFileError),
    #[error("Error downloading source file: {0}")]
    Fetch(#[from] FetchError),
    #[error("Error getting bucket: {0}")]
    Locator(#[from] LocatorError),
    #[error("Error downloading file from S3: {0}")]
    Download(#[from] DownloadError),
    #[error("Error saving file to S3: {0}")]
    Upload(#[from] UploadError),
    #[error("Error processing CSV file: {0}")]
    CsvParse(#[from] CsvParseError),
    #[error("Error retrieving database credentials: {0}")]
    Secret(#[from] SecretError),
    #[error("Error connecting to database: {0}")]
    Connect(#[from] ConnectError),
    #[error("Error creating table: {0}")]
    Schema(#[from] SchemaError),
    #[error("Error inserting data into database: {0}")]
    Write(#[from] WriteError),
}

impl PipelineError {
    /// HTTP-style status for the invoking trigger: caller mistakes are 400,
    /// everything downstream is 500.
    pub fn status_code(&self) -> u16 {
        match self {
            PipelineError::Input(_) => 400,
            _ => 500,
        }
    }

    /// Short machine-readable name of the failed stage, used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::Input(_) => "input",
            PipelineError::LinkFile(_) => "link_file",
            PipelineError::Fetch(_) => "fetch",
            PipelineError::Locator(_) => "locator",
            PipelineError::Download(_) => "download",
            PipelineError::Upload(_) => "upload",
            PipelineError::CsvParse(_) => "csv_parse",
            PipelineError::Secret(_) => "secret",
            PipelineError::Connect(_) => "connect",
            PipelineError::Schema(_) => "schema",
            PipelineError::Write(_) => "write",
        }
    }
}
