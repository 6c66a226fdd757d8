//! Database credential resolution.
//!
//! [`SecretStore`] is the async seam the aggregation stage reads credentials
//! through. [`SecretsManagerStore`] reads a JSON secret from AWS Secrets
//! Manager; [`EnvSecretStore`] reads `DB_*` environment variables.

use crate::error::SecretError;
use async_trait::async_trait;
use aws_sdk_secretsmanager::error::DisplayErrorContext;
use serde::{Deserialize, Deserializer};
use std::fmt;

/// Connection details for the results database.
#[derive(Clone, PartialEq, Eq, Deserialize)]
pub struct DatabaseCredentials {
    pub host: String,
    pub dbname: String,
    pub username: String,
    pub password: String,
    #[serde(deserialize_with = "port_from_number_or_string")]
    pub port: u16,
}

impl fmt::Debug for DatabaseCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseCredentials")
            .field("host", &self.host)
            .field("dbname", &self.dbname)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("port", &self.port)
            .finish()
    }
}

// RDS-generated secrets store the port as a number, hand-written ones often as a string.
fn port_from_number_or_string<'de, D>(deserializer: D) -> Result<u16, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Port {
        Number(u16),
        Text(String),
    }

    match Port::deserialize(deserializer)? {
        Port::Number(port) => Ok(port),
        Port::Text(text) => text.trim().parse().map_err(serde::de::Error::custom),
    }
}

/// Resolves the database credentials for one aggregation run.
#[async_trait]
pub trait SecretStore: Send + Sync {
    async fn database_credentials(&self) -> Result<DatabaseCredentials, SecretError>;
}

/// Reads credentials from a JSON secret with `host`, `dbname`, `username`,
/// `password` and `port` keys.
pub struct SecretsManagerStore {
    client: aws_sdk_secretsmanager::Client,
    secret_id: String,
}

impl SecretsManagerStore {
    pub fn new(aws_config: &aws_config::SdkConfig, secret_id: impl Into<String>) -> Self {
        Self {
            client: aws_sdk_secretsmanager::Client::new(aws_config),
            secret_id: secret_id.into(),
        }
    }
}

#[async_trait]
impl SecretStore for SecretsManagerStore {
    async fn database_credentials(&self) -> Result<DatabaseCredentials, SecretError> {
        let output = self
            .client
            .get_secret_value()
            .secret_id(&self.secret_id)
            .send()
            .await
            .map_err(|e| SecretError::Retrieval {
                id: self.secret_id.clone(),
                message: DisplayErrorContext(&e).to_string(),
            })?;
        let secret = output
            .secret_string
            .ok_or_else(|| SecretError::EmptySecret(self.secret_id.clone()))?;
        parse_credentials(&self.secret_id, &secret)
    }
}

/// Parses the JSON body of a credentials secret.
pub fn parse_credentials(id: &str, secret: &str) -> Result<DatabaseCredentials, SecretError> {
    serde_json::from_str(secret).map_err(|source| SecretError::Malformed {
        id: id.to_string(),
        source,
    })
}

/// Reads `DB_HOST`, `DB_NAME`, `DB_USER`, `DB_PASSWORD` and `DB_PORT` (default 5432).
#[derive(Debug, Default, Clone, Copy)]
pub struct EnvSecretStore;

impl EnvSecretStore {
    fn required(name: &'static str) -> Result<String, SecretError> {
        std::env::var(name)
            .ok()
            .filter(|v| !v.is_empty())
            .ok_or(SecretError::MissingVariable(name))
    }

    /// Builds credentials from any variable lookup; the trait impl passes the process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<DatabaseCredentials, SecretError>
    where
        F: Fn(&'static str) -> Result<String, SecretError>,
    {
        let port = match lookup("DB_PORT") {
            Ok(raw) => raw.trim().parse().map_err(|e| SecretError::InvalidVariable {
                name: "DB_PORT",
                message: format!("{e}"),
            })?,
            Err(SecretError::MissingVariable(_)) => 5432,
            Err(other) => return Err(other),
        };
        Ok(DatabaseCredentials {
            host: lookup("DB_HOST")?,
            dbname: lookup("DB_NAME")?,
            username: lookup("DB_USER")?,
            password: lookup("DB_PASSWORD")?,
            port,
        })
    }
}

#[async_trait]
impl SecretStore for EnvSecretStore {
    async fn database_credentials(&self) -> Result<DatabaseCredentials, SecretError> {
        Self::from_lookup(Self::required)
    }
}
