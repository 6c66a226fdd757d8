//! Database sessions for the aggregation stage.
//!
//! The orchestrator only sees [`DatabaseConnector`] and [`StatsSession`], so
//! tests can run the full stage against in-memory fakes. [`PgConnector`] is the
//! Postgres implementation used in Lambda.

use crate::aggregate::CategoryTotals;
use crate::error::{ConnectError, SchemaError, WriteError};
use crate::secrets::DatabaseCredentials;
use crate::{schema, writer};
use async_trait::async_trait;
use sqlx::postgres::{PgConnectOptions, PgConnection};
use sqlx::{ConnectOptions, Connection};
use tracing::{info, warn};

/// One open database session, used for schema provisioning and then the write.
#[async_trait]
pub trait StatsSession: Send {
    async fn ensure_schema(&mut self) -> Result<(), SchemaError>;
    /// Persists every pair in `totals` atomically and returns the row count.
    async fn write(&mut self, totals: &CategoryTotals) -> Result<usize, WriteError>;
    /// Releases the session. Failures are logged, not returned.
    async fn close(self: Box<Self>);
}

/// Opens sessions from resolved credentials.
#[async_trait]
pub trait DatabaseConnector: Send + Sync {
    async fn connect(
        &self,
        credentials: &DatabaseCredentials,
    ) -> Result<Box<dyn StatsSession>, ConnectError>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct PgConnector;

#[async_trait]
impl DatabaseConnector for PgConnector {
    async fn connect(
        &self,
        credentials: &DatabaseCredentials,
    ) -> Result<Box<dyn StatsSession>, ConnectError> {
        let options = PgConnectOptions::new()
            .host(&credentials.host)
            .port(credentials.port)
            .database(&credentials.dbname)
            .username(&credentials.username)
            .password(&credentials.password);
        let conn = options.connect().await.map_err(|e| ConnectError {
            host: credentials.host.clone(),
            port: credentials.port,
            dbname: credentials.dbname.clone(),
            message: e.to_string(),
        })?;
        info!(
            "Connected to database {} on {}:{}",
            credentials.dbname, credentials.host, credentials.port
        );
        Ok(Box::new(PgSession::new(conn)))
    }
}

/// A single Postgres connection. Dropping it closes the socket.
pub struct PgSession {
    conn: PgConnection,
}

impl PgSession {
    pub fn new(conn: PgConnection) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl StatsSession for PgSession {
    async fn ensure_schema(&mut self) -> Result<(), SchemaError> {
        schema::ensure_schema(&mut self.conn).await
    }

    async fn write(&mut self, totals: &CategoryTotals) -> Result<usize, WriteError> {
        writer::write_totals(&mut self.conn, totals).await
    }

    async fn close(self: Box<Self>) {
        if let Err(e) = self.conn.close().await {
            warn!("Failed to close database connection cleanly: {}", e);
        }
    }
}
