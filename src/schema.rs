use crate::error::SchemaError;
use sqlx::PgConnection;
use tracing::{info, warn};

pub const TABLE_NAME: &str = "accident_stats";

/// The single table the pipeline writes to. Created if absent, never migrated.
pub const CREATE_TABLE_SQL: &str = r#"
    CREATE TABLE IF NOT EXISTS accident_stats (
        id SERIAL PRIMARY KEY,
        created_at TIMESTAMP,
        road_name VARCHAR(255),
        vehicle VARCHAR(50),
        number_deaths INT
    )
"#;

/// Creates the results table if it does not exist yet.
///
/// Runs outside a transaction so the DDL is committed immediately. Safe to call on
/// every run: it never drops or alters anything.
pub async fn ensure_schema(conn: &mut PgConnection) -> Result<(), SchemaError> {
    match sqlx::query(CREATE_TABLE_SQL).execute(&mut *conn).await {
        Ok(_) => {
            info!("Table {} is present", TABLE_NAME);
            Ok(())
        }
        Err(e) if lost_creation_race(&e) => {
            warn!(
                "Table {} was created concurrently by another run: {}",
                TABLE_NAME, e
            );
            Ok(())
        }
        Err(e) => Err(SchemaError(e.to_string())),
    }
}

// Two sessions racing on IF NOT EXISTS can both pass the existence check; the loser then
// hits a unique violation on the catalog (23505) or duplicate_table (42P07).
fn lost_creation_race(error: &sqlx::Error) -> bool {
    error
        .as_database_error()
        .and_then(|db| db.code())
        .map(|code| code == "23505" || code == "42P07")
        .unwrap_or(false)
}
