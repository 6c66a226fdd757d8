use crate::aggregate::CategoryTotals;
use crate::error::WriteError;
use chrono::Utc;
use sqlx::{Connection, PgConnection};
use tracing::info;

const INSERT_SQL: &str = r#"
    INSERT INTO accident_stats (created_at, road_name, vehicle, number_deaths)
    VALUES ($1, $2, $3, $4)
"#;

/// Inserts one row per (category, road) pair in a single transaction.
///
/// Either every row commits or none does: on any failure the transaction is
/// dropped without committing, which rolls it back. There is no upsert, so
/// running twice over the same totals stores the rows twice.
pub async fn write_totals(
    conn: &mut PgConnection,
    totals: &CategoryTotals,
) -> Result<usize, WriteError> {
    let mut tx = conn
        .begin()
        .await
        .map_err(|e| WriteError::Begin(e.to_string()))?;

    let mut written = 0;
    for record in totals.records() {
        let deaths =
            i32::try_from(record.number_of_deaths).map_err(|_| WriteError::OutOfRange {
                vehicle: record.vehicle_category.clone(),
                road: record.road_name.clone(),
                value: record.number_of_deaths,
            })?;
        sqlx::query(INSERT_SQL)
            .bind(Utc::now().naive_utc())
            .bind(&record.road_name)
            .bind(&record.vehicle_category)
            .bind(deaths)
            .execute(&mut *tx)
            .await
            .map_err(|e| WriteError::Insert {
                vehicle: record.vehicle_category.clone(),
                road: record.road_name.clone(),
                message: e.to_string(),
            })?;
        written += 1;
    }

    tx.commit()
        .await
        .map_err(|e| WriteError::Commit(e.to_string()))?;
    info!("Committed {} aggregation rows", written);
    Ok(written)
}
