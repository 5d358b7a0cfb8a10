use log::debug;
use sqlx::{QueryBuilder, SqliteConnection};

use crate::db_types::{DispenseLog, DispenseLogUpdate, DispenseStatus, NewDispenseLog};

/// Inserts a new `pending` log row and returns it. One row per dispatched (machine, slot) unit, created before
/// the transport is touched.
pub async fn insert_dispense_log(log: NewDispenseLog, conn: &mut SqliteConnection) -> Result<DispenseLog, sqlx::Error> {
    // `fetch_all` drives the statement to completion so the implicit transaction commits before this returns;
    // `fetch_one` would drop the statement after the first row, leaving the insert invisible to other connections.
    let rows: Vec<DispenseLog> = sqlx::query_as(
        r#"
            INSERT INTO dispense_logs (payment_id, machine_id, slot_number, product_id, status)
            VALUES ($1, $2, $3, $4, 'pending')
            RETURNING *
        "#,
    )
    .bind(log.payment_id)
    .bind(log.machine_id)
    .bind(log.slot_number)
    .bind(log.product_id)
    .fetch_all(conn)
    .await?;
    let log = rows.into_iter().next().ok_or(sqlx::Error::RowNotFound)?;
    debug!("🗃️ Dispense log #{} created for payment {} slot {}", log.id, log.payment_id, log.slot_number);
    Ok(log)
}

/// Applies a partial update to a log row. Only the populated fields are written; `updated_at` is always
/// refreshed.
pub async fn update_dispense_log(
    log_id: i64,
    update: DispenseLogUpdate,
    conn: &mut SqliteConnection,
) -> Result<(), sqlx::Error> {
    let mut builder = QueryBuilder::new("UPDATE dispense_logs SET updated_at = CURRENT_TIMESTAMP");
    if let Some(status) = update.status {
        builder.push(", status = ").push_bind(status);
    }
    if let Some(message) = update.error_message {
        builder.push(", error_message = ").push_bind(message);
    }
    if let Some(response) = update.gateway_response {
        builder.push(", gateway_response = ").push_bind(response);
    }
    if let Some(count) = update.attempt_count {
        builder.push(", attempt_count = ").push_bind(count);
    }
    builder.push(" WHERE id = ").push_bind(log_id);
    builder.build().execute(conn).await?;
    Ok(())
}

/// All log rows for a payment, newest first.
pub async fn fetch_logs_for_payment(
    payment_id: &str,
    conn: &mut SqliteConnection,
) -> Result<Vec<DispenseLog>, sqlx::Error> {
    let logs = sqlx::query_as("SELECT * FROM dispense_logs WHERE payment_id = $1 ORDER BY created_at DESC, id DESC")
        .bind(payment_id)
        .fetch_all(conn)
        .await?;
    Ok(logs)
}

/// Promotes every `sent` log for a payment to `confirmed`. Returns the number of rows promoted.
pub async fn confirm_sent_logs(payment_id: &str, conn: &mut SqliteConnection) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE dispense_logs SET status = $1, updated_at = CURRENT_TIMESTAMP WHERE payment_id = $2 AND status = $3",
    )
    .bind(DispenseStatus::Confirmed)
    .bind(payment_id)
    .bind(DispenseStatus::Sent)
    .execute(conn)
    .await?;
    Ok(result.rows_affected())
}
