use sqlx::SqliteConnection;

/// Stores a raw inbound webhook body for audit. The body is stored verbatim, parseable or not.
pub async fn insert_webhook_event(source: &str, body: &str, conn: &mut SqliteConnection) -> Result<i64, sqlx::Error> {
    // `fetch_all` drives the statement to completion so the implicit transaction commits before this returns;
    // `fetch_one` would drop the statement after the first row, leaving the insert invisible to other connections.
    let rows: Vec<(i64,)> = sqlx::query_as("INSERT INTO webhook_events (source, body) VALUES ($1, $2) RETURNING id")
        .bind(source)
        .bind(body)
        .fetch_all(conn)
        .await?;
    let (id,) = rows.into_iter().next().ok_or(sqlx::Error::RowNotFound)?;
    Ok(id)
}
