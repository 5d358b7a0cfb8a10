use log::debug;
use sqlx::SqliteConnection;

use crate::db_types::{NewCardToken, Payment, PaymentStatus};

pub async fn fetch_payment(payment_id: &str, conn: &mut SqliteConnection) -> Result<Option<Payment>, sqlx::Error> {
    let payment = sqlx::query_as(
        "SELECT id, user_id, status, machine_uid, charge_id, created_at, updated_at FROM payments WHERE id = $1",
    )
    .bind(payment_id)
    .fetch_optional(conn)
    .await?;
    Ok(payment)
}

pub async fn fetch_payment_by_charge_id(
    charge_id: &str,
    conn: &mut SqliteConnection,
) -> Result<Option<Payment>, sqlx::Error> {
    let payment = sqlx::query_as(
        "SELECT id, user_id, status, machine_uid, charge_id, created_at, updated_at FROM payments WHERE charge_id = \
         $1",
    )
    .bind(charge_id)
    .fetch_optional(conn)
    .await?;
    Ok(payment)
}

pub async fn update_payment_status(
    payment_id: &str,
    status: PaymentStatus,
    conn: &mut SqliteConnection,
) -> Result<(), sqlx::Error> {
    let result = sqlx::query("UPDATE payments SET status = $1, updated_at = CURRENT_TIMESTAMP WHERE id = $2")
        .bind(status)
        .bind(payment_id)
        .execute(conn)
        .await?;
    debug!("🗃️ Payment {payment_id} status set to {status} ({} row(s))", result.rows_affected());
    Ok(())
}

/// Adds `quantity` to the dispensed count for a product on a payment. A single upsert statement, so concurrent
/// dispatches for the same payment never lose an increment.
pub async fn increment_dispensed_quantity(
    payment_id: &str,
    product_uid: &str,
    quantity: i64,
    conn: &mut SqliteConnection,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
            INSERT INTO payment_products (payment_id, product_uid, dispensed_quantity)
            VALUES ($1, $2, $3)
            ON CONFLICT (payment_id, product_uid) DO UPDATE
            SET dispensed_quantity = dispensed_quantity + excluded.dispensed_quantity,
                updated_at = CURRENT_TIMESTAMP
        "#,
    )
    .bind(payment_id)
    .bind(product_uid)
    .bind(quantity)
    .execute(conn)
    .await?;
    Ok(())
}

/// Records vendor-confirmed part numbers against a payment. Re-deliveries of the same part are absorbed by the
/// unique index rather than rejected.
pub async fn record_dispensed_parts(
    payment_id: &str,
    machine_uid: &str,
    part_numbers: &[String],
    conn: &mut SqliteConnection,
) -> Result<(), sqlx::Error> {
    for part in part_numbers {
        sqlx::query(
            r#"
                INSERT INTO dispensed_parts (payment_id, machine_uid, part_number)
                VALUES ($1, $2, $3)
                ON CONFLICT (payment_id, part_number) DO NOTHING
            "#,
        )
        .bind(payment_id)
        .bind(machine_uid)
        .bind(part)
        .execute(&mut *conn)
        .await?;
    }
    debug!("🗃️ Recorded {} dispensed part(s) for payment {payment_id}", part_numbers.len());
    Ok(())
}

pub async fn save_card_token(token: NewCardToken, conn: &mut SqliteConnection) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
            INSERT INTO card_tokens (user_id, provider_customer_id, token_id, last_four, brand)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (user_id, token_id) DO UPDATE
            SET provider_customer_id = excluded.provider_customer_id,
                last_four = excluded.last_four,
                brand = excluded.brand,
                updated_at = CURRENT_TIMESTAMP
        "#,
    )
    .bind(token.user_id)
    .bind(token.provider_customer_id)
    .bind(token.token_id)
    .bind(token.last_four)
    .bind(token.brand)
    .execute(conn)
    .await?;
    Ok(())
}
