use sqlx::SqliteConnection;

use crate::db_types::{Machine, MachineRef, MachineSlot};

/// Resolves a machine reference in either identifier space. The uid match wins if a tag ever collides with
/// another machine's uid.
pub async fn fetch_machine(machine: &MachineRef, conn: &mut SqliteConnection) -> Result<Option<Machine>, sqlx::Error> {
    let machine = sqlx::query_as(
        r#"
            SELECT uid, machine_tag, operation_state, location_address
            FROM machines
            WHERE uid = $1 OR machine_tag = $1
            ORDER BY uid = $1 DESC
            LIMIT 1
        "#,
    )
    .bind(machine.as_str())
    .fetch_optional(conn)
    .await?;
    Ok(machine)
}

pub async fn fetch_slots(machine_uid: &str, conn: &mut SqliteConnection) -> Result<Vec<MachineSlot>, sqlx::Error> {
    let slots = sqlx::query_as(
        "SELECT machine_uid, slot_number, product_uid FROM machine_slots WHERE machine_uid = $1 ORDER BY slot_number",
    )
    .bind(machine_uid)
    .fetch_all(conn)
    .await?;
    Ok(slots)
}
