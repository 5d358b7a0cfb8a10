//! `SqliteDatabase` is a concrete implementation of a dispense engine backend.
//!
//! Unsurprisingly, it uses SQLite as the backend and implements all the traits defined in the [`crate::traits`]
//! module.
use std::fmt::Debug;

use sqlx::SqlitePool;

use super::db::{self, dispense_logs, machines, payments, webhook_events};
use crate::{
    db_types::{
        DispenseLog,
        DispenseLogUpdate,
        Machine,
        MachineRef,
        MachineSlot,
        NewCardToken,
        NewDispenseLog,
        Payment,
        PaymentStatus,
    },
    traits::{DispenseLedger, MachineRegistry, PaymentStore, StorageError},
};

#[derive(Clone)]
pub struct SqliteDatabase {
    url: String,
    pool: SqlitePool,
}

impl Debug for SqliteDatabase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "SqliteDatabase ({:?})", self.pool)
    }
}

impl SqliteDatabase {
    /// Connects to the database given by the `VND_DATABASE_URL` environment variable, or the default URL.
    pub async fn new(max_connections: u32) -> Result<Self, sqlx::Error> {
        let url = db::db_url();
        Self::new_with_url(&url, max_connections).await
    }

    pub async fn new_with_url(url: &str, max_connections: u32) -> Result<Self, sqlx::Error> {
        let pool = db::new_pool(url, max_connections).await?;
        Ok(Self { url: url.to_string(), pool })
    }

    pub fn url(&self) -> &str {
        self.url.as_str()
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

impl PaymentStore for SqliteDatabase {
    async fn fetch_payment(&self, payment_id: &str) -> Result<Option<Payment>, StorageError> {
        let mut conn = self.pool.acquire().await?;
        let payment = payments::fetch_payment(payment_id, &mut conn).await?;
        Ok(payment)
    }

    async fn fetch_payment_by_charge_id(&self, charge_id: &str) -> Result<Option<Payment>, StorageError> {
        let mut conn = self.pool.acquire().await?;
        let payment = payments::fetch_payment_by_charge_id(charge_id, &mut conn).await?;
        Ok(payment)
    }

    async fn update_payment_status(&self, payment_id: &str, status: PaymentStatus) -> Result<(), StorageError> {
        let mut conn = self.pool.acquire().await?;
        payments::update_payment_status(payment_id, status, &mut conn).await?;
        Ok(())
    }

    async fn increment_dispensed_quantity(
        &self,
        payment_id: &str,
        product_uid: &str,
        quantity: i64,
    ) -> Result<(), StorageError> {
        let mut conn = self.pool.acquire().await?;
        payments::increment_dispensed_quantity(payment_id, product_uid, quantity, &mut conn).await?;
        Ok(())
    }

    async fn record_dispensed_parts(
        &self,
        payment_id: &str,
        machine_uid: &str,
        part_numbers: &[String],
    ) -> Result<(), StorageError> {
        let mut tx = self.pool.begin().await?;
        payments::record_dispensed_parts(payment_id, machine_uid, part_numbers, &mut tx).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn save_card_token(&self, token: NewCardToken) -> Result<(), StorageError> {
        let mut conn = self.pool.acquire().await?;
        payments::save_card_token(token, &mut conn).await?;
        Ok(())
    }
}

impl MachineRegistry for SqliteDatabase {
    async fn fetch_machine(&self, machine: &MachineRef) -> Result<Option<Machine>, StorageError> {
        let mut conn = self.pool.acquire().await?;
        let machine = machines::fetch_machine(machine, &mut conn).await?;
        Ok(machine)
    }

    async fn fetch_slots(&self, machine_uid: &str) -> Result<Vec<MachineSlot>, StorageError> {
        let mut conn = self.pool.acquire().await?;
        let slots = machines::fetch_slots(machine_uid, &mut conn).await?;
        Ok(slots)
    }
}

impl DispenseLedger for SqliteDatabase {
    async fn create_dispense_log(&self, log: NewDispenseLog) -> Result<DispenseLog, StorageError> {
        let mut conn = self.pool.acquire().await?;
        let log = dispense_logs::insert_dispense_log(log, &mut conn).await?;
        Ok(log)
    }

    async fn update_dispense_log(&self, log_id: i64, update: DispenseLogUpdate) -> Result<(), StorageError> {
        let mut conn = self.pool.acquire().await?;
        dispense_logs::update_dispense_log(log_id, update, &mut conn).await?;
        Ok(())
    }

    async fn dispense_logs_for_payment(&self, payment_id: &str) -> Result<Vec<DispenseLog>, StorageError> {
        let mut conn = self.pool.acquire().await?;
        let logs = dispense_logs::fetch_logs_for_payment(payment_id, &mut conn).await?;
        Ok(logs)
    }

    async fn confirm_sent_logs(&self, payment_id: &str) -> Result<u64, StorageError> {
        let mut conn = self.pool.acquire().await?;
        let promoted = dispense_logs::confirm_sent_logs(payment_id, &mut conn).await?;
        Ok(promoted)
    }

    async fn record_webhook_event(&self, source: &str, body: &str) -> Result<i64, StorageError> {
        let mut conn = self.pool.acquire().await?;
        let id = webhook_events::insert_webhook_event(source, body, &mut conn).await?;
        Ok(id)
    }
}
