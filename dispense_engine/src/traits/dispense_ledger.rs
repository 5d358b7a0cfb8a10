use crate::{
    db_types::{DispenseLog, DispenseLogUpdate, NewDispenseLog},
    traits::StorageError,
};

/// Append/update access to the dispense log.
///
/// The write contract is part of the engine's correctness story: exactly one log row is created per dispatched
/// (machine, slot) unit *before* the transport is touched, so that a crash mid-flight still leaves an auditable
/// `pending` row, and the rows are the sole idempotency gate for "already dispensed".
#[allow(async_fn_in_trait)]
pub trait DispenseLedger: Clone {
    /// Creates a new log row with `pending` status and returns it.
    async fn create_dispense_log(&self, log: NewDispenseLog) -> Result<DispenseLog, StorageError>;

    /// Applies a partial update to a log row. `updated_at` is refreshed on every call.
    async fn update_dispense_log(&self, log_id: i64, update: DispenseLogUpdate) -> Result<(), StorageError>;

    /// All log rows for a payment, newest first.
    async fn dispense_logs_for_payment(&self, payment_id: &str) -> Result<Vec<DispenseLog>, StorageError>;

    /// Promotes all `sent` logs for a payment to `confirmed` (vendor webhook path). Returns the number of rows
    /// promoted.
    async fn confirm_sent_logs(&self, payment_id: &str) -> Result<u64, StorageError>;

    /// Stores a raw inbound webhook body for audit, regardless of whether it can be parsed.
    async fn record_webhook_event(&self, source: &str, body: &str) -> Result<i64, StorageError>;
}
