use crate::{
    db_types::{NewCardToken, Payment, PaymentStatus},
    traits::StorageError,
};

/// Read/write access to payment records and their per-product dispense accounting.
#[allow(async_fn_in_trait)]
pub trait PaymentStore: Clone {
    async fn fetch_payment(&self, payment_id: &str) -> Result<Option<Payment>, StorageError>;

    /// Looks a payment up by the payment-provider charge id, as delivered in charge webhooks.
    async fn fetch_payment_by_charge_id(&self, charge_id: &str) -> Result<Option<Payment>, StorageError>;

    /// Sets the payment status. The caller is responsible for only applying genuine changes; writing the same
    /// status twice is harmless but pointless.
    async fn update_payment_status(&self, payment_id: &str, status: PaymentStatus) -> Result<(), StorageError>;

    /// Adds `quantity` to the dispensed count for the given product on the given payment. Must be an atomic
    /// single-row operation; the engine relies on this for its shared-resource story and does no locking of its own
    /// around it.
    async fn increment_dispensed_quantity(
        &self,
        payment_id: &str,
        product_uid: &str,
        quantity: i64,
    ) -> Result<(), StorageError>;

    /// Records vendor-confirmed dispensed part numbers against a payment (vendor webhook path).
    async fn record_dispensed_parts(
        &self,
        payment_id: &str,
        machine_uid: &str,
        part_numbers: &[String],
    ) -> Result<(), StorageError>;

    /// Persists a reusable card token captured from a charge webhook.
    async fn save_card_token(&self, token: NewCardToken) -> Result<(), StorageError>;
}
