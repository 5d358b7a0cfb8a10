//! Data types shared between the dispense engine and its storage backends.
//!
//! The types here mirror the persisted state surface the engine consumes: payments, machines and their slot
//! configuration, and the dispense log, which doubles as the audit trail and the idempotency gate for dispensing.

use std::{fmt::Display, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, Type};
use thiserror::Error;

//--------------------------------------   DispenseStatus    ----------------------------------------------------------

/// The lifecycle of one dispense attempt.
///
/// The synchronous dispatch path only ever moves a log forward: `Pending → Sent` or `Pending → Failed`.
/// `Confirmed` is reached exclusively through the vendor webhook path, when the machine vendor reports that the
/// product physically left the machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Type, Serialize, Deserialize)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum DispenseStatus {
    Pending,
    Sent,
    Confirmed,
    Failed,
}

impl DispenseStatus {
    /// Whether a log in this status means the payment has already been dispensed. `Sent` counts: a command has
    /// already left for the gateway, and re-sending it would dispense the product twice.
    pub fn counts_as_dispensed(&self) -> bool {
        matches!(self, DispenseStatus::Sent | DispenseStatus::Confirmed)
    }
}

impl Display for DispenseStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DispenseStatus::Pending => write!(f, "pending"),
            DispenseStatus::Sent => write!(f, "sent"),
            DispenseStatus::Confirmed => write!(f, "confirmed"),
            DispenseStatus::Failed => write!(f, "failed"),
        }
    }
}

#[derive(Debug, Clone, Error)]
#[error("Invalid conversion from string: {0}")]
pub struct ConversionError(String);

impl FromStr for DispenseStatus {
    type Err = ConversionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pending" => Ok(DispenseStatus::Pending),
            "sent" => Ok(DispenseStatus::Sent),
            "confirmed" => Ok(DispenseStatus::Confirmed),
            "failed" => Ok(DispenseStatus::Failed),
            s => Err(ConversionError(format!("Invalid dispense status: {s}"))),
        }
    }
}

//--------------------------------------   PaymentStatus     ----------------------------------------------------------

/// Payment statuses as recorded by the payment providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Type, Serialize, Deserialize)]
#[sqlx(rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum PaymentStatus {
    /// Generic successful card payment.
    Paid,
    /// Card payment successfully captured.
    Captured,
    /// Card payment authorized but not yet captured.
    Authorized,
    /// Wallet purchase. Money was deducted from the user's wallet.
    Debit,
    /// Wallet top-up. Money was added to the wallet; top-ups never trigger a dispense.
    Credit,
    /// Payment initiated but not completed.
    Pending,
    Failed,
    Refunded,
}

/// The statuses that represent a completed payment for which products may be dispensed.
pub const DISPENSABLE_STATUSES: [PaymentStatus; 3] =
    [PaymentStatus::Paid, PaymentStatus::Captured, PaymentStatus::Debit];

impl PaymentStatus {
    pub fn is_dispensable(&self) -> bool {
        DISPENSABLE_STATUSES.contains(self)
    }
}

impl Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            PaymentStatus::Paid => "PAID",
            PaymentStatus::Captured => "CAPTURED",
            PaymentStatus::Authorized => "AUTHORIZED",
            PaymentStatus::Debit => "DEBIT",
            PaymentStatus::Credit => "CREDIT",
            PaymentStatus::Pending => "PENDING",
            PaymentStatus::Failed => "FAILED",
            PaymentStatus::Refunded => "REFUNDED",
        };
        write!(f, "{s}")
    }
}

impl FromStr for PaymentStatus {
    type Err = ConversionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "PAID" => Ok(PaymentStatus::Paid),
            "CAPTURED" => Ok(PaymentStatus::Captured),
            "AUTHORIZED" => Ok(PaymentStatus::Authorized),
            "DEBIT" => Ok(PaymentStatus::Debit),
            "CREDIT" => Ok(PaymentStatus::Credit),
            "PENDING" => Ok(PaymentStatus::Pending),
            "FAILED" => Ok(PaymentStatus::Failed),
            "REFUNDED" => Ok(PaymentStatus::Refunded),
            s => Err(ConversionError(format!("Invalid payment status: {s}"))),
        }
    }
}

//--------------------------------------      Payment        ----------------------------------------------------------

/// The slice of the payment record the dispense engine consumes.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Payment {
    pub id: String,
    pub user_id: String,
    pub status: PaymentStatus,
    /// The machine the payment was made at, as recorded at payment time.
    pub machine_uid: String,
    /// The payment-provider charge id, if the payment went through a card provider.
    pub charge_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

//--------------------------------------     MachineRef      ----------------------------------------------------------

/// A reference to a machine as supplied by a client.
///
/// Machines live in two identifier spaces: the surrogate uid assigned by the catalog, and the human-readable tag
/// printed on the machine itself. Clients may use either. Whether two references denote the same machine can only
/// be decided by resolving them through the machine registry, which is why this is a distinct value type rather
/// than a bare string compared with `==`.
#[derive(Debug, Clone, PartialEq, Eq, Type, Serialize, Deserialize)]
#[sqlx(transparent)]
pub struct MachineRef(String);

impl MachineRef {
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl Display for MachineRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl<S: Into<String>> From<S> for MachineRef {
    fn from(value: S) -> Self {
        Self(value.into())
    }
}

//--------------------------------------   OperationState    ----------------------------------------------------------

/// The operational state of a machine as reported by the catalog. Only `Online` machines may dispense.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Type, Serialize, Deserialize)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum OperationState {
    Online,
    Offline,
    Maintenance,
}

impl Display for OperationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OperationState::Online => write!(f, "online"),
            OperationState::Offline => write!(f, "offline"),
            OperationState::Maintenance => write!(f, "maintenance"),
        }
    }
}

impl FromStr for OperationState {
    type Err = ConversionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "online" => Ok(OperationState::Online),
            "offline" => Ok(OperationState::Offline),
            "maintenance" => Ok(OperationState::Maintenance),
            s => Err(ConversionError(format!("Invalid machine operation state: {s}"))),
        }
    }
}

//--------------------------------------      Machine        ----------------------------------------------------------

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Machine {
    pub uid: String,
    pub machine_tag: String,
    pub operation_state: OperationState,
    pub location_address: Option<String>,
}

impl Machine {
    pub fn is_online(&self) -> bool {
        self.operation_state == OperationState::Online
    }

    /// True if the given reference denotes this machine, in either identifier space.
    pub fn is_same_ref(&self, r: &MachineRef) -> bool {
        self.uid == r.as_str() || self.machine_tag == r.as_str()
    }
}

/// One addressable product compartment on a machine.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct MachineSlot {
    pub machine_uid: String,
    pub slot_number: String,
    pub product_uid: Option<String>,
}

//--------------------------------------    DispenseLog      ----------------------------------------------------------

/// The audit/idempotency record of one dispense attempt. Created `pending` before the transport is touched,
/// mutated exactly once at settlement, and never deleted.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct DispenseLog {
    pub id: i64,
    pub payment_id: String,
    pub machine_id: String,
    pub slot_number: String,
    pub product_id: Option<String>,
    pub status: DispenseStatus,
    /// Set only when `status` is `failed`.
    pub error_message: Option<String>,
    /// Opaque payload captured from the transport on success, stored as JSON text for audit.
    pub gateway_response: Option<String>,
    pub attempt_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewDispenseLog {
    pub payment_id: String,
    pub machine_id: String,
    pub slot_number: String,
    pub product_id: Option<String>,
}

/// A partial update applied to a dispense log at settlement. Only the populated fields are written.
#[derive(Debug, Clone, Default)]
pub struct DispenseLogUpdate {
    pub status: Option<DispenseStatus>,
    pub error_message: Option<String>,
    pub gateway_response: Option<String>,
    pub attempt_count: Option<i64>,
}

impl DispenseLogUpdate {
    pub fn sent(receipt: &DispenseReceipt) -> Self {
        let response = serde_json::to_string(receipt).ok();
        Self { status: Some(DispenseStatus::Sent), gateway_response: response, ..Default::default() }
    }

    pub fn failed<S: Into<String>>(message: S) -> Self {
        Self { status: Some(DispenseStatus::Failed), error_message: Some(message.into()), ..Default::default() }
    }

    pub fn attempts(count: i64) -> Self {
        Self { attempt_count: Some(count), ..Default::default() }
    }
}

//--------------------------------------  Dispense requests  ----------------------------------------------------------

/// One slot entry in a batch dispense request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlotRequest {
    pub slot_number: String,
    #[serde(default = "default_quantity")]
    pub quantity: u32,
}

fn default_quantity() -> u32 {
    1
}

/// An inbound dispense request, as handed over by the API layer after authentication. Either `slot_number` (single
/// dispense) or `slots` (batch) must be present, never both.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispenseRequest {
    pub user_id: String,
    pub payment_id: String,
    pub machine_id: MachineRef,
    #[serde(default)]
    pub slot_number: Option<String>,
    #[serde(default)]
    pub slots: Vec<SlotRequest>,
}

//--------------------------------------  Dispense receipts  ----------------------------------------------------------

/// The result of one successful unit dispatch. `acknowledged` is true even when the gateway never replied: the
/// protocol is fire-and-forget, and a quiet period after a successful send is the expected success path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispenseReceipt {
    pub acknowledged: bool,
    pub command_sent: bool,
    /// The raw gateway response, if it did send one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnitDispenseResult {
    pub slot_number: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Aggregate result of a batch dispense. A batch with at least one successful unit is a success; per-unit failures
/// are reported in `results` and `partial_success` is raised.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchDispenseReceipt {
    pub acknowledged: bool,
    pub command_sent: bool,
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    pub partial_success: bool,
    pub results: Vec<UnitDispenseResult>,
}

//--------------------------------------    Card tokens      ----------------------------------------------------------

/// A reusable card token extracted from a charge webhook when the payer opted to save their card.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewCardToken {
    pub user_id: String,
    pub provider_customer_id: String,
    pub token_id: String,
    pub last_four: Option<String>,
    pub brand: Option<String>,
}
