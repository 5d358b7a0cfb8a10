use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::{
    db_types::{OperationState, PaymentStatus},
    traits::StorageError,
};

/// Everything that can go wrong between receiving a dispense request and settling it.
///
/// Every client-facing variant carries enough context for the caller to self-correct without contacting support:
/// the current payment status plus the allowed set, both machine identifiers on a mismatch, the full list of
/// invalid slots. [`DispenseError::status_code`] gives the HTTP mapping consumed by the API layer.
#[derive(Debug, Error)]
pub enum DispenseError {
    #[error("Invalid dispense request. {0}")]
    InvalidRequest(String),
    #[error("Payment {0} not found")]
    PaymentNotFound(String),
    #[error("This payment belongs to another user")]
    NotYourPayment,
    #[error("Payment status {status} does not allow dispensing. Allowed statuses: {}", fmt_statuses(.allowed))]
    PaymentNotDispensable { status: PaymentStatus, allowed: Vec<PaymentStatus> },
    #[error("This payment was already dispensed at {dispensed_at}")]
    AlreadyDispensed { dispensed_at: DateTime<Utc> },
    #[error("The requested machine ({requested}) does not match the machine this payment was made at ({payment_machine})")]
    MachineMismatch { payment_machine: String, requested: String },
    #[error("Machine {0} not found")]
    MachineNotFound(String),
    #[error("Machine {machine} is not available for dispensing (state: {state})")]
    MachineOffline { machine: String, state: OperationState },
    #[error("Invalid slot number(s) for this machine: {}", .0.join(", "))]
    InvalidSlots(Vec<String>),
    #[error("The dispense subsystem is not configured. {0}")]
    NotConfigured(String),
    #[error("Failed to connect to the dispense gateway. {0}")]
    GatewayUnreachable(String),
    #[error("Timed out connecting to the dispense gateway")]
    ConnectTimeout,
    #[error("Failed to send the dispense command. {0}")]
    SendFailed(String),
    #[error("Connection closed before the command was sent (close code {0})")]
    ClosedBeforeSend(u16),
    #[error("All {total} dispense command(s) in the batch failed")]
    AllDispensesFailed { total: usize },
    #[error("Storage error during dispense. {0}")]
    StorageError(#[from] StorageError),
}

impl DispenseError {
    /// The HTTP status code the API layer should respond with for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::InvalidRequest(_) => 400,
            Self::PaymentNotFound(_) => 404,
            Self::NotYourPayment => 403,
            Self::PaymentNotDispensable { .. } => 400,
            Self::AlreadyDispensed { .. } => 409,
            Self::MachineMismatch { .. } => 400,
            Self::MachineNotFound(_) => 404,
            Self::MachineOffline { .. } => 503,
            Self::InvalidSlots(_) => 400,
            Self::NotConfigured(_) => 500,
            Self::GatewayUnreachable(_) => 502,
            Self::ConnectTimeout => 504,
            Self::SendFailed(_) => 502,
            Self::ClosedBeforeSend(_) => 502,
            Self::AllDispensesFailed { .. } => 502,
            Self::StorageError(_) => 500,
        }
    }

    /// True for failures the caller may safely retry as-is (transient transport conditions).
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::MachineOffline { .. } |
                Self::GatewayUnreachable(_) |
                Self::ConnectTimeout |
                Self::SendFailed(_) |
                Self::ClosedBeforeSend(_) |
                Self::AllDispensesFailed { .. }
        )
    }
}

fn fmt_statuses(statuses: &[PaymentStatus]) -> String {
    statuses.iter().map(|s| s.to_string()).collect::<Vec<_>>().join(", ")
}
