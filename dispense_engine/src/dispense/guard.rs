//! The dispense authorization guard.
//!
//! Decides, before the transport is touched, whether a dispense request may proceed. Pure validation; the checks
//! run in a fixed order and each failure maps to a distinct client-facing error. Authorization failures never
//! open a gateway connection.

use log::*;

use crate::{
    db_types::{Machine, MachineRef, Payment, SlotRequest, DISPENSABLE_STATUSES},
    dispense::DispenseError,
    traits::{DispenseLedger, MachineRegistry, PaymentStore},
    DispenseRequest,
};

/// Request-shape limits, matching the public API contract.
const MAX_SLOT_ENTRIES: usize = 20;
const MAX_QUANTITY_PER_SLOT: u32 = 10;
const MAX_TOTAL_UNITS: u32 = 50;

/// A request that has passed every authorization check and may be dispatched.
#[derive(Debug, Clone)]
pub struct AuthorizedDispense {
    pub payment: Payment,
    pub machine: Machine,
    pub plan: DispensePlan,
}

#[derive(Debug, Clone)]
pub enum DispensePlan {
    Single { slot_number: String },
    Batch { slots: Vec<SlotRequest> },
}

/// Validates the request against the payment, the dispense ledger and the machine registry.
///
/// Check order: request shape, payment existence, ownership, payment status, the already-dispensed idempotency
/// gate, machine identity match, machine existence and online state, and (for batches) slot validity.
pub async fn authorize_dispense<B>(db: &B, req: &DispenseRequest) -> Result<AuthorizedDispense, DispenseError>
where B: PaymentStore + MachineRegistry + DispenseLedger {
    let plan = validate_shape(req)?;

    let payment = db
        .fetch_payment(&req.payment_id)
        .await?
        .ok_or_else(|| DispenseError::PaymentNotFound(req.payment_id.clone()))?;

    if payment.user_id != req.user_id {
        debug!("🔐️ User {} tried to dispense payment {} owned by {}", req.user_id, payment.id, payment.user_id);
        return Err(DispenseError::NotYourPayment);
    }

    if !payment.status.is_dispensable() {
        return Err(DispenseError::PaymentNotDispensable {
            status: payment.status,
            allowed: DISPENSABLE_STATUSES.to_vec(),
        });
    }

    // Idempotency gate: any prior log in `sent` or `confirmed` means a command already left for the gateway.
    let logs = db.dispense_logs_for_payment(&payment.id).await?;
    if let Some(dispensed_at) = logs.iter().filter(|l| l.status.counts_as_dispensed()).map(|l| l.created_at).min() {
        info!("🔐️ Payment {} was already dispensed at {dispensed_at}. Rejecting repeat request.", payment.id);
        return Err(DispenseError::AlreadyDispensed { dispensed_at });
    }

    let machine = check_machine_identity(db, &payment, &req.machine_id).await?;

    if !machine.is_online() {
        return Err(DispenseError::MachineOffline {
            machine: machine.uid.clone(),
            state: machine.operation_state,
        });
    }

    if let DispensePlan::Batch { slots } = &plan {
        let configured = db.fetch_slots(&machine.uid).await?;
        let invalid = slots
            .iter()
            .filter(|s| !configured.iter().any(|c| c.slot_number == s.slot_number))
            .map(|s| s.slot_number.clone())
            .collect::<Vec<_>>();
        if !invalid.is_empty() {
            return Err(DispenseError::InvalidSlots(invalid));
        }
    }

    debug!("🔐️ Dispense request for payment {} on machine {} authorized", payment.id, machine.uid);
    Ok(AuthorizedDispense { payment, machine, plan })
}

fn validate_shape(req: &DispenseRequest) -> Result<DispensePlan, DispenseError> {
    match (&req.slot_number, req.slots.is_empty()) {
        (Some(_), false) => {
            Err(DispenseError::InvalidRequest("Provide either a slot number or a slot list, not both".to_string()))
        },
        (Some(slot), true) => Ok(DispensePlan::Single { slot_number: slot.clone() }),
        (None, true) => {
            Err(DispenseError::InvalidRequest("Either a slot number or a non-empty slot list is required".to_string()))
        },
        (None, false) => {
            let slots = &req.slots;
            if slots.len() > MAX_SLOT_ENTRIES {
                return Err(DispenseError::InvalidRequest(format!(
                    "At most {MAX_SLOT_ENTRIES} slot entries are allowed per batch"
                )));
            }
            if let Some(bad) = slots.iter().find(|s| s.quantity == 0 || s.quantity > MAX_QUANTITY_PER_SLOT) {
                return Err(DispenseError::InvalidRequest(format!(
                    "Quantity for slot {} must be between 1 and {MAX_QUANTITY_PER_SLOT}",
                    bad.slot_number
                )));
            }
            let total: u32 = slots.iter().map(|s| s.quantity).sum();
            if total > MAX_TOTAL_UNITS {
                return Err(DispenseError::InvalidRequest(format!(
                    "Total dispense quantity exceeds the maximum of {MAX_TOTAL_UNITS} items"
                )));
            }
            Ok(DispensePlan::Batch { slots: slots.clone() })
        },
    }
}

/// The payment records the machine it was made at; the request may name the machine in either identifier space.
/// The two match if the raw strings are equal, or if both resolve to the same machine through the registry.
async fn check_machine_identity<B: MachineRegistry>(
    registry: &B,
    payment: &Payment,
    requested: &MachineRef,
) -> Result<Machine, DispenseError> {
    let mismatch = || DispenseError::MachineMismatch {
        payment_machine: payment.machine_uid.clone(),
        requested: requested.to_string(),
    };
    if payment.machine_uid == requested.as_str() {
        // Identity trivially matches; existence is the only remaining question.
        return registry
            .fetch_machine(requested)
            .await?
            .ok_or_else(|| DispenseError::MachineNotFound(requested.to_string()));
    }
    let machine = registry.fetch_machine(requested).await?.ok_or_else(mismatch)?;
    if machine.is_same_ref(&MachineRef::from(payment.machine_uid.clone())) {
        return Ok(machine);
    }
    // The payment may itself have recorded the machine under its other alias.
    match registry.fetch_machine(&MachineRef::from(payment.machine_uid.clone())).await? {
        Some(m) if m.uid == machine.uid => Ok(machine),
        _ => Err(mismatch()),
    }
}
