//! The single-slot and batch dispense dispatchers.
//!
//! A unit dispatch drives one connection through an explicit state machine:
//!
//! ```text
//! Created → Connecting → Connected → CommandSent → Settled
//! ```
//!
//! The gateway protocol is fire-and-forget: it is not guaranteed to acknowledge a command, so a quiet period after
//! a successful send is the expected success path, not a failure. Two timers structure the attempt: the connect
//! timeout bounds connection establishment, and the settle timeout bounds the quiet period after the send. They
//! must not be collapsed into a single deadline.

use log::*;
use serde::Serialize;
use serde_json::json;

use crate::{
    config::GatewayConfig,
    db_types::{
        BatchDispenseReceipt,
        DispenseLogUpdate,
        DispenseReceipt,
        Machine,
        NewDispenseLog,
        SlotRequest,
        UnitDispenseResult,
    },
    dispense::{
        guard::{authorize_dispense, DispensePlan},
        DispenseError,
        MachineLocks,
    },
    traits::{DispenseLedger, MachineRegistry, PaymentStore},
    transport::{GatewayConnection, GatewayConnector, GatewayEvent, TransportError},
    DispenseRequest,
};

/// The phases a unit dispatch moves through. Transitions are strictly forward; `Settled` is reached exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AttemptPhase {
    Created,
    Connecting,
    Connected,
    CommandSent,
    Settled,
}

/// The response handed back to the API layer: a single receipt or a batch aggregate.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum DispenseOutcome {
    Single(DispenseReceipt),
    Batch(BatchDispenseReceipt),
}

/// `DispenseApi` is the primary API for dispatching dispense commands against the machine-control gateway.
///
/// It owns the per-machine locks, the gateway connector and the timing configuration; storage access goes through
/// the backend `B`.
pub struct DispenseApi<B, C> {
    db: B,
    connector: C,
    config: GatewayConfig,
    locks: MachineLocks,
}

impl<B, C> std::fmt::Debug for DispenseApi<B, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "DispenseApi")
    }
}

impl<B, C> DispenseApi<B, C>
where
    B: PaymentStore + MachineRegistry + DispenseLedger,
    C: GatewayConnector,
{
    pub fn new(db: B, connector: C, config: GatewayConfig) -> Self {
        Self { db, connector, config, locks: MachineLocks::new() }
    }

    /// The full inbound flow: authorize the request, then dispatch it as a single or batch dispense.
    pub async fn process_dispense_request(&self, req: &DispenseRequest) -> Result<DispenseOutcome, DispenseError> {
        let authorized = authorize_dispense(&self.db, req).await?;
        match &authorized.plan {
            DispensePlan::Single { slot_number } => {
                let receipt = self.dispense_one(&authorized.machine, slot_number, &authorized.payment.id).await?;
                Ok(DispenseOutcome::Single(receipt))
            },
            DispensePlan::Batch { slots } => {
                let receipt = self.dispense_batch(&authorized.machine, slots, &authorized.payment.id).await?;
                Ok(DispenseOutcome::Batch(receipt))
            },
        }
    }

    /// Dispatches a single dispense command, holding the machine's lock for the duration of the attempt.
    pub async fn dispense_one(
        &self,
        machine: &Machine,
        slot_number: &str,
        payment_id: &str,
    ) -> Result<DispenseReceipt, DispenseError> {
        let _machine_lock = self.locks.acquire(&machine.uid).await;
        self.dispense_unit(machine, slot_number, payment_id).await
    }

    /// Dispatches the given slots sequentially, `quantity` commands per slot in list order, holding the machine's
    /// lock for the entire batch. A fixed delay separates consecutive commands (not after the last) to give the
    /// machine time to mechanically settle. One unit failing does not abort the remaining units.
    pub async fn dispense_batch(
        &self,
        machine: &Machine,
        slots: &[SlotRequest],
        payment_id: &str,
    ) -> Result<BatchDispenseReceipt, DispenseError> {
        if slots.is_empty() {
            return Err(DispenseError::InvalidRequest("At least one slot is required".to_string()));
        }
        let _machine_lock = self.locks.acquire(&machine.uid).await;
        let total: usize = slots.iter().map(|s| s.quantity as usize).sum();
        info!("🚚️ Starting batch dispense of {total} unit(s) across {} slot(s) on machine {}", slots.len(), machine.uid);
        let mut results = Vec::with_capacity(total);
        for slot in slots {
            for iteration in 1..=slot.quantity {
                debug!(
                    "🚚️ Dispensing from slot {} on machine {} ({iteration}/{})",
                    slot.slot_number, machine.uid, slot.quantity
                );
                match self.dispense_unit(machine, &slot.slot_number, payment_id).await {
                    Ok(_) => {
                        results.push(UnitDispenseResult { slot_number: slot.slot_number.clone(), success: true, error: None })
                    },
                    Err(e) => {
                        error!("🚚️ Dispense from slot {} on machine {} failed. {e}", slot.slot_number, machine.uid);
                        results.push(UnitDispenseResult {
                            slot_number: slot.slot_number.clone(),
                            success: false,
                            error: Some(e.to_string()),
                        });
                    },
                }
                if results.len() < total {
                    tokio::time::sleep(self.config.dispense_delay).await;
                }
            }
        }
        let successful = results.iter().filter(|r| r.success).count();
        let failed = results.len() - successful;
        info!(
            "🚚️ Batch dispense on machine {} complete. {successful} succeeded, {failed} failed of {}",
            machine.uid,
            results.len()
        );
        if successful == 0 {
            return Err(DispenseError::AllDispensesFailed { total: results.len() });
        }
        Ok(BatchDispenseReceipt {
            acknowledged: true,
            command_sent: true,
            total: results.len(),
            successful,
            failed,
            partial_success: failed > 0,
            results,
        })
    }

    /// One request/response cycle against the gateway for exactly one (machine, slot) pair. Callers must hold the
    /// machine's lock.
    async fn dispense_unit(
        &self,
        machine: &Machine,
        slot_number: &str,
        payment_id: &str,
    ) -> Result<DispenseReceipt, DispenseError> {
        let url = self
            .config
            .gateway_url
            .as_deref()
            .ok_or_else(|| DispenseError::NotConfigured("VND_GATEWAY_URL is not set".to_string()))?;

        let mut phase = AttemptPhase::Created;
        // Resolve the product mapped to this slot up front, so the log row carries it and settlement can update
        // the payment's dispensed quantity without a second lookup. Best-effort.
        let product_id = self.product_for_slot(&machine.uid, slot_number).await;

        // The log row is created before the transport is touched, so a crash mid-flight still leaves an auditable
        // `pending` row. Failing to write the audit trail must not block the dispense itself.
        let log_id = match self
            .db
            .create_dispense_log(NewDispenseLog {
                payment_id: payment_id.to_string(),
                machine_id: machine.uid.clone(),
                slot_number: slot_number.to_string(),
                product_id: product_id.clone(),
            })
            .await
        {
            Ok(log) => {
                debug!("🗃️ Dispense log #{} created for payment {payment_id} (machine {}, slot {slot_number})", log.id, machine.uid);
                Some(log.id)
            },
            Err(e) => {
                error!("🗃️ Failed to create dispense log for payment {payment_id}. Continuing without audit row. {e}");
                None
            },
        };
        let settlement = Settlement {
            db: &self.db,
            log_id,
            payment_id,
            machine_uid: &machine.uid,
            slot_number,
            product_id,
        };

        let frame = json!({ "type": "dispense", "machineId": machine.uid, "slotNumber": slot_number }).to_string();
        info!("🚚️ Dispatching dispense command to machine {} slot {slot_number} for payment {payment_id}", machine.uid);

        self.advance(&mut phase, AttemptPhase::Connecting, payment_id, slot_number);
        let mut attempt = 0u32;
        let mut conn = loop {
            attempt += 1;
            if let Some(id) = log_id {
                if let Err(e) = self.db.update_dispense_log(id, DispenseLogUpdate::attempts(i64::from(attempt))).await {
                    warn!("🗃️ Failed to update attempt count on dispense log #{id}. {e}");
                }
            }
            match tokio::time::timeout(self.config.connect_timeout, self.connector.connect(url)).await {
                Ok(Ok(conn)) => break conn,
                Ok(Err(e)) => {
                    error!("🚚️ Could not open a gateway connection for machine {}. {e}", machine.uid);
                    return settlement.fail(DispenseError::GatewayUnreachable(e.to_string())).await;
                },
                Err(_) if attempt < self.config.connect_attempts => {
                    warn!(
                        "🚚️ Gateway connection timed out (attempt {attempt}/{}). Retrying.",
                        self.config.connect_attempts
                    );
                },
                Err(_) => {
                    error!("🚚️ Gateway connection timed out for machine {} slot {slot_number}", machine.uid);
                    return settlement.fail(DispenseError::ConnectTimeout).await;
                },
            }
        };

        self.advance(&mut phase, AttemptPhase::Connected, payment_id, slot_number);
        if let Err(e) = conn.send(&frame).await {
            conn.close().await;
            let err = match e {
                TransportError::ClosedBeforeSend(code) => DispenseError::ClosedBeforeSend(code),
                e => DispenseError::SendFailed(e.to_string()),
            };
            return settlement.fail(err).await;
        }
        self.advance(&mut phase, AttemptPhase::CommandSent, payment_id, slot_number);

        let settle = tokio::time::sleep(self.config.settle_timeout);
        tokio::pin!(settle);
        let receipt = loop {
            tokio::select! {
                _ = &mut settle => {
                    debug!("🚚️ No gateway response within the settle window; send is considered successful (fire-and-forget)");
                    break DispenseReceipt { acknowledged: true, command_sent: true, response: None };
                },
                event = conn.next_event() => match event {
                    GatewayEvent::Message(msg) => {
                        info!("🚚️ Gateway acknowledged dispense on machine {} slot {slot_number}: {msg}", machine.uid);
                        break DispenseReceipt { acknowledged: true, command_sent: true, response: Some(msg) };
                    },
                    GatewayEvent::Closed { code, .. } => {
                        debug!("🚚️ Gateway closed the connection (code {code}) after the command was sent");
                        break DispenseReceipt { acknowledged: true, command_sent: true, response: None };
                    },
                    GatewayEvent::Error(e) => {
                        // The command may already be in flight at the gateway; an error now changes nothing.
                        warn!("🚚️ Gateway error after the command was sent (ignoring). {e}");
                    },
                },
            }
        };
        conn.close().await;
        self.advance(&mut phase, AttemptPhase::Settled, payment_id, slot_number);
        settlement.succeed(receipt).await
    }

    async fn product_for_slot(&self, machine_uid: &str, slot_number: &str) -> Option<String> {
        match self.db.fetch_slots(machine_uid).await {
            Ok(slots) => slots.iter().find(|s| s.slot_number == slot_number).and_then(|s| s.product_uid.clone()),
            Err(e) => {
                error!("🗃️ Failed to resolve product for machine {machine_uid} slot {slot_number}. {e}");
                None
            },
        }
    }

    fn advance(&self, phase: &mut AttemptPhase, next: AttemptPhase, payment_id: &str, slot_number: &str) {
        trace!("🚚️ [{payment_id}/{slot_number}] {phase:?} → {next:?}");
        *phase = next;
    }
}

/// The single settlement path for a unit dispatch. Consuming `self` makes settlement one-shot at the type level;
/// the later of {timer, message, error, close} can never settle the same attempt twice.
struct Settlement<'a, B> {
    db: &'a B,
    log_id: Option<i64>,
    payment_id: &'a str,
    machine_uid: &'a str,
    slot_number: &'a str,
    product_id: Option<String>,
}

impl<B> Settlement<'_, B>
where B: PaymentStore + MachineRegistry + DispenseLedger
{
    /// Marks the log `failed` with the error message, then surfaces the error to the caller.
    async fn fail(self, err: DispenseError) -> Result<DispenseReceipt, DispenseError> {
        if let Some(id) = self.log_id {
            if let Err(e) = self.db.update_dispense_log(id, DispenseLogUpdate::failed(err.to_string())).await {
                warn!("🗃️ Failed to mark dispense log #{id} as failed. {e}");
            }
        }
        Err(err)
    }

    /// Marks the log `sent` with the captured receipt, then applies the success side effects. The side effects are
    /// best-effort: the dispense result promised to the caller is already decided and must not be failed by them.
    async fn succeed(self, receipt: DispenseReceipt) -> Result<DispenseReceipt, DispenseError> {
        if let Some(id) = self.log_id {
            if let Err(e) = self.db.update_dispense_log(id, DispenseLogUpdate::sent(&receipt)).await {
                warn!("🗃️ Failed to mark dispense log #{id} as sent. {e}");
            }
        }
        match &self.product_id {
            Some(product) => {
                if let Err(e) = self.db.increment_dispensed_quantity(self.payment_id, product, 1).await {
                    error!(
                        "🗃️ Failed to update dispensed quantity for payment {} product {product}. {e}",
                        self.payment_id
                    );
                } else {
                    debug!("🗃️ Dispensed quantity updated for payment {} product {product}", self.payment_id);
                }
            },
            None => {
                debug!(
                    "🗃️ No product mapped to machine {} slot {}; skipping quantity update",
                    self.machine_uid, self.slot_number
                );
            },
        }
        Ok(receipt)
    }
}
