//! Shared fixtures for the integration tests: an in-memory storage backend and a scripted gateway connector
//! that drives the dispatcher state machine without a network.

use std::{
    collections::{HashMap, VecDeque},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
        Mutex,
    },
    time::Duration,
};

use chrono::Utc;
use dispense_engine::{
    db_types::{
        DispenseLog,
        DispenseLogUpdate,
        DispenseStatus,
        Machine,
        MachineRef,
        MachineSlot,
        NewCardToken,
        NewDispenseLog,
        OperationState,
        Payment,
        PaymentStatus,
    },
    traits::{DispenseLedger, MachineRegistry, PaymentStore, StorageError},
    transport::{GatewayConnection, GatewayConnector, GatewayEvent, TransportError},
};

//--------------------------------------   In-memory backend  ---------------------------------------------------------

#[derive(Default)]
pub struct MemoryState {
    pub payments: HashMap<String, Payment>,
    pub machines: Vec<Machine>,
    pub slots: Vec<MachineSlot>,
    pub logs: Vec<DispenseLog>,
    next_log_id: i64,
    /// (payment_id, product_uid) → dispensed quantity.
    pub quantities: HashMap<(String, String), i64>,
    /// (payment_id, machine_uid, part_number).
    pub parts: Vec<(String, String, String)>,
    pub card_tokens: Vec<NewCardToken>,
    /// (source, body).
    pub webhook_events: Vec<(String, String)>,
}

/// An in-memory implementation of the three storage traits, good enough to exercise the full dispense and webhook
/// flows.
#[derive(Clone, Default)]
pub struct MemoryBackend {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with<R>(&self, f: impl FnOnce(&mut MemoryState) -> R) -> R {
        let mut state = self.state.lock().unwrap();
        f(&mut state)
    }

    pub fn add_payment(&self, payment: Payment) {
        self.with(|s| {
            s.payments.insert(payment.id.clone(), payment);
        });
    }

    pub fn add_machine(&self, machine: Machine, slots: &[(&str, Option<&str>)]) {
        self.with(|s| {
            for (slot, product) in slots {
                s.slots.push(MachineSlot {
                    machine_uid: machine.uid.clone(),
                    slot_number: (*slot).to_string(),
                    product_uid: product.map(String::from),
                });
            }
            s.machines.push(machine);
        });
    }

    pub fn logs(&self) -> Vec<DispenseLog> {
        self.with(|s| s.logs.clone())
    }

    pub fn quantity(&self, payment_id: &str, product_uid: &str) -> i64 {
        self.with(|s| s.quantities.get(&(payment_id.to_string(), product_uid.to_string())).copied().unwrap_or(0))
    }
}

impl PaymentStore for MemoryBackend {
    async fn fetch_payment(&self, payment_id: &str) -> Result<Option<Payment>, StorageError> {
        Ok(self.with(|s| s.payments.get(payment_id).cloned()))
    }

    async fn fetch_payment_by_charge_id(&self, charge_id: &str) -> Result<Option<Payment>, StorageError> {
        Ok(self.with(|s| s.payments.values().find(|p| p.charge_id.as_deref() == Some(charge_id)).cloned()))
    }

    async fn update_payment_status(&self, payment_id: &str, status: PaymentStatus) -> Result<(), StorageError> {
        self.with(|s| {
            if let Some(p) = s.payments.get_mut(payment_id) {
                p.status = status;
                p.updated_at = Utc::now();
            }
        });
        Ok(())
    }

    async fn increment_dispensed_quantity(
        &self,
        payment_id: &str,
        product_uid: &str,
        quantity: i64,
    ) -> Result<(), StorageError> {
        self.with(|s| {
            *s.quantities.entry((payment_id.to_string(), product_uid.to_string())).or_insert(0) += quantity;
        });
        Ok(())
    }

    async fn record_dispensed_parts(
        &self,
        payment_id: &str,
        machine_uid: &str,
        part_numbers: &[String],
    ) -> Result<(), StorageError> {
        self.with(|s| {
            for part in part_numbers {
                s.parts.push((payment_id.to_string(), machine_uid.to_string(), part.clone()));
            }
        });
        Ok(())
    }

    async fn save_card_token(&self, token: NewCardToken) -> Result<(), StorageError> {
        self.with(|s| s.card_tokens.push(token));
        Ok(())
    }
}

impl MachineRegistry for MemoryBackend {
    async fn fetch_machine(&self, machine: &MachineRef) -> Result<Option<Machine>, StorageError> {
        Ok(self.with(|s| s.machines.iter().find(|m| m.is_same_ref(machine)).cloned()))
    }

    async fn fetch_slots(&self, machine_uid: &str) -> Result<Vec<MachineSlot>, StorageError> {
        Ok(self.with(|s| s.slots.iter().filter(|slot| slot.machine_uid == machine_uid).cloned().collect()))
    }
}

impl DispenseLedger for MemoryBackend {
    async fn create_dispense_log(&self, log: NewDispenseLog) -> Result<DispenseLog, StorageError> {
        Ok(self.with(|s| {
            s.next_log_id += 1;
            let now = Utc::now();
            let log = DispenseLog {
                id: s.next_log_id,
                payment_id: log.payment_id,
                machine_id: log.machine_id,
                slot_number: log.slot_number,
                product_id: log.product_id,
                status: DispenseStatus::Pending,
                error_message: None,
                gateway_response: None,
                attempt_count: 1,
                created_at: now,
                updated_at: now,
            };
            s.logs.push(log.clone());
            log
        }))
    }

    async fn update_dispense_log(&self, log_id: i64, update: DispenseLogUpdate) -> Result<(), StorageError> {
        self.with(|s| {
            let Some(log) = s.logs.iter_mut().find(|l| l.id == log_id) else {
                return Err(StorageError::NotFound(format!("Dispense log #{log_id}")));
            };
            if let Some(status) = update.status {
                log.status = status;
            }
            if let Some(message) = update.error_message {
                log.error_message = Some(message);
            }
            if let Some(response) = update.gateway_response {
                log.gateway_response = Some(response);
            }
            if let Some(count) = update.attempt_count {
                log.attempt_count = count;
            }
            log.updated_at = Utc::now();
            Ok(())
        })
    }

    async fn dispense_logs_for_payment(&self, payment_id: &str) -> Result<Vec<DispenseLog>, StorageError> {
        Ok(self.with(|s| {
            let mut logs: Vec<_> = s.logs.iter().filter(|l| l.payment_id == payment_id).cloned().collect();
            logs.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
            logs
        }))
    }

    async fn confirm_sent_logs(&self, payment_id: &str) -> Result<u64, StorageError> {
        Ok(self.with(|s| {
            let mut promoted = 0;
            for log in s.logs.iter_mut().filter(|l| l.payment_id == payment_id && l.status == DispenseStatus::Sent) {
                log.status = DispenseStatus::Confirmed;
                log.updated_at = Utc::now();
                promoted += 1;
            }
            promoted
        }))
    }

    async fn record_webhook_event(&self, source: &str, body: &str) -> Result<i64, StorageError> {
        Ok(self.with(|s| {
            s.webhook_events.push((source.to_string(), body.to_string()));
            s.webhook_events.len() as i64
        }))
    }
}

//--------------------------------------   Scripted gateway   ---------------------------------------------------------

/// What the connector should do with one `connect` call.
pub enum ConnectScript {
    /// Yield a connection with the given behaviour.
    Accept(ConnectionScript),
    /// Refuse the connection outright.
    Refuse(String),
    /// Never complete the connect future, so the connect timeout fires.
    Unresponsive,
}

/// The scripted behaviour of one accepted connection.
#[derive(Default)]
pub struct ConnectionScript {
    /// Error to return from `send`, if any.
    pub send_error: Option<TransportError>,
    /// Events delivered after the send, each after the given delay. When the script runs out, `next_event` pends
    /// forever and the settle timer decides the attempt.
    pub events: Vec<(Duration, GatewayEvent)>,
}

impl ConnectionScript {
    /// A connection that accepts the send and then stays quiet.
    pub fn quiet() -> Self {
        Self::default()
    }

    pub fn replying_after(delay: Duration, msg: &str) -> Self {
        Self { send_error: None, events: vec![(delay, GatewayEvent::Message(msg.to_string()))] }
    }

    pub fn closing_after(delay: Duration, code: u16) -> Self {
        Self { send_error: None, events: vec![(delay, GatewayEvent::Closed { code, reason: String::new() })] }
    }

    pub fn rejecting_send(err: TransportError) -> Self {
        Self { send_error: Some(err), events: Vec::new() }
    }
}

/// A scripted stand-in for the WebSocket connector. Scripts are consumed in order; once they run out, every
/// further connect yields a quiet connection.
#[derive(Clone, Default)]
pub struct FakeConnector {
    scripts: Arc<Mutex<VecDeque<ConnectScript>>>,
    connects: Arc<AtomicUsize>,
    sent: Arc<Mutex<Vec<String>>>,
}

impl FakeConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn scripted(scripts: Vec<ConnectScript>) -> Self {
        Self { scripts: Arc::new(Mutex::new(scripts.into())), ..Self::default() }
    }

    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// Every frame sent over any connection, in send order.
    pub fn sent_frames(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }
}

impl GatewayConnector for FakeConnector {
    type Connection = FakeConnection;

    async fn connect(&self, _url: &str) -> Result<FakeConnection, TransportError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let script = self.scripts.lock().unwrap().pop_front();
        match script {
            Some(ConnectScript::Accept(spec)) => {
                Ok(FakeConnection { send_error: spec.send_error, events: spec.events.into(), sent: self.sent.clone() })
            },
            None => Ok(FakeConnection { send_error: None, events: VecDeque::new(), sent: self.sent.clone() }),
            Some(ConnectScript::Refuse(reason)) => Err(TransportError::ConnectFailed(reason)),
            Some(ConnectScript::Unresponsive) => std::future::pending().await,
        }
    }
}

pub struct FakeConnection {
    send_error: Option<TransportError>,
    events: VecDeque<(Duration, GatewayEvent)>,
    sent: Arc<Mutex<Vec<String>>>,
}

impl GatewayConnection for FakeConnection {
    async fn send(&mut self, frame: &str) -> Result<(), TransportError> {
        if let Some(err) = self.send_error.take() {
            return Err(err);
        }
        self.sent.lock().unwrap().push(frame.to_string());
        Ok(())
    }

    async fn next_event(&mut self) -> GatewayEvent {
        match self.events.pop_front() {
            Some((delay, event)) => {
                tokio::time::sleep(delay).await;
                event
            },
            None => std::future::pending().await,
        }
    }

    async fn close(&mut self) {}
}

//--------------------------------------      Fixtures        ---------------------------------------------------------

pub const MACHINE_UID: &str = "3f8a2b9c-1d4e-4f6a-8b2c-5e7d9a1f3c60";
pub const MACHINE_TAG: &str = "VND-LOBBY-01";

pub fn online_machine() -> Machine {
    Machine {
        uid: MACHINE_UID.to_string(),
        machine_tag: MACHINE_TAG.to_string(),
        operation_state: OperationState::Online,
        location_address: Some("12 Main Street".to_string()),
    }
}

pub fn paid_payment(id: &str, user_id: &str) -> Payment {
    let now = Utc::now();
    Payment {
        id: id.to_string(),
        user_id: user_id.to_string(),
        status: PaymentStatus::Paid,
        machine_uid: MACHINE_UID.to_string(),
        charge_id: Some(format!("ch_{id}")),
        created_at: now,
        updated_at: now,
    }
}
