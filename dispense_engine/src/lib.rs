//! Vendit Dispense Engine
//!
//! The dispense engine is the part of the Vendit backend that turns a completed payment into a physical product
//! leaving a vending machine. This library contains the core logic and is transport- and storage-agnostic at its
//! seams:
//! 1. Storage access goes through the traits in [`mod@traits`] ([`traits::PaymentStore`],
//!    [`traits::MachineRegistry`] and [`traits::DispenseLedger`]). SQLite is the supported backend; you should
//!    never need to touch the database directly. The data types it serves are defined in [`mod@db_types`] and are
//!    public.
//! 2. The machine gateway is reached through the [`mod@transport`] traits. The production implementation speaks
//!    WebSocket; tests substitute scripted connections.
//!
//! The public API surface is [`DispenseApi`] for the synchronous dispatch path and [`WebhookApi`] for the
//! asynchronous reconciliation path.
pub mod config;
pub mod db_types;
pub mod dispense;
pub mod traits;
pub mod transport;
pub mod webhook;

#[cfg(feature = "sqlite")]
pub mod sqlite;

#[cfg(any(feature = "test_utils", test))]
pub mod test_utils;

pub use config::GatewayConfig;
pub use db_types::{BatchDispenseReceipt, DispenseReceipt, DispenseRequest, SlotRequest, UnitDispenseResult};
pub use dispense::{DispenseApi, DispenseError, DispenseOutcome, MachineLocks};
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteDatabase;
pub use webhook::{WebhookApi, WebhookDisposition};
