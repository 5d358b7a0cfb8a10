//! Storage contracts for the dispense engine.
//!
//! The engine never talks to a database directly. Backends (currently SQLite, see [`crate::SqliteDatabase`])
//! implement these traits; everything above them is written against the traits so that the guard, dispatcher and
//! webhook reconciler can be exercised with mocks.

mod dispense_ledger;
mod machine_registry;
mod payment_store;

use thiserror::Error;

pub use dispense_ledger::DispenseLedger;
pub use machine_registry::MachineRegistry;
pub use payment_store::PaymentStore;

#[derive(Debug, Clone, Error)]
pub enum StorageError {
    #[error("Internal database error: {0}")]
    DatabaseError(String),
    #[error("The requested record was not found. {0}")]
    NotFound(String),
}

impl From<sqlx::Error> for StorageError {
    fn from(e: sqlx::Error) -> Self {
        StorageError::DatabaseError(e.to_string())
    }
}
