use serde::{Deserialize, Serialize};

/// A machine row as served by the remote catalog.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteMachine {
    pub uid: String,
    pub machine_tag: String,
    pub operation_state: String,
    #[serde(default)]
    pub location_address: Option<String>,
}

/// A slot row as served by the remote catalog.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteSlot {
    pub machine_uid: String,
    pub slot_number: String,
    #[serde(default)]
    pub product_uid: Option<String>,
}

/// A product row as served by the remote catalog.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteProduct {
    pub uid: String,
    pub name: String,
    #[serde(default)]
    pub vendor_part_number: Option<String>,
}

/// The outcome of one catalog sync run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncReport {
    /// Machines fetched from the remote catalog.
    pub machines: usize,
    /// Slot rows fetched.
    pub slots: usize,
    /// Products fetched.
    pub products: usize,
    /// Upserts that went through.
    pub succeeded: usize,
    /// Upserts that failed and were skipped.
    pub failed: usize,
}

impl SyncReport {
    /// True if some, but not all, records made it into the local store.
    pub fn is_partial(&self) -> bool {
        self.failed > 0 && self.succeeded > 0
    }
}
