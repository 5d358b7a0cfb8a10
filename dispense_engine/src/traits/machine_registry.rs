use crate::{
    db_types::{Machine, MachineRef, MachineSlot},
    traits::StorageError,
};

/// Read access to the machine catalog.
#[allow(async_fn_in_trait)]
pub trait MachineRegistry: Clone {
    /// Resolves a machine reference in either identifier space (surrogate uid or human-readable tag).
    async fn fetch_machine(&self, machine: &MachineRef) -> Result<Option<Machine>, StorageError>;

    /// The configured slots for a machine, including the product mapped to each slot.
    async fn fetch_slots(&self, machine_uid: &str) -> Result<Vec<MachineSlot>, StorageError>;
}
