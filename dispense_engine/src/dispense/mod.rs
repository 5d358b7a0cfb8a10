//! The dispense command subsystem: authorization guard, single-slot dispatcher, batch dispatcher and the
//! per-machine locks that serialize commands against a single physical dispense mechanism.

mod dispatcher;
mod errors;
mod guard;
mod machine_locks;

pub use dispatcher::{DispenseApi, DispenseOutcome};
pub use errors::DispenseError;
pub use guard::{authorize_dispense, AuthorizedDispense, DispensePlan};
pub use machine_locks::MachineLocks;
