//! Client for the remote machine-catalog service, plus the periodic sync that mirrors the remote catalog
//! (machines, slot configuration, products) into the local store the dispense engine reads from.

mod api;
mod config;
mod data_objects;
mod error;
mod sync;

pub use api::CatalogApi;
pub use config::CatalogConfig;
pub use data_objects::{RemoteMachine, RemoteProduct, RemoteSlot, SyncReport};
pub use error::CatalogApiError;
pub use sync::{sync_catalog, CatalogSource, CatalogStore};
