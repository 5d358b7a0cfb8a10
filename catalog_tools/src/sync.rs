//! The catalog sync run: pull the remote catalog, mirror it into the local store.

use std::{fmt::Display, time::Duration};

use log::*;

use crate::{
    data_objects::{RemoteMachine, RemoteProduct, RemoteSlot, SyncReport},
    CatalogApiError,
};

/// Breathing room between fetching consecutive resources from the catalog service.
const FETCH_SPACING: Duration = Duration::from_secs(1);

/// Where the catalog comes from. [`crate::CatalogApi`] is the production implementation.
#[allow(async_fn_in_trait)]
pub trait CatalogSource {
    async fn fetch_machines(&self) -> Result<Vec<RemoteMachine>, CatalogApiError>;
    async fn fetch_slots(&self) -> Result<Vec<RemoteSlot>, CatalogApiError>;
    async fn fetch_products(&self) -> Result<Vec<RemoteProduct>, CatalogApiError>;
}

/// Where the catalog goes. Upserts must be idempotent; the sync re-delivers every row on every run.
#[allow(async_fn_in_trait)]
pub trait CatalogStore {
    type Error: Display;

    async fn upsert_machine(&self, machine: &RemoteMachine) -> Result<(), Self::Error>;
    async fn upsert_slot(&self, slot: &RemoteSlot) -> Result<(), Self::Error>;
    async fn upsert_product(&self, product: &RemoteProduct) -> Result<(), Self::Error>;
}

/// Runs one full sync: machines, then slot configuration, then products.
///
/// A fetch failure aborts the run, since continuing would present a torn view of the catalog. Upserts are
/// independent of one another: a row that fails to store is logged and skipped, and the rest of the run
/// continues, so one bad record cannot starve the local store of everything else. With `strict` set
/// ([`crate::CatalogConfig::strict`], `VND_CATALOG_STRICT`), the first storage failure aborts the run instead.
pub async fn sync_catalog<S, D>(source: &S, store: &D, strict: bool) -> Result<SyncReport, CatalogApiError>
where
    S: CatalogSource,
    D: CatalogStore,
{
    info!("🛒️ Starting catalog sync");
    let machines = source.fetch_machines().await?;
    tokio::time::sleep(FETCH_SPACING).await;
    let slots = source.fetch_slots().await?;
    tokio::time::sleep(FETCH_SPACING).await;
    let products = source.fetch_products().await?;

    let mut report = SyncReport {
        machines: machines.len(),
        slots: slots.len(),
        products: products.len(),
        ..Default::default()
    };
    for machine in &machines {
        match store.upsert_machine(machine).await {
            Ok(()) => report.succeeded += 1,
            Err(e) => {
                error!("🛒️ Failed to store machine {}. {e}", machine.uid);
                if strict {
                    return Err(CatalogApiError::StoreError(format!("machine {}. {e}", machine.uid)));
                }
                report.failed += 1;
            },
        }
    }
    for slot in &slots {
        match store.upsert_slot(slot).await {
            Ok(()) => report.succeeded += 1,
            Err(e) => {
                error!("🛒️ Failed to store slot {} on machine {}. {e}", slot.slot_number, slot.machine_uid);
                if strict {
                    return Err(CatalogApiError::StoreError(format!(
                        "slot {} on machine {}. {e}",
                        slot.slot_number, slot.machine_uid
                    )));
                }
                report.failed += 1;
            },
        }
    }
    for product in &products {
        match store.upsert_product(product).await {
            Ok(()) => report.succeeded += 1,
            Err(e) => {
                error!("🛒️ Failed to store product {}. {e}", product.uid);
                if strict {
                    return Err(CatalogApiError::StoreError(format!("product {}. {e}", product.uid)));
                }
                report.failed += 1;
            },
        }
    }
    info!(
        "🛒️ Catalog sync complete. {} machines, {} slots, {} products fetched; {} stored, {} skipped",
        report.machines, report.slots, report.products, report.succeeded, report.failed
    );
    Ok(report)
}
