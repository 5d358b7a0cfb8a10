use std::{sync::Arc, time::Duration};

use log::*;
use reqwest::{
    header::{HeaderMap, HeaderValue},
    Client,
    Method,
};
use serde::de::DeserializeOwned;
use vendit_common::RetryPolicy;

use crate::{
    config::CatalogConfig,
    data_objects::{RemoteMachine, RemoteProduct, RemoteSlot},
    sync::CatalogSource,
    CatalogApiError,
};

const FETCH_ATTEMPTS: u32 = 5;
const FETCH_BACKOFF_BASE: Duration = Duration::from_secs(2);
/// Log a progress line every this many pages of a resource.
const PROGRESS_LOG_EVERY: usize = 10;
/// Pause briefly after every this many pages, to stay under the catalog service's rate limit.
const RATE_LIMIT_EVERY: usize = 5;
const RATE_LIMIT_PAUSE: Duration = Duration::from_millis(500);

#[derive(Clone)]
pub struct CatalogApi {
    config: CatalogConfig,
    client: Arc<Client>,
}

impl CatalogApi {
    pub fn new(config: CatalogConfig) -> Result<Self, CatalogApiError> {
        let mut headers = HeaderMap::with_capacity(2);
        let val = HeaderValue::from_str(config.api_key.reveal().as_str())
            .map_err(|e| CatalogApiError::Initialization(e.to_string()))?;
        headers.insert("apikey", val);
        headers.insert("Content-Type", HeaderValue::from_static("application/json"));
        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| CatalogApiError::Initialization(e.to_string()))?;
        Ok(Self { config, client: Arc::new(client) })
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{path}", self.config.base_url)
    }

    async fn fetch_page<T: DeserializeOwned>(&self, path: &str, offset: usize) -> Result<Vec<T>, CatalogApiError> {
        let url = self.url(path);
        trace!("🛒️ Fetching {url} at offset {offset}");
        let limit = self.config.page_size.to_string();
        let offset = offset.to_string();
        let params = [("select", "*"), ("limit", limit.as_str()), ("offset", offset.as_str())];
        let response = self
            .client
            .request(Method::GET, url)
            .query(&params)
            .send()
            .await
            .map_err(|e| CatalogApiError::RestResponseError(e.to_string()))?;
        if response.status().is_success() {
            response.json::<Vec<T>>().await.map_err(|e| CatalogApiError::JsonError(e.to_string()))
        } else {
            let status = response.status().as_u16();
            let message = response.text().await.map_err(|e| CatalogApiError::RestResponseError(e.to_string()))?;
            Err(CatalogApiError::QueryError { status, message })
        }
    }

    /// Fetches every row of a resource, page by page. Each page is retried with exponential backoff before the
    /// whole fetch is abandoned. A page shorter than the configured page size marks the end of the resource.
    pub async fn fetch_all<T: DeserializeOwned>(&self, path: &str) -> Result<Vec<T>, CatalogApiError> {
        let policy = RetryPolicy::new(FETCH_ATTEMPTS, FETCH_BACKOFF_BASE);
        let mut rows = Vec::new();
        let mut page = 0usize;
        loop {
            let offset = page * self.config.page_size;
            let batch = policy
                .retry("catalog page fetch", |_| self.fetch_page::<T>(path, offset))
                .await
                .map_err(|e| CatalogApiError::ExhaustedRetries {
                    path: path.to_string(),
                    attempts: e.attempts,
                    last: e.last.to_string(),
                })?;
            let full_page = batch.len() >= self.config.page_size;
            rows.extend(batch);
            page += 1;
            if page % PROGRESS_LOG_EVERY == 0 {
                info!("🛒️ {path}: {page} pages fetched, {} rows so far", rows.len());
            }
            if !full_page {
                break;
            }
            if page % RATE_LIMIT_EVERY == 0 {
                trace!("🛒️ {path}: pausing briefly after {page} pages");
                tokio::time::sleep(RATE_LIMIT_PAUSE).await;
            }
        }
        debug!("🛒️ {path}: fetched {} rows in {page} page(s)", rows.len());
        Ok(rows)
    }
}

impl CatalogSource for CatalogApi {
    async fn fetch_machines(&self) -> Result<Vec<RemoteMachine>, CatalogApiError> {
        self.fetch_all("/machines").await
    }

    async fn fetch_slots(&self) -> Result<Vec<RemoteSlot>, CatalogApiError> {
        self.fetch_all("/machine_slots").await
    }

    async fn fetch_products(&self) -> Result<Vec<RemoteProduct>, CatalogApiError> {
        self.fetch_all("/products").await
    }
}
