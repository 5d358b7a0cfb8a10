use log::*;
use vendit_common::{parse_boolean_flag, Secret};

#[derive(Debug, Clone)]
pub struct CatalogConfig {
    /// Base REST URL of the catalog service, without a trailing slash.
    pub base_url: String,
    pub api_key: Secret<String>,
    /// Rows requested per page. The service caps responses, so the last page of a resource is recognised by
    /// being shorter than this.
    pub page_size: usize,
    /// When set, a row that fails to store aborts the sync run instead of being skipped.
    pub strict: bool,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000/rest/v1".to_string(),
            api_key: Secret::default(),
            page_size: 1000,
            strict: false,
        }
    }
}

impl CatalogConfig {
    pub fn new_from_env_or_default() -> Self {
        let base_url = std::env::var("VND_CATALOG_URL").unwrap_or_else(|_| {
            warn!("VND_CATALOG_URL not set, using (probably useless) default");
            CatalogConfig::default().base_url
        });
        let api_key = Secret::new(std::env::var("VND_CATALOG_API_KEY").unwrap_or_else(|_| {
            warn!("VND_CATALOG_API_KEY not set, using (probably useless) default");
            String::new()
        }));
        let page_size = std::env::var("VND_CATALOG_PAGE_SIZE")
            .ok()
            .and_then(|s| s.parse::<usize>().map_err(|e| warn!("Invalid VND_CATALOG_PAGE_SIZE ({s}). {e}")).ok())
            .filter(|n| *n > 0)
            .unwrap_or_else(|| CatalogConfig::default().page_size);
        let strict = parse_boolean_flag(std::env::var("VND_CATALOG_STRICT").ok(), false);
        Self { base_url, api_key, page_size, strict }
    }
}
