use thiserror::Error;

#[derive(Debug, Error)]
pub enum CatalogApiError {
    #[error("Could not initialize client: {0}")]
    Initialization(String),
    #[error("Invalid REST response: {0}")]
    RestResponseError(String),
    #[error("Could not deserialize JSON: {0}")]
    JsonError(String),
    #[error("Query failed. Error {status}. {message}")]
    QueryError { status: u16, message: String },
    #[error("Fetching {path} failed after {attempts} attempt(s). {last}")]
    ExhaustedRetries { path: String, attempts: u32, last: String },
    #[error("Could not store {0}")]
    StoreError(String),
}
