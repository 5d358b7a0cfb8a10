mod helpers;
mod retry;
mod secret;

pub use helpers::parse_boolean_flag;
pub use retry::{RetryError, RetryPolicy};
pub use secret::Secret;
