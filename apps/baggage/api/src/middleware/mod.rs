pub mod auth;
pub mod metrics;
pub mod request_id;

pub use auth::{ApiKeys, require_api_key};
pub use metrics::{metrics_middleware, record_validation_error};
pub use request_id::{REQUEST_ID_HEADER, RequestId, request_id};
