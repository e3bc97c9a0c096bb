//! Application state management.

use crate::middleware::ApiKeys;
use core_config::AppInfo;
use event_queue::EventPublisher;
use std::sync::Arc;

/// Shared application state.
///
/// Cloned for each handler (inexpensive Arc clones).
#[derive(Clone)]
pub struct AppState {
    pub app: AppInfo,
    /// Publisher; its connection state decides readiness
    pub publisher: Arc<EventPublisher>,
    pub api_keys: Arc<ApiKeys>,
}

impl AppState {
    pub fn new(app: AppInfo, publisher: Arc<EventPublisher>, api_keys: ApiKeys) -> Self {
        Self {
            app,
            publisher,
            api_keys: Arc::new(api_keys),
        }
    }
}
