//! Per-type event handlers and the dispatcher the consumer drives
//!
//! The dispatcher matches exhaustively on [`Event`], so a new event type does not
//! compile until it has a handler.

use crate::models::{
    Event, LicenseCreateEvent, LogEvent, LogLevel, UpdateIdentitiesEvent,
};
use async_trait::async_trait;
use event_queue::{EventProcessor, HandlerError};
use tracing::{debug, error, info, warn};

/// One method per event type
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EventHandlers: Send + Sync {
    async fn handle_log(&self, event: &LogEvent) -> Result<(), HandlerError>;

    async fn handle_license_create(&self, event: &LicenseCreateEvent) -> Result<(), HandlerError>;

    /// Called once per message, however many identities it carries
    async fn handle_update_identities(
        &self,
        event: &UpdateIdentitiesEvent,
    ) -> Result<(), HandlerError>;
}

/// Handlers that record each event in the log
#[derive(Debug, Clone, Default)]
pub struct TracingHandlers;

#[async_trait]
impl EventHandlers for TracingHandlers {
    async fn handle_log(&self, event: &LogEvent) -> Result<(), HandlerError> {
        let payload = &event.payload;
        let source = event.metadata.source.as_str();
        let error_code = payload.error_code.as_deref().unwrap_or("-");

        match payload.level {
            LogLevel::Error => error!(source, error_code, "{}", payload.message),
            LogLevel::Warn => warn!(source, error_code, "{}", payload.message),
            LogLevel::Info => info!(source, error_code, "{}", payload.message),
            LogLevel::Debug => debug!(source, error_code, "{}", payload.message),
        }
        if let Some(stack_trace) = &payload.stack_trace {
            debug!(source, "Stack trace: {stack_trace}");
        }
        Ok(())
    }

    async fn handle_license_create(&self, event: &LicenseCreateEvent) -> Result<(), HandlerError> {
        let payload = &event.payload;
        info!(
            event_id = %event.metadata.event_id,
            license_type = %payload.license_type,
            customer_id = %payload.customer_id,
            products = %payload.product_codes.join(", "),
            features = %payload.feature_codes.join(", "),
            expires = %payload.expiration_date,
            "Creating license"
        );
        Ok(())
    }

    async fn handle_update_identities(
        &self,
        event: &UpdateIdentitiesEvent,
    ) -> Result<(), HandlerError> {
        let payload = &event.payload;
        info!(
            event_id = %event.metadata.event_id,
            key_id = %payload.key_id,
            identities = payload.identities.len(),
            "Updating license identities"
        );
        for (index, identity) in payload.identities.iter().enumerate() {
            debug!(
                key_id = %payload.key_id,
                index,
                issued_to = %identity.issued_to,
                allow_remote = identity.allow_remote,
                max_machines = identity.max_number_of_auto_registered_machines,
                "Identity"
            );
        }
        Ok(())
    }
}

/// Routes each decoded event to exactly one handler
pub struct EventDispatcher<H> {
    handlers: H,
}

impl<H: EventHandlers> EventDispatcher<H> {
    pub fn new(handlers: H) -> Self {
        Self { handlers }
    }

    pub fn handlers(&self) -> &H {
        &self.handlers
    }
}

#[async_trait]
impl<H: EventHandlers> EventProcessor<Event> for EventDispatcher<H> {
    async fn process(&self, event: &Event) -> Result<(), HandlerError> {
        match event {
            Event::Log(e) => self.handlers.handle_log(e).await,
            Event::LicenseCreate(e) => self.handlers.handle_license_create(e).await,
            Event::UpdateIdentities(e) => self.handlers.handle_update_identities(e).await,
        }
    }

    fn name(&self) -> &'static str {
        "event-dispatcher"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures;
    use crate::validation::validate_payload;

    fn event(value: serde_json::Value) -> Event {
        validate_payload(&value).unwrap()
    }

    #[tokio::test]
    async fn test_identities_dispatched_once_regardless_of_count() {
        for count in [1, 5, 50] {
            let mut handlers = MockEventHandlers::new();
            handlers
                .expect_handle_update_identities()
                .withf(move |e| e.payload.identities.len() == count)
                .times(1)
                .returning(|_| Ok(()));
            handlers.expect_handle_log().times(0);
            handlers.expect_handle_license_create().times(0);

            let dispatcher = EventDispatcher::new(handlers);
            dispatcher
                .process(&event(fixtures::update_identities_json(count)))
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn test_each_type_reaches_its_handler() {
        let mut handlers = MockEventHandlers::new();
        handlers
            .expect_handle_log()
            .withf(|e| e.payload.error_code.as_deref() == Some("LIC_503"))
            .times(1)
            .returning(|_| Ok(()));
        handlers
            .expect_handle_license_create()
            .withf(|e| e.payload.customer_id == "CUST-1001")
            .times(1)
            .returning(|_| Ok(()));
        handlers.expect_handle_update_identities().times(0);

        let dispatcher = EventDispatcher::new(handlers);
        dispatcher.process(&event(fixtures::log_event_json())).await.unwrap();
        dispatcher
            .process(&event(fixtures::license_create_json()))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_handler_failure_propagates() {
        let mut handlers = MockEventHandlers::new();
        handlers
            .expect_handle_license_create()
            .returning(|_| Err(HandlerError::new("license", "licensing backend rejected")));

        let dispatcher = EventDispatcher::new(handlers);
        let err = dispatcher
            .process(&event(fixtures::license_create_json()))
            .await
            .unwrap_err();

        assert_eq!(err.handler, "license");
        assert_eq!(dispatcher.name(), "event-dispatcher");
    }

    #[tokio::test]
    async fn test_tracing_handlers_accept_all_types() {
        let dispatcher = EventDispatcher::new(TracingHandlers);
        for value in [
            fixtures::log_event_json(),
            fixtures::license_create_json(),
            fixtures::update_identities_json(2),
        ] {
            dispatcher.process(&event(value)).await.unwrap();
        }
    }
}
