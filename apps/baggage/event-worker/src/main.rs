//! Event Worker - Entry Point
//!
//! Background worker that drains the priority queues and dispatches events.

#[tokio::main]
async fn main() -> eyre::Result<()> {
    baggage_event_worker::run().await
}
