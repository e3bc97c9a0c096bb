//! BAGgage API - Entry Point
//!
//! HTTP ingest surface that validates events and queues them by priority.

#[tokio::main]
async fn main() -> eyre::Result<()> {
    baggage_api::run().await
}
