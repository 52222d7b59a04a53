//! Delivery Worker - Entry Point
//!
//! Runs the background job pool and the email queue poller.

#[tokio::main]
async fn main() -> eyre::Result<()> {
    relay_delivery_worker::run().await
}
