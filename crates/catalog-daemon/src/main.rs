use anyhow::Result;

use catalog_daemon::{server, telemetry};

#[tokio::main]
async fn main() -> Result<()> {
    telemetry::init();
    server::run().await
}
