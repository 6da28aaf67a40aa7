//! Discovery service binary.
//!
//! Binds the port given by `PORT` (default 8000) and serves the registry
//! until killed.

use anyhow::Result;
use mesh_discovery::DiscoveryService;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let port: u16 = match std::env::var("PORT") {
        Ok(value) => value.parse()?,
        Err(_) => 8000,
    };
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;

    DiscoveryService::new().run(listener).await?;
    Ok(())
}
