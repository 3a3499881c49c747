use anyhow::Result;
use coding_agents_core::{config::Config, server, telemetry};
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;

    let metrics = telemetry::init(&config.telemetry)?;

    info!("Starting Coding Agents Core Service");
    info!("HTTP server listening on {}", config.http_addr());

    server::run(config, metrics).await
}
