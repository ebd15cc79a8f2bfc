//! Voltbridge binary entry point

use anyhow::Result;
use voltbridge::bridge::Bridge;
use voltbridge::config::Config;
use voltbridge::logging::{get_logger, init_logging};
use voltbridge::registry::MemoryRegistry;
use voltbridge::transport::{ControllerApi, EvccClient};

#[tokio::main]
async fn main() -> Result<()> {
    let config = match std::env::args().nth(1) {
        Some(path) => Config::from_file(&path)?,
        None => Config::load()?,
    };
    config.validate()?;

    init_logging(&config.logging)?;
    let logger = get_logger("main");
    logger.info(&format!(
        "Voltbridge {} starting, controller {}",
        voltbridge::VERSION,
        config.api_base_url()
    ));

    let mut client = EvccClient::new(&config)?;
    client.login().await?;

    let registry = MemoryRegistry::new();
    let mut bridge = Bridge::new(config, client, registry);

    // The command channel stays open for the process lifetime; a hub
    // integration feeds it, the standalone binary only mirrors state.
    let (_commands_tx, commands_rx) = tokio::sync::mpsc::channel(16);

    tokio::select! {
        result = bridge.run(commands_rx) => {
            result.map_err(|e| anyhow::anyhow!("Bridge error: {}", e))?;
        }
        _ = tokio::signal::ctrl_c() => {
            logger.info("Shutdown signal received");
        }
    }

    Ok(())
}
