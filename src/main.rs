use opizontas_registry::config::Config;
use opizontas_registry::server;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load()?;
    server::init_tracing(&config.logging.level);

    tracing::info!("Starting service registry...");
    server::start(config).await?;
    Ok(())
}
