use infrabridge_adaptor::bus::{InMemoryBus, MessageBus, MqttBus};
use infrabridge_adaptor::config::AdaptorConfig;
use infrabridge_adaptor::Adaptor;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

const DEFAULT_LOG_FILTER: &str = "infrabridge_adaptor=info,infrabridge_wrappers=info,info";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = AdaptorConfig::from_env()?;
    info!(name = %config.plugin_name, version = %config.plugin_version, "Starting infrastructure adaptor");

    let bus: Arc<dyn MessageBus> = match &config.bus_url {
        Some(url) => {
            let client_id = format!("{}-{}", config.plugin_name, uuid::Uuid::new_v4());
            Arc::new(MqttBus::new(url, &client_id)?)
        }
        None => {
            warn!("INFRABRIDGE_BUS_URL is not set, running on the in-memory bus");
            Arc::new(InMemoryBus::new())
        }
    };

    let adaptor = Adaptor::new(&config, bus)?;
    adaptor.start().await?;
    info!(state = %adaptor.state(), "Adaptor initialized successfully");

    tokio::signal::ctrl_c().await?;
    info!("Shutdown requested");

    if let Err(error) = adaptor.stop().await {
        warn!(error = %error, "Adaptor did not stop cleanly");
    }
    Ok(())
}
