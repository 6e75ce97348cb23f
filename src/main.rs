use std::sync::Arc;

use anyhow::{Context as _, Result};
use log::{debug, info};
use tokio::signal;

use hata::{
    config::{self, ClientConfig},
    feature::health_check::HealthCheckService,
    registry::ClientRegistry,
    Client,
};

fn main() -> Result<()> {
    config::init_logger();
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")?
        .block_on(async_main())
}

async fn async_main() -> Result<()> {
    let config = ClientConfig::from_env().context("Failed to load configuration")?;
    debug!("Gateway url : {}", config.gateway_url);

    let client = Arc::new(Client::new(config).context("Failed to create Discord client")?);
    let registry = ClientRegistry::new();

    let mut runner = tokio::spawn({
        let client = Arc::clone(&client);
        let registry = registry.clone();
        async move { client.run(&registry, HealthCheckService::new()).await }
    });

    let result = tokio::select! {
        result = &mut runner => result,
        _ = signal::ctrl_c() => {
            info!("Received Ctrl-C, shutting down");
            client.shutdown();
            runner.await
        }
    };

    result
        .context("Discord client task panicked")?
        .context("Discord client stopped")?;
    Ok(())
}
