use anyhow::Result;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

mod backend;
mod config;
mod dispatch;
mod health;
mod proxy;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("kestrel=debug,info")),
        )
        .init();

    info!("Starting Kestrel load balancer");

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config.toml".to_string());
    info!("Loading config from {}", config_path);

    let config = config::Config::from_file(&config_path)?;
    info!("Loaded config with {} backends", config.backends.len());

    let forward_timeout = config.dispatch.forward_timeout();
    let backends = config
        .backends
        .iter()
        .map(|b| -> Result<backend::Backend> {
            let url = b.uri()?;
            info!("Configured backend {}", url);
            Ok(backend::Backend::new(url, forward_timeout))
        })
        .collect::<Result<Vec<_>>>()?;

    let server_pool = Arc::new(backend::ServerPool::new(backends));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let health_checker = health::HealthChecker::new(server_pool.clone(), &config.health_check);
    let health_task = tokio::spawn(async move {
        health_checker.run(shutdown_rx).await;
    });
    info!(
        "Health checker started, every {}s",
        config.health_check.check_interval_seconds
    );

    let dispatcher = Arc::new(dispatch::Dispatcher::new(server_pool, &config.dispatch));
    let proxy = proxy::Proxy::new(config.server.listen_addr, dispatcher);
    proxy.run(shutdown_signal()).await?;

    let _ = shutdown_tx.send(true);
    if let Err(e) = health_task.await {
        error!("Health checker task failed: {}", e);
    }

    info!("Kestrel stopped.");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for ctrl-c: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
