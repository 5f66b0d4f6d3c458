use crate::backend::ServerPool;
use crate::config::HealthCheckConfig;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::time;
use tracing::{debug, info};

pub struct HealthChecker {
    backend_pool: Arc<ServerPool>,
    check_interval: Duration,
    check_timeout: Duration,
}

impl HealthChecker {
    pub fn new(backend_pool: Arc<ServerPool>, config: &HealthCheckConfig) -> Self {
        Self {
            backend_pool,
            check_interval: Duration::from_secs(config.check_interval_seconds),
            check_timeout: Duration::from_secs(config.check_timeout_seconds),
        }
    }

    /// Sweeps the pool every interval until `shutdown` flips to true or its
    /// sender goes away. The first sweep runs immediately.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut interval = time::interval(self.check_interval);
        interval.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    info!("Starting health check...");
                    self.backend_pool.health_check(self.check_timeout).await;
                    info!("Health check completed");
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Health checker stopping");
                        return;
                    }
                }
            }
        }
    }
}

/// Transport-level probe: alive if a TCP connection to `addr` opens within
/// `timeout`. The connection is dropped straight away.
pub async fn is_backend_alive(addr: &str, timeout: Duration) -> bool {
    debug!("Health checking {}", addr);

    match time::timeout(timeout, TcpStream::connect(addr)).await {
        Ok(Ok(_stream)) => true,
        Ok(Err(e)) => {
            debug!("Site unreachable {}: {}", addr, e);
            false
        }
        Err(_) => {
            debug!("Health check TIMEOUT for {}", addr);
            false
        }
    }
}
