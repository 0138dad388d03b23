use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::services::ServiceRegistry;

/// 安装 tracing 订阅器，RUST_LOG 优先于配置的级别
pub fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    if tracing_subscriber::fmt()
        .with_env_filter(filter)
        .try_init()
        .is_err()
    {
        tracing::debug!("Tracing subscriber already installed");
    }
}

// 运行直到取消，然后关闭注册表
pub async fn serve(
    registry: ServiceRegistry,
    shutdown: CancellationToken,
    stats_interval: Option<Duration>,
) {
    let tracker = TaskTracker::new();

    if let Some(period) = stats_interval {
        let registry = registry.clone();
        let token = shutdown.clone();
        tracker.spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = interval.tick() => {
                        let stats = registry.event_stats();
                        tracing::info!(
                            services = registry.len(),
                            listeners = stats.active_listeners,
                            events_published = stats.events_published,
                            events_delivered = stats.events_delivered,
                            delivery_failures = stats.delivery_failures,
                            "Service registry statistics"
                        );
                    }
                }
            }
        });
    }
    tracker.close();

    shutdown.cancelled().await;
    tracker.wait().await;

    tracing::info!("Shutting down service registry...");
    registry.shutdown();

    let stats = registry.event_stats();
    tracing::info!(
        events_published = stats.events_published,
        events_delivered = stats.events_delivered,
        delivery_failures = stats.delivery_failures,
        "Service registry stopped"
    );
}

pub async fn start(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let registry = ServiceRegistry::from_config(&config);
    let shutdown = CancellationToken::new();

    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => tracing::info!("Received Ctrl-C"),
            Err(e) => tracing::error!(error = %e, "Failed to listen for shutdown signal"),
        }
        signal_token.cancel();
    });

    tracing::info!(
        enable_hooks = config.registry.enable_hooks,
        max_listeners = config.registry.max_listeners,
        "Service registry started"
    );

    serve(registry, shutdown, config.logging.stats_interval()).await;
    Ok(())
}
