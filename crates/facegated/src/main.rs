use anyhow::{Context, Result};
use facegate_core::factory::create_self_hosted;
use facegate_core::rate_limiter::CoordinatorRegistry;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod config;
mod server;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("facegated starting");

    let config = config::Config::from_env().context("invalid configuration")?;
    let provider = create_self_hosted(&config.engine)
        .await
        .context("failed to start the face engine")?;
    let registry = CoordinatorRegistry::new(config.coordinator_tps, config.max_accounts);

    let state = server::AppState {
        provider: Arc::new(provider),
        registry: Arc::new(registry),
    };
    let app = server::router(state);

    let listener = tokio::net::TcpListener::bind(config.bind)
        .await
        .with_context(|| format!("failed to bind {}", config.bind))?;
    tracing::info!(
        bind = %config.bind,
        coordinator_tps = config.coordinator_tps,
        max_accounts = config.max_accounts,
        "facegated ready"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::warn!(error = %e, "failed to listen for shutdown signal");
                std::future::pending::<()>().await;
            }
        })
        .await
        .context("server error")?;

    tracing::info!("facegated shutting down");
    Ok(())
}
