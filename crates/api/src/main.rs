use std::sync::Arc;

use anyhow::Context;
use shelflife_infra::config::EngineConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    shelflife_observability::init();

    let config = EngineConfig::from_env().context("invalid configuration")?;
    let services = Arc::new(shelflife_api::app::AppServices::from_config(&config).await?);

    for store_id in &config.stores {
        services.ensure_runner(*store_id);
    }
    tracing::info!(stores = config.stores.len(), targets = config.targets.len(), "automation runners started");

    let app = shelflife_api::app::build_app(services.clone());

    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;

    tracing::info!("listening on {}", listener.local_addr()?);

    let shutdown = services.shutdown_token().clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => tracing::info!("shutdown requested"),
                _ = shutdown.cancelled() => {}
            }
        })
        .await
        .context("server error")?;

    services.shutdown().await;
    Ok(())
}
