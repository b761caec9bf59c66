use anyhow::Context;
use tokio::net::TcpListener;

use admod_infra::PipelineConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    admod_observability::init("admod-api");

    let config = PipelineConfig::from_env().context("invalid configuration")?;
    let (app, services) = admod_api::app::build_app(&config).await?;

    let listener = TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;

    tracing::info!(addr = %listener.local_addr()?, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    if let Some(stats) = services.shutdown().await {
        tracing::info!(?stats, "embedded worker stopped");
    }
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown requested");
}
