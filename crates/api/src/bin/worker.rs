use anyhow::Context;

use admod_infra::PipelineConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    admod_observability::init("admod-worker");

    let config = PipelineConfig::from_env().context("invalid configuration")?;
    let worker = admod_api::app::services::build_worker(&config).await?;
    let handle = worker
        .start()
        .await
        .context("failed to join consumer group")?;

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    tracing::info!("shutdown requested, finishing in-flight message");

    let stats = handle.shutdown().await;
    tracing::info!(?stats, "worker stopped");
    Ok(())
}
