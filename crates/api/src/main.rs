use std::sync::Arc;

use anyhow::Context;

use authors_api::app::{build_app, services::AppServices};
use authors_infra::config::ServiceConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    authors_observability::init();

    let config = ServiceConfig::from_env().context("invalid configuration")?;
    let services = Arc::new(AppServices::build(&config).await.context("failed to wire services")?);

    let consumer = services
        .spawn_consumer(tokio::runtime::Handle::current())
        .context("failed to start posts consumer")?;

    let app = build_app(services.clone());

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;

    tracing::info!(
        addr = %listener.local_addr()?,
        stage = ?config.stage,
        persistent = config.persistence.is_some(),
        posts_transport = services.gateway.transport_name(),
        "listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown requested");
        })
        .await?;

    tokio::task::spawn_blocking(move || consumer.shutdown()).await?;
    Ok(())
}
