use std::sync::Arc;

use anyhow::Context;

use tyrehub_api::app::{self, services};
use tyrehub_infra::AppConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // A missing .env file is fine; real deployments set the environment directly.
    let _ = dotenvy::dotenv();
    tyrehub_observability::init();

    let config = AppConfig::from_env().context("invalid configuration")?;
    let services = Arc::new(
        services::build_services(&config)
            .await
            .context("failed to build services")?,
    );

    let workers = if config.run_consumers {
        services
            .spawn_consumers(&config)
            .await
            .context("failed to start bus consumers")?
    } else {
        tracing::info!("RUN_CONSUMERS=false; bus consumers not started");
        Vec::new()
    };

    let router = app::build_app(services.clone(), &config.cors_allowed_origin);
    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;

    tracing::info!(addr = %listener.local_addr()?, "listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("http server failed")?;

    for worker in workers {
        worker.shutdown().await;
    }

    tracing::info!("shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown signal received");
}
