use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use plant_disease_service::config::Settings;
use plant_disease_service::metrics::Metrics;
use plant_disease_service::model::ModelManager;
use plant_disease_service::routes::{router, AppState};
use plant_disease_service::utils::ensure_checkpoints;
use tracing::info;
use tracing_subscriber::EnvFilter;

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl-C: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutting down");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let settings = Settings::from_env().context("invalid configuration")?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&settings.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    ensure_checkpoints(&settings).await;

    info!("Loading {} model...", settings.default_plant);
    let manager = Arc::new(ModelManager::new(settings.model_settings()));
    let model = manager
        .load(Some(settings.startup_checkpoint()), settings.default_plant)
        .await;
    info!(
        "Model ready: {} {:?} (trained: {})",
        model.plant(),
        model.class_names(),
        model.is_trained()
    );

    let addr: SocketAddr = settings
        .bind_address()
        .parse()
        .with_context(|| format!("invalid bind address {}", settings.bind_address()))?;
    let metrics = Arc::new(Metrics::new().context("failed to register metrics")?);
    let app = router(AppState::new(manager, settings, metrics));

    info!("Listening on http://{}", addr);
    axum::Server::try_bind(&addr)
        .with_context(|| format!("failed to bind {}", addr))?
        .serve(app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}
