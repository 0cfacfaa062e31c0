use nlq_bridge::upstream::Upstream;
use nlq_bridge::{app, build_state_from_env};
use tokio::net::TcpListener;
use tokio::signal;
use tracing_subscriber::{fmt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Structured logging; RUST_LOG overrides the default level.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).with_target(true).init();

    let state = build_state_from_env()?;
    let config = state.config.clone();
    tracing::info!(
        service = %config.service_name,
        analytics_configured = state.upstream.ensure_configured(Upstream::Analytics).is_ok(),
        language_model_configured = state
            .upstream
            .ensure_configured(Upstream::LanguageModel)
            .is_ok(),
        model = %config.language_model.model,
        allowed_databases = config.allowed_database_ids.len(),
        "configuration loaded"
    );
    if config.allowed_database_ids.is_empty() {
        tracing::warn!("ALLOWED_DATABASE_IDS not set; every database id is permitted");
    }

    let addr: std::net::SocketAddr = ([0, 0, 0, 0], config.port).into();
    let listener = TcpListener::bind(addr).await?;
    tracing::info!("listening on {}", addr);
    axum::serve(listener, app(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    let _ = signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}
