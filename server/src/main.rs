use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

use tutorlink_server::config::ServerConfig;
use tutorlink_server::db::pool::{create_pool, run_migrations};
use tutorlink_server::engine::calls::run_sweeper;
use tutorlink_server::engine::hub::Hub;
use tutorlink_server::web::app_state::AppState;
use tutorlink_server::web::router::build_router;

#[derive(Parser)]
#[command(name = "tutorlink-server", about = "TutorLink chat and call-signaling hub")]
struct Cli {
    /// Path to the TOML config file
    #[arg(short, long, default_value = "tutorlink.toml")]
    config: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = ServerConfig::load(&cli.config)?;
    let web_addr = config.server.web_address.clone();

    // Initialize database
    let pool = create_pool(&config.database.url)
        .await
        .context("failed to connect to database")?;

    run_migrations(&pool)
        .await
        .context("failed to run database migrations")?;

    let hub = Arc::new(Hub::new(pool, config));

    // Expired call requests are dropped in the background.
    let shutdown = CancellationToken::new();
    let sweeper = tokio::spawn(run_sweeper(hub.calls.clone(), shutdown.clone()));

    let app = build_router(Arc::new(AppState::new(hub)));

    info!("TutorLink hub starting on {}", web_addr);

    let listener = tokio::net::TcpListener::bind(&web_addr)
        .await
        .with_context(|| format!("failed to bind web listener on {web_addr}"))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
        })
        .await
        .context("server error")?;

    shutdown.cancel();
    let _ = sweeper.await;
    Ok(())
}
