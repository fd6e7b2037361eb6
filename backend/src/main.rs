mod api;

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use api::{AppState, router};
use certlookup::logging::init_logging;
use certlookup::{AppConfig, build_source};
use clap::Parser;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{info, warn};

#[derive(Debug, Parser)]
#[command(
    name = "certlookup-backend",
    version,
    about = "HTTP API for certificate lookup"
)]
struct ServerConfig {
    /// Path to the TOML configuration file
    #[arg(long, env = "CERTLOOKUP_CONFIG", default_value = "certlookup.toml")]
    config: PathBuf,
    /// Address to bind the HTTP server to
    #[arg(long, env = "BIND_ADDRESS", default_value = "127.0.0.1:8080")]
    bind: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_logging("info")?;

    let config = ServerConfig::parse();
    let bind_addr: SocketAddr = config
        .bind
        .parse()
        .with_context(|| format!("invalid bind address: {}", config.bind))?;

    let app_config = AppConfig::load(&config.config).context("failed to load config")?;
    let source = build_source(&app_config.source).context("failed to set up data source")?;
    info!(
        stage = "startup",
        event = "source.ready",
        source = source.kind(),
        config_path = %config.config.display(),
        "data source configured"
    );

    let source_kind = source.kind();
    let app = router(AppState { source });

    let listener = TcpListener::bind(bind_addr)
        .await
        .context("failed to bind TCP listener")?;

    info!(%bind_addr, "server starting");

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(async move {
            let received = shutdown_signal().await;
            info!(
                stage = "shutdown",
                event = "server.drain.begin",
                signal = received,
                source = source_kind,
                "draining in-flight certificate requests"
            );
        })
        .await
        .context("certificate API server failed")?;

    info!(
        stage = "shutdown",
        event = "server.drain.end",
        result = "ok",
        "certificate API stopped"
    );
    Ok(())
}

/// Resolves with the name of the signal that asked the server to stop.
async fn shutdown_signal() -> &'static str {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            warn!(stage = "shutdown", error = %err, "cannot listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                warn!(stage = "shutdown", error = %err, "cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => "SIGINT",
        _ = terminate => "SIGTERM",
    }
}
