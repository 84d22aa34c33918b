use proxyslot::api::{ApiServer, PKG_NAME, VERSION};
use proxyslot::config::Config;
use proxyslot::context::AppContext;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("proxyslot=info".parse().expect("valid log directive")),
        )
        .init();

    // Load configuration
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    let config = Config::load_with_env(&config_path).map_err(|e| {
        error!(path = %config_path.display(), error = %e, "Failed to load configuration");
        e
    })?;

    info!(path = %config_path.display(), "Configuration loaded");
    print_startup_banner(&config);

    let ctx = Arc::new(AppContext::open(&config.database).map_err(|e| {
        error!(error = %e, "Failed to open document store");
        anyhow::anyhow!("Failed to open document store: {}", e)
    })?);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let bind_addr = config.server.socket_addr().map_err(|e| {
        error!(bind = %config.server.bind, port = config.server.port, error = %e, "Invalid bind address");
        e
    })?;

    let api_server = ApiServer::new(bind_addr, Arc::clone(&ctx), &config, shutdown_rx);
    let api_handle = tokio::spawn(async move {
        if let Err(e) = api_server.run().await {
            error!(error = %e, "API server error");
        }
    });

    wait_for_shutdown_signal().await;

    // Signal shutdown
    let _ = shutdown_tx.send(true);

    if tokio::time::timeout(config.server.shutdown_timeout(), api_handle)
        .await
        .is_err()
    {
        warn!("API server did not stop within the shutdown timeout");
    }

    if let Err(e) = ctx.close() {
        warn!(error = %e, "Failed to close document store cleanly");
    }

    info!("Shutdown complete");
    Ok(())
}

async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {
                        info!("Received SIGINT (Ctrl+C), shutting down...");
                    }
                    _ = sigterm.recv() => {
                        info!("Received SIGTERM, shutting down...");
                    }
                }
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler, waiting for Ctrl+C only");
                let _ = tokio::signal::ctrl_c().await;
                info!("Received SIGINT (Ctrl+C), shutting down...");
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        info!("Received Ctrl+C, shutting down...");
    }
}

fn print_startup_banner(config: &Config) {
    info!(name = PKG_NAME, version = VERSION, "Starting service");
    info!(
        bind = %config.server.bind,
        port = config.server.port,
        shutdown_timeout_secs = config.server.shutdown_timeout_secs,
        "Server configuration"
    );
    info!(
        backend = ?config.database.backend,
        path = %config.database.path.display(),
        name = %config.database.name,
        "Database settings"
    );
    info!(
        default_list_limit = config.status.default_list_limit,
        max_list_limit = config.status.max_list_limit,
        "Status log settings"
    );
    info!(
        allowed_origins = ?config.cors.allowed_origins,
        allow_credentials = config.cors.allow_credentials,
        "CORS settings"
    );
}
