use anyhow::Context;
use std::net::SocketAddr;
use std::sync::Arc;
use tokenfund::ledger::{LedgerGateway, XrplGateway};
use tokenfund::orchestration::{Monitor, ReconcileSettings};
use tokenfund::{api, config::Config, db::init_db, Repository};
use tokio::sync::watch;

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing_subscriber::filter::LevelFilter::INFO.into()),
        )
        .init();

    // Load configuration
    let config = match Config::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = run(config).await {
        eprintln!("{:#}", e);
        std::process::exit(1);
    }
}

async fn run(config: Config) -> anyhow::Result<()> {
    let pool = init_db(&config.database_path)
        .await
        .context("Failed to initialize database")?;
    let repo = Arc::new(Repository::new(pool));
    let ledger: Arc<dyn LedgerGateway> = Arc::new(XrplGateway::new(
        config.xrpl_rpc_url.clone(),
        config.wallets(),
        config.ledger_poll_interval,
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let monitor_handle = if config.monitor_enabled {
        let monitor = Monitor::new(
            repo.clone(),
            ledger.clone(),
            ReconcileSettings::from_config(&config),
        );
        Some(tokio::spawn(async move { monitor.run(shutdown_rx).await }))
    } else {
        tracing::warn!("Deposit monitor disabled; deposits will not be reconciled");
        None
    };

    let port = config.port;
    let app = api::create_router(api::AppState::new(repo, ledger, config));

    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for shutdown signal");
            }
            tracing::info!("Shutdown requested");
            let _ = shutdown_tx.send(true);
        })
        .await
        .context("Server error")?;

    // Let an in-flight settlement finish before exiting.
    if let Some(handle) = monitor_handle {
        handle.await.context("Deposit monitor task panicked")?;
    }
    Ok(())
}
