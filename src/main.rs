mod clients;
mod config;
mod error;
mod fleet;
mod helpers;
mod models;
mod routes;

use std::path::PathBuf;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::signal;
use tracing::{info, warn};

use clients::BackendClient;
use fleet::FleetService;
use fleet::mode::LoadIntent;

#[derive(Clone)]
pub struct AppState {
    pub fleet: Arc<FleetService>,
    pub config: Arc<config::Config>,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "fleet_console=info".into()),
        )
        .init();

    let config_path = std::env::args()
        .skip(1)
        .zip(std::env::args().skip(2))
        .find_map(|(k, v)| (k == "-config" || k == "--config").then_some(v))
        .or_else(|| std::env::args().nth(1).filter(|a| !a.starts_with('-')))
        .unwrap_or_else(|| "/etc/fleet-console/config.yaml".to_string());

    let cfg = config::Config::load(&PathBuf::from(&config_path)).unwrap_or_else(|e| {
        eprintln!("error loading config: {}", e);
        std::process::exit(1);
    });

    let backend = BackendClient::new(&cfg.backend.base_url, cfg.timeout()).unwrap_or_else(|e| {
        eprintln!("error creating backend client: {}", e);
        std::process::exit(1);
    });
    info!("using dashboard backend at {}", backend.base_url);

    let fleet = Arc::new(FleetService::new(
        Arc::new(backend),
        cfg.live_source,
        cfg.state_path.clone(),
    ));
    let cfg = Arc::new(cfg);

    // First paint; the console still starts if the backend is down.
    if let Err(e) = fleet.load(LoadIntent::Initial).await {
        warn!("initial fleet load failed: {}", e);
    }

    // Shutdown signal
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(());

    match cfg.refresh_interval() {
        Some(every) => {
            let refresher = fleet.refresher.clone();
            tokio::spawn(async move {
                refresher.run_live_refresher(every, shutdown_rx).await;
            });
        }
        None => info!("periodic live refresh disabled"),
    }

    let state = AppState {
        fleet,
        config: cfg.clone(),
    };

    let router = routes::build_router(state);

    let listen_addr = cfg.listen_addr();
    let listener = TcpListener::bind(&listen_addr).await.unwrap_or_else(|e| {
        eprintln!("failed to bind {}: {}", listen_addr, e);
        std::process::exit(1);
    });

    info!("fleet-console listening on {}", listen_addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            let _ = shutdown_tx.send(());
        })
        .await
        .unwrap_or_else(|e| {
            eprintln!("server error: {}", e);
            std::process::exit(1);
        });
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("failed to listen for ctrl+c: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!("failed to listen for SIGTERM: {}", e);
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
}
