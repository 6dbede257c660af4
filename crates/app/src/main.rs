use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use clap::Parser;
use rezn_persist::SqliteStore;
use rezn_reconcile::{Controller, ControllerConfig};
use rezn_runtime::DockerCli;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "reznd", version, about = "Rezn reconciler daemon")]
struct Args {
    /// Store location (default: $REZN_DB_PATH or /var/lib/rezn/rezn.db)
    store: Option<PathBuf>,
}

fn init_tracing() {
    let env = std::env::var("REZN_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("REZN_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            warn!(addr = %addr, "invalid REZN_METRICS_ADDR; expected host:port");
        }
    }
}

#[tokio::main(flavor = "multi_thread")]
async fn main() {
    init_tracing();
    init_metrics();
    let args = Args::parse();

    let path = rezn_persist::resolve_path(args.store);
    let store = match SqliteStore::open(&path) {
        Ok(store) => Arc::new(store),
        Err(e) => {
            error!(path = %path.display(), error = %format!("{:#}", e), "failed to open store");
            std::process::exit(1);
        }
    };
    let runtime = Arc::new(DockerCli::from_env());
    info!(store = %path.display(), runtime = runtime.bin(), "reznd starting");

    // Listen from the start so Ctrl-C during the first pass is not lost.
    let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "cannot listen for Ctrl-C; only a kill will stop reznd");
            // Dropping stop_tx would read as a shutdown request.
            std::future::pending::<()>().await;
        }
        info!("Ctrl-C received; stopping after the current pass");
        let _ = stop_tx.send(());
    });

    let controller = Controller::new(store, runtime, ControllerConfig::from_env());
    controller
        .run(async move {
            let _ = stop_rx.await;
        })
        .await;
    info!("reznd stopped");
}
