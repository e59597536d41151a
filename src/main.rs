use clap::Parser;
use kube_update_exporter::cli::Cli;
use kube_update_exporter::cluster::{self, KubeClusterSource};
use kube_update_exporter::config::Config;
use kube_update_exporter::metrics::FreshnessMetrics;
use kube_update_exporter::poller::Poller;
use kube_update_exporter::webserver;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[cfg(target_env = "musl")]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
    info!("Starting kube-update-exporter {}", env!("CARGO_PKG_VERSION"));

    let cli = Cli::parse();
    let config = Config::resolve(&cli)?;
    let namespaces = config.namespaces.filter()?;

    let client = cluster::create_client(config.kubeconfig.as_deref()).await?;
    let freshness_metrics = Arc::new(FreshnessMetrics::new()?);
    let poller = Arc::new(Poller::new(
        KubeClusterSource::new(client, namespaces),
        freshness_metrics.clone(),
        config.polling.fetch_timeout(),
    ));
    let mut scheduler = poller.start(config.polling.interval).await?;

    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            shutdown_signal().await;
            info!("Received shutdown signal");
            shutdown.cancel();
        }
    });

    let app = webserver::create_app(freshness_metrics);
    let addr = config.webserver.listen_address;
    info!("Starting metrics server on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await?;

    scheduler.shutdown().await?;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for ctrl-c: {}", e);
            std::future::pending::<()>().await;
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
}
