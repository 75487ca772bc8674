use crate::capture::ExchangeRecord;
use crate::config::ProxyConfig;
use crate::metrics::Metrics;
use crate::server::{self, ProxyServer};
use anyhow::Result;
use std::path::PathBuf;
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// CLI arguments forwarded from `main()`. `None` means "use the config
/// file value".
pub struct BootstrapArgs {
    pub config_path: PathBuf,
    pub listen: Option<String>,
    pub admin_listen: Option<String>,
    pub cache_dir: Option<PathBuf>,
}

/// Proxy lifecycle: init → bind → serve → shutdown.
pub async fn run(args: BootstrapArgs) -> Result<()> {
    init_tracing();

    let mut config = ProxyConfig::load(&args.config_path)?;
    if let Some(listen) = args.listen {
        config.server.listen = listen;
    }
    if let Some(admin_listen) = args.admin_listen {
        config.server.admin_listen = admin_listen;
    }
    if let Some(dir) = args.cache_dir {
        config.capture.dir = dir.to_string_lossy().into_owned();
    }
    config.validate()?;

    let metrics = Metrics::install();

    let mut proxy = ProxyServer::new(config.clone());

    // Subscribe before traffic starts so no record slips past the logger.
    start_record_logger(proxy.subscribe());

    let addr = proxy.start().await?;
    info!(
        "server: proxy started, listen={}, capture_enabled={}, capture_dir={}",
        addr, config.capture.enabled, config.capture.dir
    );

    start_admin_server(&config, metrics);

    wait_for_shutdown().await;

    proxy.stop().await;
    info!("server: shutdown complete");
    Ok(())
}

fn init_tracing() {
    let (non_blocking, _guard) = tracing_appender::non_blocking::NonBlockingBuilder::default()
        .buffered_lines_limit(128_000)
        .lossy(true)
        .finish(std::io::stdout());

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_target(false)
                .json(),
        )
        .init();

    std::mem::forget(_guard);
}

/// Emit one structured log line per completed exchange. This is the
/// built-in subscriber; external consumers attach their own receiver via
/// `ProxyServer::subscribe`.
fn start_record_logger(mut rx: broadcast::Receiver<ExchangeRecord>) {
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(record) => match serde_json::to_string(&record) {
                    Ok(json) => info!(record = %json, "exchange"),
                    Err(e) => error!("record serialization failed: {}", e),
                },
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!("record logger lagging, missed={}", missed);
                }
                Err(broadcast::error::RecvError::Closed) => return,
            }
        }
    });
}

fn start_admin_server(config: &ProxyConfig, metrics: Metrics) {
    let admin_listen = config.server.admin_listen.clone();
    tokio::spawn(async move {
        if let Err(e) = server::run_admin_server(&admin_listen, metrics).await {
            error!("server: admin failed, error={}", e);
        }
    });
}

async fn wait_for_shutdown() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("server: received SIGINT, shutting down"),
        _ = terminate => info!("server: received SIGTERM, shutting down"),
    }
}
