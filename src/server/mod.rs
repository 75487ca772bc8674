pub mod bootstrap;

use crate::capture::{ExchangeRecord, RecordSink};
use crate::config::ProxyConfig;
use crate::error::ProxyError;
use crate::metrics::Metrics;
use crate::proxy::context::{full_body, BoxBody, ConnContext};
use crate::proxy::route_request;
use anyhow::Result;
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::rt::TokioIo;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// Shared per-listener state, cheaply cloneable into connection tasks.
#[derive(Clone)]
struct ProxyState {
    capture_dir: Option<PathBuf>,
    connect_timeout: Option<Duration>,
    records: RecordSink,
    conn_seq: Arc<AtomicU64>,
    active_conns: Arc<AtomicI64>,
}

impl ProxyState {
    fn new(config: &ProxyConfig) -> Self {
        let capture_dir = config
            .capture
            .enabled
            .then(|| PathBuf::from(&config.capture.dir));
        let connect_timeout = match config.upstream.connect_timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };
        Self {
            capture_dir,
            connect_timeout,
            records: RecordSink::default(),
            conn_seq: Arc::new(AtomicU64::new(1)),
            active_conns: Arc::new(AtomicI64::new(0)),
        }
    }

    fn context(&self, peer: SocketAddr) -> ConnContext {
        ConnContext {
            conn_id: self.conn_seq.fetch_add(1, Ordering::Relaxed),
            peer,
            capture_dir: self.capture_dir.clone(),
            connect_timeout: self.connect_timeout,
            records: self.records.clone(),
        }
    }
}

/// Listener facade: bind, accept, drain, stop. Completed exchanges are
/// published to subscribers obtained via [`ProxyServer::subscribe`].
pub struct ProxyServer {
    config: ProxyConfig,
    state: ProxyState,
    shutdown: Arc<Notify>,
    accept_task: Option<JoinHandle<()>>,
    local_addr: Option<SocketAddr>,
}

impl ProxyServer {
    pub fn new(config: ProxyConfig) -> Self {
        let state = ProxyState::new(&config);
        Self {
            config,
            state,
            shutdown: Arc::new(Notify::new()),
            accept_task: None,
            local_addr: None,
        }
    }

    /// Receiver for completed exchange records. Subscribe before traffic
    /// starts; the channel drops the oldest records when a subscriber lags.
    pub fn subscribe(&self) -> broadcast::Receiver<ExchangeRecord> {
        self.state.records.subscribe()
    }

    /// Address the listener is bound to, once started.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Bind the configured listen address and start accepting. Returns the
    /// bound address once the bind completed.
    pub async fn start(&mut self) -> Result<SocketAddr, ProxyError> {
        let addr = &self.config.server.listen;
        let listener = TcpListener::bind(addr).await.map_err(|e| ProxyError::Bind {
            addr: addr.clone(),
            source: e,
        })?;
        let local = listener.local_addr().map_err(|e| ProxyError::Bind {
            addr: addr.clone(),
            source: e,
        })?;
        self.local_addr = Some(local);
        info!("server: proxy listening, addr={}", local);

        let state = self.state.clone();
        let shutdown = self.shutdown.clone();
        self.accept_task = Some(tokio::spawn(run_accept_loop(listener, state, shutdown)));
        Ok(local)
    }

    /// Stop accepting, drain in-flight connections (bounded), and await the
    /// accept task.
    pub async fn stop(&mut self) {
        self.shutdown.notify_waiters();
        if let Some(task) = self.accept_task.take() {
            if let Err(e) = task.await {
                error!("server: accept task error: {}", e);
            }
        }
    }
}

async fn run_accept_loop(listener: TcpListener, state: ProxyState, shutdown: Arc<Notify>) {
    const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

    loop {
        let accepted = tokio::select! {
            result = listener.accept() => result,
            _ = shutdown.notified() => {
                info!("server: proxy: stop accepting new connections, draining...");
                break;
            }
        };

        let (stream, peer) = match accepted {
            Ok(v) => {
                metrics::counter!("proxy_connections_total", "status" => "accepted").increment(1);
                v
            }
            Err(e) => {
                error!("server: proxy: accept failed, error={}", e);
                metrics::counter!("proxy_connections_total", "status" => "error").increment(1);
                continue;
            }
        };

        metrics::gauge!("proxy_connections_active").increment(1.0);
        state.active_conns.fetch_add(1, Ordering::Relaxed);

        let state = state.clone();
        tokio::spawn(async move {
            serve_connection(stream, peer, &state).await;
            metrics::gauge!("proxy_connections_active").decrement(1.0);
            state.active_conns.fetch_sub(1, Ordering::Relaxed);
        });
    }

    // Drain phase: wait for in-flight connections to finish (or time out).
    let active = state.active_conns.load(Ordering::Relaxed);
    if active > 0 {
        info!(
            "server: proxy: waiting for {} active connections to drain",
            active
        );
        let drain = async {
            while state.active_conns.load(Ordering::Relaxed) > 0 {
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        };
        match tokio::time::timeout(DRAIN_TIMEOUT, drain).await {
            Ok(_) => info!("server: proxy: all connections drained"),
            Err(_) => info!(
                "server: proxy: drain timeout ({}s), {} connections still active",
                DRAIN_TIMEOUT.as_secs(),
                state.active_conns.load(Ordering::Relaxed)
            ),
        }
    }
}

/// Install the HTTP/1.1 framing and the router on one accepted socket.
/// Upgrades stay enabled so a CONNECT can dismantle the framing and keep
/// the raw stream; header casing is preserved since we forward verbatim.
async fn serve_connection(stream: TcpStream, peer: SocketAddr, state: &ProxyState) {
    let ctx = state.context(peer);
    let io = TokioIo::new(stream);
    let svc = service_fn(move |req: Request<Incoming>| {
        let ctx = ctx.clone();
        async move { route_request(req, ctx).await }
    });

    if let Err(e) = hyper::server::conn::http1::Builder::new()
        .preserve_header_case(true)
        .title_case_headers(true)
        .serve_connection(io, svc)
        .with_upgrades()
        .await
    {
        let msg = e.to_string();
        if !msg.contains("connection closed") {
            debug!(peer = %peer, error = %msg, "connection ended with error");
        }
    }
}

/// Run a simple admin server for health checks and metrics.
pub async fn run_admin_server(listen: &str, metrics: Metrics) -> Result<()> {
    let addr: SocketAddr = listen.parse()?;
    let listener = TcpListener::bind(addr).await?;
    info!("server: admin listening, addr={}", addr);

    loop {
        let (stream, _) = listener.accept().await?;
        let metrics = metrics.clone();

        tokio::spawn(async move {
            let io = TokioIo::new(stream);
            let svc = service_fn(move |req: Request<Incoming>| {
                let metrics = metrics.clone();
                async move { handle_admin(req, metrics) }
            });

            if let Err(e) = hyper::server::conn::http1::Builder::new()
                .serve_connection(io, svc)
                .await
            {
                if !e.to_string().contains("connection closed") {
                    error!("server: admin: connection error, error={}", e);
                }
            }
        });
    }
}

fn handle_admin(req: Request<Incoming>, metrics: Metrics) -> Result<Response<BoxBody>, hyper::Error> {
    match req.uri().path() {
        "/health" | "/healthz" => Ok(Response::builder()
            .status(200)
            .header("content-type", "application/json")
            .body(full_body(r#"{"status":"ok"}"#))
            .expect("static response")),

        "/metrics" => Ok(Response::builder()
            .status(200)
            .header("content-type", "text/plain; version=0.0.4; charset=utf-8")
            .body(full_body(metrics.render()))
            .expect("static response")),

        _ => Ok(Response::builder()
            .status(404)
            .body(full_body(r#"{"error":"not found"}"#))
            .expect("static response")),
    }
}
