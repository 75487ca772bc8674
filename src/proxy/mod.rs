pub mod context;
mod forward;
mod glue;
mod handler;
mod tunnel;

pub use context::{BoxBody, ConnContext};
pub use handler::route_request;

use crate::error::ProxyError;
use std::time::Duration;
use tokio::net::TcpStream;

/// Dial an upstream `host:port`, with the configured optional timeout.
pub(crate) async fn dial(target: &str, timeout: Option<Duration>) -> Result<TcpStream, ProxyError> {
    let connect = TcpStream::connect(target);
    let stream = match timeout {
        Some(limit) => tokio::time::timeout(limit, connect)
            .await
            .map_err(|_| ProxyError::Dial {
                target: target.to_string(),
                source: std::io::Error::new(std::io::ErrorKind::TimedOut, "connect timed out"),
            })?,
        None => connect.await,
    }
    .map_err(|e| ProxyError::Dial {
        target: target.to_string(),
        source: e,
    })?;
    stream.set_nodelay(true).ok();
    Ok(stream)
}
