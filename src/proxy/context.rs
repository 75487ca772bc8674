use crate::capture::RecordSink;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

pub type BoxBody = http_body_util::combinators::BoxBody<Bytes, hyper::Error>;

pub fn full_body(data: impl Into<Bytes>) -> BoxBody {
    Full::new(data.into())
        .map_err(|never| match never {})
        .boxed()
}

pub fn empty_body() -> BoxBody {
    Full::new(Bytes::new())
        .map_err(|never| match never {})
        .boxed()
}

/// Per-connection context handed to the engines. Cloned per request; the
/// connection id stays stable across requests on a kept-alive connection.
#[derive(Clone)]
pub struct ConnContext {
    pub conn_id: u64,
    pub peer: SocketAddr,
    /// Body-capture directory; `None` disables capture.
    pub capture_dir: Option<PathBuf>,
    /// Upstream TCP connect timeout; `None` means no timeout.
    pub connect_timeout: Option<Duration>,
    pub records: RecordSink,
}
