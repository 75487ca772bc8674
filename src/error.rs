use std::fmt;

/// Failures a single proxied connection can run into, grouped by where in
/// the exchange they surface. Variants up to `Dial` are answered with a
/// `400 Bad Request` while the client still speaks HTTP; later failures
/// tear the connection down without a response.
#[derive(Debug)]
pub enum ProxyError {
    /// First inbound frame was not a usable request head.
    InvalidHttpMessage,
    /// Request line could not be turned into an upstream target:
    /// missing/relative URL, non-http scheme, bad Host, malformed
    /// CONNECT authority.
    InvalidRequestLine(String),
    /// Upstream TCP dial was refused or timed out.
    Dial { target: String, source: std::io::Error },
    /// The upstream HTTP handshake or connection driver failed.
    Pipeline(String),
    /// Body-cache file could not be created.
    CacheOpen(std::io::Error),
    /// Listener could not bind.
    Bind { addr: String, source: std::io::Error },
}

impl fmt::Display for ProxyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProxyError::InvalidHttpMessage => write!(f, "invalid http message"),
            ProxyError::InvalidRequestLine(msg) => write!(f, "invalid request line: {}", msg),
            ProxyError::Dial { target, source } => {
                write!(f, "dial {} failed: {}", target, source)
            }
            ProxyError::Pipeline(msg) => write!(f, "upstream pipeline error: {}", msg),
            ProxyError::CacheOpen(e) => write!(f, "unable to open cache file: {}", e),
            ProxyError::Bind { addr, source } => write!(f, "bind {} failed: {}", addr, source),
        }
    }
}

impl std::error::Error for ProxyError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ProxyError::Dial { source, .. } | ProxyError::Bind { source, .. } => Some(source),
            ProxyError::CacheOpen(e) => Some(e),
            _ => None,
        }
    }
}

impl ProxyError {
    /// Whether the client should still get a `400` on the HTTP framing,
    /// or the connection should just be closed.
    pub fn wants_bad_request(&self) -> bool {
        matches!(
            self,
            ProxyError::InvalidHttpMessage
                | ProxyError::InvalidRequestLine(_)
                | ProxyError::Dial { .. }
                | ProxyError::CacheOpen(_)
        )
    }
}
