use crate::error::ProxyError;
use crate::proxy::context::{empty_body, BoxBody, ConnContext};
use crate::proxy::glue;
use hyper::body::Incoming;
use hyper::header::CONTENT_LENGTH;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tracing::{debug, warn};

/// Upstream endpoint of a CONNECT request.
#[derive(Debug, PartialEq, Eq)]
pub struct TunnelTarget {
    pub host: String,
    pub port: u16,
}

impl TunnelTarget {
    pub fn authority(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Absolute URL used in the request record / log line.
    pub fn url(&self) -> String {
        format!("https://{}:{}", self.host, self.port)
    }
}

/// Parse the CONNECT request target. The target is `host[:port]`, split on
/// the last `:` outside a bracketed IPv6 literal; a missing port defaults
/// to 80.
pub fn parse_target<B>(req: &Request<B>) -> Result<TunnelTarget, ProxyError> {
    let raw = match req.uri().authority() {
        Some(a) => a.as_str().to_owned(),
        None => req.uri().to_string(),
    };
    parse_authority(&raw)
}

fn parse_authority(raw: &str) -> Result<TunnelTarget, ProxyError> {
    let (host, port) = match raw.rfind(':') {
        Some(idx) if !raw[idx..].contains(']') => {
            let port = raw[idx + 1..].parse::<u16>().map_err(|_| {
                ProxyError::InvalidRequestLine(format!("bad port in connect target {raw:?}"))
            })?;
            (&raw[..idx], port)
        }
        _ => (raw, 80),
    };
    let host = host.trim_start_matches('[').trim_end_matches(']');
    if host.is_empty() {
        return Err(ProxyError::InvalidRequestLine(format!(
            "no host in connect target {raw:?}"
        )));
    }
    Ok(TunnelTarget {
        host: host.to_string(),
        port,
    })
}

/// Handle a CONNECT request: dial the target, then answer `200 OK` on the
/// still-present HTTP framing. hyper consumes the request end and hands
/// back the raw stream (leftover bytes the client pipelined after its head
/// included), at which point the glue takes over and the framing is gone.
pub async fn run(mut req: Request<Incoming>, ctx: ConnContext) -> Result<Response<BoxBody>, ProxyError> {
    let target = parse_target(&req)?;
    let authority = target.authority();

    let upstream = super::dial(&authority, ctx.connect_timeout).await?;

    debug!(
        conn_id = ctx.conn_id,
        target = %authority,
        "connect: upstream dialed, upgrading"
    );

    // Register interest in the upgraded stream before replying; the future
    // resolves once the 200 is written and the request framing is consumed.
    let upgrade = hyper::upgrade::on(&mut req);
    let conn_id = ctx.conn_id;
    tokio::spawn(async move {
        let upgraded = match upgrade.await {
            Ok(upgraded) => upgraded,
            Err(e) => {
                warn!(conn_id, target = %authority, error = %e, "connect: upgrade failed");
                return;
            }
        };

        metrics::gauge!("proxy_tunnels_active").increment(1.0);
        match glue::splice(TokioIo::new(upgraded), upstream).await {
            Ok(summary) => {
                metrics::counter!("proxy_tunnel_bytes_total", "direction" => "client_to_upstream")
                    .increment(summary.client_to_upstream);
                metrics::counter!("proxy_tunnel_bytes_total", "direction" => "upstream_to_client")
                    .increment(summary.upstream_to_client);
                debug!(
                    conn_id,
                    target = %authority,
                    tx = summary.client_to_upstream,
                    rx = summary.upstream_to_client,
                    "connect: tunnel closed"
                );
            }
            Err(e) => {
                debug!(conn_id, target = %authority, error = %e, "connect: tunnel aborted");
            }
        }
        metrics::gauge!("proxy_tunnels_active").decrement(1.0);
    });

    tracing::info!(
        conn_id = ctx.conn_id,
        peer = %ctx.peer,
        method = "CONNECT",
        url = %target.url(),
        "access"
    );
    metrics::counter!("proxy_requests_total", "kind" => "tunnel", "status_code" => "200")
        .increment(1);

    Ok(Response::builder()
        .status(StatusCode::OK)
        .header(CONTENT_LENGTH, "0")
        .body(empty_body())
        .expect("static response"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_with_port() {
        assert_eq!(
            parse_authority("x.test:443").unwrap(),
            TunnelTarget {
                host: "x.test".into(),
                port: 443
            }
        );
    }

    #[test]
    fn target_without_port_defaults_to_80() {
        assert_eq!(
            parse_authority("x.test").unwrap(),
            TunnelTarget {
                host: "x.test".into(),
                port: 80
            }
        );
    }

    #[test]
    fn bracketed_ipv6_targets() {
        assert_eq!(
            parse_authority("[::1]:8443").unwrap(),
            TunnelTarget {
                host: "::1".into(),
                port: 8443
            }
        );
        assert_eq!(
            parse_authority("[::1]").unwrap(),
            TunnelTarget {
                host: "::1".into(),
                port: 80
            }
        );
    }

    #[test]
    fn empty_host_is_rejected() {
        assert!(parse_authority("").is_err());
        assert!(parse_authority(":443").is_err());
    }

    #[test]
    fn bad_port_is_rejected() {
        assert!(parse_authority("x.test:").is_err());
        assert!(parse_authority("x.test:notaport").is_err());
        assert!(parse_authority("x.test:70000").is_err());
    }
}
