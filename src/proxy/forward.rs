use crate::capture::record::flatten_headers;
use crate::capture::{BodyCache, ExchangeRecord, RequestRecord, ResponseRecord};
use crate::error::ProxyError;
use crate::proxy::context::{empty_body, BoxBody, ConnContext};
use bytes::Bytes;
use http::uri::Uri;
use http::{header, Request, Response};
use http_body_util::{BodyExt, StreamBody};
use hyper::body::{Body as _, Frame, Incoming};
use hyper_util::rt::TokioIo;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, warn};

/// Validated upstream destination for a plain forward request.
struct ForwardTarget {
    authority: String,
    origin_form: Uri,
    absolute_url: String,
}

/// Host portion of an authority string, with any `:port` suffix and IPv6
/// brackets removed.
fn host_part(authority: &str) -> &str {
    let host = match authority.rfind(':') {
        Some(idx) if !authority[idx..].contains(']') => &authority[..idx],
        _ => authority,
    };
    host.trim_start_matches('[').trim_end_matches(']')
}

/// Check the request line of a forward request and derive the upstream
/// target: absolute-form URI, `http` scheme, and a `Host` header agreeing
/// with the URI host. The forwarded target is the origin-form
/// `path[?query]`.
fn validate_target<B>(req: &Request<B>) -> Result<ForwardTarget, ProxyError> {
    let uri = req.uri();

    if uri.scheme_str() != Some("http") {
        return Err(ProxyError::InvalidRequestLine(format!(
            "unsupported scheme in request target {uri}"
        )));
    }

    let host = match uri.host() {
        Some(h) if !h.is_empty() => h,
        _ => {
            return Err(ProxyError::InvalidRequestLine(format!(
                "no host in request target {uri}"
            )))
        }
    };

    let host_header = req
        .headers()
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ProxyError::InvalidRequestLine("missing Host header".to_string()))?;

    if !host_part(host_header).eq_ignore_ascii_case(host) {
        return Err(ProxyError::InvalidRequestLine(format!(
            "Host header {host_header:?} does not match request target host {host:?}"
        )));
    }

    let port = uri.port_u16().unwrap_or(80);
    let origin_form: Uri = uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .filter(|s| !s.is_empty())
        .unwrap_or("/")
        .parse()
        .map_err(|_| ProxyError::InvalidRequestLine(format!("unusable request path in {uri}")))?;

    Ok(ForwardTarget {
        authority: format!("{}:{}", host, port),
        origin_form,
        absolute_url: uri.to_string(),
    })
}

/// Forward a plain HTTP request: dial the origin, replay the request with
/// an origin-form target, and stream the response back. Request and
/// response body chunks are teed into the body cache on their way through,
/// and one exchange record is published once the response finishes.
pub async fn run(req: Request<Incoming>, ctx: ConnContext) -> Result<Response<BoxBody>, ProxyError> {
    let started = Instant::now();
    let target = validate_target(&req)?;

    let request_record = RequestRecord {
        url: target.absolute_url.clone(),
        method: req.method().to_string(),
        headers: flatten_headers(req.headers()),
        body: None,
    };

    let cache = match ctx.capture_dir.as_deref() {
        Some(dir) => Some(Arc::new(Mutex::new(BodyCache::create(dir).await?))),
        None => None,
    };

    let upstream = super::dial(&target.authority, ctx.connect_timeout).await?;

    let (mut sender, conn) = hyper::client::conn::http1::Builder::new()
        .preserve_header_case(true)
        .title_case_headers(true)
        .handshake(TokioIo::new(upstream))
        .await
        .map_err(|e| ProxyError::Pipeline(format!("upstream handshake: {e}")))?;

    let conn_id = ctx.conn_id;
    tokio::spawn(async move {
        if let Err(e) = conn.await {
            debug!(conn_id, error = %e, "upstream connection ended with error");
        }
    });

    // Headers and version travel verbatim; only the request target changes.
    // A request that arrived without a body is forwarded with an exact
    // empty body so the encoder does not invent chunked framing for it.
    let (mut parts, body) = req.into_parts();
    parts.uri = target.origin_form;
    let upstream_body = if body.is_end_stream() {
        empty_body()
    } else {
        tee_request_body(body, cache.clone())
    };
    let upstream_req = Request::from_parts(parts, upstream_body);

    let resp = sender
        .send_request(upstream_req)
        .await
        .map_err(|e| ProxyError::Pipeline(format!("upstream exchange: {e}")))?;

    let (parts, resp_body) = resp.into_parts();
    let response_record = ResponseRecord {
        status_code: parts.status.as_u16(),
        headers: flatten_headers(&parts.headers),
        body: None,
    };

    let body = tee_response_body(resp_body, cache, request_record, response_record, ctx, started);
    Ok(Response::from_parts(parts, body))
}

/// Turn a receiver of frames into a response/request body.
fn channel_body(rx: mpsc::Receiver<Result<Frame<Bytes>, hyper::Error>>) -> BoxBody {
    let stream = futures_util::stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|frame| (frame, rx))
    });
    BodyExt::boxed(StreamBody::new(stream))
}

/// Pump the inbound request body upstream, appending data chunks to the
/// request-body cache file as they pass. Frames keep their arrival order;
/// trailers pass through untouched.
fn tee_request_body(mut body: Incoming, cache: Option<Arc<Mutex<BodyCache>>>) -> BoxBody {
    let (tx, rx) = mpsc::channel(8);
    tokio::spawn(async move {
        while let Some(result) = body.frame().await {
            let forward = match result {
                Ok(frame) => {
                    if let (Some(data), Some(cache)) = (frame.data_ref(), cache.as_ref()) {
                        append_chunk(cache, data, Side::Request).await;
                    }
                    Ok(frame)
                }
                Err(e) => Err(e),
            };
            let failed = forward.is_err();
            if tx.send(forward).await.is_err() || failed {
                break;
            }
        }
    });
    channel_body(rx)
}

/// Pump the upstream response body back to the client, appending data
/// chunks to the response-body cache file. When the body ends cleanly the
/// exchange records are finalized and published.
fn tee_response_body(
    mut body: Incoming,
    cache: Option<Arc<Mutex<BodyCache>>>,
    request: RequestRecord,
    response: ResponseRecord,
    ctx: ConnContext,
    started: Instant,
) -> BoxBody {
    let (tx, rx) = mpsc::channel(8);
    tokio::spawn(async move {
        let mut clean = true;
        while let Some(result) = body.frame().await {
            let forward = match result {
                Ok(frame) => {
                    if let (Some(data), Some(cache)) = (frame.data_ref(), cache.as_ref()) {
                        append_chunk(cache, data, Side::Response).await;
                    }
                    Ok(frame)
                }
                Err(e) => {
                    clean = false;
                    Err(e)
                }
            };
            let failed = forward.is_err();
            if tx.send(forward).await.is_err() {
                clean = false;
                break;
            }
            if failed {
                break;
            }
        }
        if clean {
            finalize_exchange(cache, request, response, &ctx, started).await;
        }
    });
    channel_body(rx)
}

#[derive(Clone, Copy)]
enum Side {
    Request,
    Response,
}

async fn append_chunk(cache: &Arc<Mutex<BodyCache>>, data: &Bytes, side: Side) {
    let mut cache = cache.lock().await;
    let (result, label) = match side {
        Side::Request => (cache.append_request_body(data).await, "request"),
        Side::Response => (cache.append_response_body(data).await, "response"),
    };
    match result {
        Ok(()) => {
            metrics::counter!("proxy_capture_bytes_total", "side" => label)
                .increment(data.len() as u64);
        }
        Err(e) => warn!(side = label, error = %e, "body capture append failed"),
    }
}

/// Finalize both records (body paths set iff that side observed bytes),
/// write the access-log line, and publish the exchange.
async fn finalize_exchange(
    cache: Option<Arc<Mutex<BodyCache>>>,
    mut request: RequestRecord,
    mut response: ResponseRecord,
    ctx: &ConnContext,
    started: Instant,
) {
    if let Some(cache) = cache {
        let cache = cache.lock().await;
        if cache.has_request_data() {
            request.body = Some(cache.request_body_path().to_path_buf());
        }
        if cache.has_response_data() {
            response.body = Some(cache.response_body_path().to_path_buf());
        }
    }

    let elapsed = started.elapsed();
    tracing::info!(
        conn_id = ctx.conn_id,
        peer = %ctx.peer,
        method = %request.method,
        url = %request.url,
        status = response.status_code,
        latency_ms = %elapsed.as_millis(),
        "access"
    );

    let mut buf = itoa::Buffer::new();
    metrics::counter!(
        "proxy_requests_total",
        "kind" => "forward",
        "status_code" => buf.format(response.status_code).to_owned(),
    )
    .increment(1);
    metrics::histogram!("proxy_request_duration_seconds").record(elapsed.as_secs_f64());
    metrics::counter!("proxy_records_published_total").increment(1);

    ctx.records.publish(ExchangeRecord { request, response });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(uri: &str, host: Option<&str>) -> Request<()> {
        let mut builder = Request::builder().method("GET").uri(uri);
        if let Some(h) = host {
            builder = builder.header("host", h);
        }
        builder.body(()).unwrap()
    }

    #[test]
    fn accepts_absolute_http_uri_with_matching_host() {
        let req = request("http://example.test/x?y=1", Some("example.test"));
        let target = validate_target(&req).unwrap();
        assert_eq!(target.authority, "example.test:80");
        assert_eq!(target.origin_form.to_string(), "/x?y=1");
        assert_eq!(target.absolute_url, "http://example.test/x?y=1");
    }

    #[test]
    fn host_header_port_is_ignored_for_comparison() {
        let req = request("http://example.test:8080/", Some("example.test:8080"));
        let target = validate_target(&req).unwrap();
        assert_eq!(target.authority, "example.test:8080");
        assert_eq!(target.origin_form.to_string(), "/");
    }

    #[test]
    fn empty_path_becomes_root() {
        let req = request("http://example.test", Some("example.test"));
        let target = validate_target(&req).unwrap();
        assert_eq!(target.origin_form.to_string(), "/");
    }

    #[test]
    fn rejects_https_scheme() {
        let req = request("https://example.test/", Some("example.test"));
        assert!(validate_target(&req).is_err());
    }

    #[test]
    fn rejects_origin_form_target() {
        let req = request("/just/a/path", Some("example.test"));
        assert!(validate_target(&req).is_err());
    }

    #[test]
    fn rejects_missing_host_header() {
        let req = request("http://example.test/", None);
        assert!(validate_target(&req).is_err());
    }

    #[test]
    fn rejects_host_mismatch() {
        let req = request("http://a.test/", Some("b.test"));
        assert!(validate_target(&req).is_err());
    }

    #[test]
    fn host_part_strips_ports_and_brackets() {
        assert_eq!(host_part("example.test"), "example.test");
        assert_eq!(host_part("example.test:8080"), "example.test");
        assert_eq!(host_part("[::1]:8080"), "::1");
        assert_eq!(host_part("[::1]"), "::1");
    }
}
