use crate::proxy::context::{empty_body, BoxBody, ConnContext};
use crate::proxy::{forward, tunnel};
use hyper::body::Incoming;
use hyper::{header, Method, Request, Response, StatusCode};
use tracing::warn;

/// Classify the first parsed request and hand it to the matching engine.
///
/// hyper owns the byte-to-message decoding, so anything that reaches this
/// point is a well-formed request head; unparseable input is answered by
/// the codec itself. Engine failures that happen while the client still
/// speaks HTTP collapse to the single `400` responder below; later
/// failures abort the connection so the close propagates to the peer.
pub async fn route_request(
    req: Request<Incoming>,
    ctx: ConnContext,
) -> Result<Response<BoxBody>, anyhow::Error> {
    tracing::info!(
        conn_id = ctx.conn_id,
        peer = %ctx.peer,
        method = %req.method(),
        uri = %req.uri(),
        "request"
    );

    let kind = if req.method() == Method::CONNECT {
        "tunnel"
    } else {
        "forward"
    };

    let result = if req.method() == Method::CONNECT {
        tunnel::run(req, ctx).await
    } else {
        forward::run(req, ctx).await
    };

    match result {
        Ok(resp) => Ok(resp),
        Err(e) if e.wants_bad_request() => {
            warn!(kind, error = %e, "rejecting request");
            metrics::counter!("proxy_requests_total", "kind" => kind, "status_code" => "400")
                .increment(1);
            Ok(bad_request())
        }
        Err(e) => {
            warn!(kind, error = %e, "closing connection");
            Err(anyhow::Error::new(e))
        }
    }
}

/// The one error response the proxy ever writes:
/// `400 Bad Request`, empty body, connection closed afterwards.
pub fn bad_request() -> Response<BoxBody> {
    Response::builder()
        .status(StatusCode::BAD_REQUEST)
        .header(header::CONTENT_LENGTH, "0")
        .header(header::CONNECTION, "close")
        .body(empty_body())
        .expect("static response")
}
