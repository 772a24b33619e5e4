//! One request/response exchange over a leased connection
//!
//! The session writes the request and returns as soon as the status line and
//! headers are in; the body stays on the connection. It never gives the lease
//! back. It only flags the lease closed when the connection cannot carry
//! another exchange, and the caller decides when to release.

use bytes::Bytes;
use http::{header, HeaderValue, Request, Response, Version};
use http_body_util::Full;
use hyper::body::Incoming;
use tracing::trace;

use crate::error::{classify_hyper_error, ClientError};
use crate::pool::Lease;
use crate::request::RequestSpec;
use crate::transport::{HttpConnection, TransportError};

/// Run one exchange on `lease`
pub async fn exchange(
    lease: &mut Lease<HttpConnection>,
    request: &RequestSpec,
) -> Result<Response<Incoming>, ClientError> {
    let wire_request = build_request(lease, request)?;

    // A reused connection may still be finishing the previous message
    if let Err(e) = lease.connection_mut().sender_mut().ready().await {
        lease.mark_closed();
        return Err(ClientError::Transport(TransportError::Closed(e.to_string())));
    }

    trace!(
        "{} {} on {} (reused: {})",
        request.method,
        request.url,
        lease.endpoint(),
        lease.is_reused()
    );

    let response = match lease
        .connection_mut()
        .sender_mut()
        .send_request(wire_request)
        .await
    {
        Ok(response) => response,
        Err(e) => {
            lease.mark_closed();
            return Err(classify_hyper_error(e));
        }
    };

    if !keeps_alive(&response) {
        lease.mark_closed();
    }

    Ok(response)
}

fn build_request(
    lease: &Lease<HttpConnection>,
    request: &RequestSpec,
) -> Result<Request<Full<Bytes>>, ClientError> {
    let mut builder = Request::builder()
        .method(request.method.clone())
        .uri(request.target())
        .version(Version::HTTP_11);

    let headers = builder
        .headers_mut()
        .ok_or_else(|| ClientError::Request("invalid request target".to_string()))?;
    for (name, value) in request.headers.iter() {
        headers.append(name.clone(), value.clone());
    }

    let host = HeaderValue::from_str(&lease.endpoint().authority())
        .map_err(|e| ClientError::Request(format!("invalid host header: {}", e)))?;
    headers.insert(header::HOST, host);

    builder
        .body(Full::new(request.body.clone().unwrap_or_default()))
        .map_err(|e| ClientError::Request(e.to_string()))
}

/// Whether the peer allows the connection to be reused after this response
fn keeps_alive<B>(response: &Response<B>) -> bool {
    let connection_tokens = response
        .headers()
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(|token| token.trim().to_ascii_lowercase())
        .collect::<Vec<_>>();

    if connection_tokens.iter().any(|t| t == "close") {
        return false;
    }
    if response.version() == Version::HTTP_10 {
        return connection_tokens.iter().any(|t| t == "keep-alive");
    }
    true
}
