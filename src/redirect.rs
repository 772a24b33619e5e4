//! Redirect resolution
//!
//! [`resolve`] looks at one response and decides whether the chain stops
//! there or continues with a new request. It holds no state; the driver in
//! [`crate::client`] carries the hop count between calls.
//!
//! Followed statuses are 301, 302, 303, 307 and 308. Other 3xx codes (300
//! multiple choices, 304 not modified, 305/306) are returned to the caller.
//!
//! Method and body carry-over:
//! - 303 rewrites everything but HEAD to GET and drops the body
//! - 301 and 302 rewrite non-GET/HEAD requests to GET and drop the body
//! - 307 and 308 keep method and body
//!
//! Credentials are dropped when the redirect leaves the original host.

use http::header::{self, HeaderMap};
use http::{Method, Response, StatusCode};
use std::fmt;
use std::sync::Arc;
use tracing::warn;
use url::Url;

use crate::endpoint::Endpoint;
use crate::error::ClientError;
use crate::request::RequestSpec;

/// Headers that describe a request body
const BODY_HEADERS: &[&str] = &[
    "content-length",
    "content-type",
    "content-encoding",
    "transfer-encoding",
];

/// Headers carrying credentials for the original host
const SENSITIVE_HEADERS: &[&str] = &["authorization", "cookie", "proxy-authorization"];

/// What a custom redirect predicate gets to look at
#[derive(Debug)]
pub struct RedirectAttempt<'a> {
    pub status: StatusCode,
    pub previous: &'a Url,
    pub next: &'a Url,
    /// Redirects already followed in this chain
    pub hops: usize,
}

type RedirectPredicate = dyn Fn(&RedirectAttempt<'_>) -> bool + Send + Sync;

/// Whether and which redirects to follow
#[derive(Clone, Default)]
pub enum RedirectPolicy {
    /// Return redirect responses as-is
    #[default]
    None,
    /// Follow every eligible redirect up to the hop limit
    Follow,
    /// Follow eligible redirects the predicate accepts
    Custom(Arc<RedirectPredicate>),
}

impl RedirectPolicy {
    pub fn custom<F>(predicate: F) -> Self
    where
        F: Fn(&RedirectAttempt<'_>) -> bool + Send + Sync + 'static,
    {
        RedirectPolicy::Custom(Arc::new(predicate))
    }

    pub fn is_enabled(&self) -> bool {
        !matches!(self, RedirectPolicy::None)
    }
}

impl fmt::Debug for RedirectPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RedirectPolicy::None => f.write_str("None"),
            RedirectPolicy::Follow => f.write_str("Follow"),
            RedirectPolicy::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

/// The next hop of a chain
#[derive(Debug, Clone)]
pub struct NextHop {
    pub request: RequestSpec,
    pub endpoint: Endpoint,
}

/// Outcome of looking at one response
#[derive(Debug, Clone)]
pub enum RedirectDecision {
    /// The response is the final one
    Terminal,
    Follow(NextHop),
}

pub fn is_redirect_status(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::MOVED_PERMANENTLY
            | StatusCode::FOUND
            | StatusCode::SEE_OTHER
            | StatusCode::TEMPORARY_REDIRECT
            | StatusCode::PERMANENT_REDIRECT
    )
}

/// Decide what follows `response`, given that `hop_count` redirects have
/// already been followed for this call.
///
/// # Errors
///
/// `TooManyRedirects` when following would exceed `limit`, `InvalidLocation`
/// when the location header cannot be resolved to an http(s) URL.
pub fn resolve<B>(
    request: &RequestSpec,
    response: &Response<B>,
    hop_count: usize,
    policy: &RedirectPolicy,
    limit: usize,
) -> Result<RedirectDecision, ClientError> {
    let status = response.status();
    if !is_redirect_status(status) || !policy.is_enabled() {
        return Ok(RedirectDecision::Terminal);
    }

    let Some(location) = response.headers().get(header::LOCATION) else {
        warn!(
            "Redirect status {} for {} but no Location header",
            status.as_u16(),
            request.url
        );
        return Ok(RedirectDecision::Terminal);
    };
    let location = location
        .to_str()
        .map_err(|_| ClientError::InvalidLocation("location is not valid UTF-8".to_string()))?;

    let next_url = resolve_location(&request.url, location)?;
    let endpoint = Endpoint::from_url(&next_url)
        .map_err(|e| ClientError::InvalidLocation(e.to_string()))?;

    if let RedirectPolicy::Custom(predicate) = policy {
        let attempt = RedirectAttempt {
            status,
            previous: &request.url,
            next: &next_url,
            hops: hop_count,
        };
        if !predicate(&attempt) {
            return Ok(RedirectDecision::Terminal);
        }
    }

    let hops = hop_count + 1;
    if hops > limit {
        return Err(ClientError::TooManyRedirects {
            limit,
            location: next_url.to_string(),
        });
    }

    let request = build_followup_request(request, status, next_url);
    Ok(RedirectDecision::Follow(NextHop { request, endpoint }))
}

/// Resolve a location value against the URL of the request that produced it.
///
/// Handles absolute URLs, scheme-relative and absolute-path references, and
/// relative paths (resolved against the base path's directory). Fragments
/// are dropped since they are never sent.
pub fn resolve_location(base: &Url, location: &str) -> Result<Url, ClientError> {
    let location = location.trim();
    if location.is_empty() {
        return Err(ClientError::InvalidLocation("empty location".to_string()));
    }

    let mut url = base
        .join(location)
        .map_err(|e| ClientError::InvalidLocation(format!("{}: {}", location, e)))?;
    url.set_fragment(None);
    Ok(url)
}

/// Build the request for the next hop from the one that was redirected
pub fn build_followup_request(
    original: &RequestSpec,
    status: StatusCode,
    next: Url,
) -> RequestSpec {
    let (method, keep_body) = followup_method(status, &original.method);

    let mut headers = original.headers.clone();
    headers.remove(header::HOST);
    if !keep_body {
        for name in BODY_HEADERS {
            headers.remove(*name);
        }
    }
    strip_sensitive_headers_for_redirect(&mut headers, &original.url, &next);

    RequestSpec {
        method,
        url: next,
        headers,
        body: if keep_body { original.body.clone() } else { None },
    }
}

fn followup_method(status: StatusCode, method: &Method) -> (Method, bool) {
    match status {
        StatusCode::TEMPORARY_REDIRECT | StatusCode::PERMANENT_REDIRECT => (method.clone(), true),
        StatusCode::SEE_OTHER if *method != Method::HEAD => (Method::GET, false),
        _ if *method == Method::GET || *method == Method::HEAD => (method.clone(), false),
        _ => (Method::GET, false),
    }
}

/// Drop credentials when the redirect changes host or downgrades to plain http
pub fn strip_sensitive_headers_for_redirect(headers: &mut HeaderMap, from: &Url, to: &Url) {
    let same_host = from.host_str() == to.host_str();
    let downgrade = from.scheme() == "https" && to.scheme() != "https";
    if !same_host || downgrade {
        for name in SENSITIVE_HEADERS {
            headers.remove(*name);
        }
    }
}
