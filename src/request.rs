//! Request descriptions
//!
//! [`RequestSpec`] is one hop's request: what the session writes on the wire.
//! [`RequestOptions`] is what a caller passes to [`crate::Client::request`].

use bytes::Bytes;
use http::{HeaderMap, HeaderName, HeaderValue, Method};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::endpoint::Endpoint;
use crate::error::ClientError;
use crate::redirect::RedirectPolicy;

/// A single request addressed to an absolute URL
#[derive(Debug, Clone)]
pub struct RequestSpec {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
}

impl RequestSpec {
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            headers: HeaderMap::new(),
            body: None,
        }
    }

    pub fn endpoint(&self) -> Result<Endpoint, ClientError> {
        Ok(Endpoint::from_url(&self.url)?)
    }

    /// Origin-form request target: path plus query
    pub fn target(&self) -> String {
        match self.url.query() {
            Some(query) => format!("{}?{}", self.url.path(), query),
            None => self.url.path().to_string(),
        }
    }
}

/// Per-call options
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    /// Redirect handling; the client default applies when unset
    pub redirect: Option<RedirectPolicy>,
    /// Maximum redirects followed; the client default applies when unset
    pub redirect_limit: Option<usize>,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
    /// Deadline for the whole redirect chain up to the final response head
    pub timeout: Option<Duration>,
    pub cancel: Option<CancellationToken>,
}

impl RequestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn follow_redirects(mut self, follow: bool) -> Self {
        self.redirect = Some(if follow {
            RedirectPolicy::Follow
        } else {
            RedirectPolicy::None
        });
        self
    }

    pub fn redirect_policy(mut self, policy: RedirectPolicy) -> Self {
        self.redirect = Some(policy);
        self
    }

    pub fn redirect_limit(mut self, limit: usize) -> Self {
        self.redirect_limit = Some(limit);
        self
    }

    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.append(name, value);
        self
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }
}
