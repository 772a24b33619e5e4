//! Redirect-following HTTP client
//!
//! A call walks its redirect chain one hop at a time. Each hop leases a
//! connection for the hop's endpoint, runs one exchange, and asks the
//! resolver what comes next. The lease of a redirect hop is drained and
//! released *before* the next hop acquires, so a call never holds more than
//! one pool slot. A chain of same-endpoint redirects therefore completes
//! with a partition capacity of 1.
//!
//! The final hop's lease moves into the response body and is released when
//! the body has been read to the end.

use http::{header, HeaderValue, Method};
use hyper::body::Incoming;
use std::sync::Arc;
use tracing::{debug, trace};
use url::Url;

use crate::body::{self, ResponseBody};
use crate::config::ClientConfig;
use crate::endpoint::Endpoint;
use crate::error::ClientError;
use crate::pool::{ConnectionPool, HostStats, Lease, PoolStats};
use crate::redirect::{self, RedirectDecision, RedirectPolicy};
use crate::request::{RequestOptions, RequestSpec};
use crate::response::Response;
use crate::session;
use crate::transport::{HttpConnection, HttpConnector};

/// Upper bound on redirect body bytes read to keep a connection reusable
const MAX_DRAIN_SIZE: u64 = 64 * 1024;

/// HTTP client over a bounded per-endpoint connection pool.
///
/// Cloning is cheap; clones share the pool.
#[derive(Clone)]
pub struct Client {
    pool: Arc<ConnectionPool<HttpConnector>>,
    config: Arc<ClientConfig>,
    base_url: Option<Url>,
    user_agent: HeaderValue,
}

impl Client {
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        let base_url = config
            .base_url
            .as_deref()
            .map(|base| {
                Url::parse(base).map_err(|e| ClientError::InvalidUri(format!("{}: {}", base, e)))
            })
            .transpose()?;
        let user_agent = HeaderValue::from_str(&config.user_agent)
            .map_err(|e| ClientError::Request(format!("invalid user-agent: {}", e)))?;

        let connector = HttpConnector::new(config.connect_timeout());
        let pool = ConnectionPool::new(config.pool_config(), connector);

        Ok(Self {
            pool,
            config: Arc::new(config),
            base_url,
            user_agent,
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub async fn get(&self, uri: &str, options: RequestOptions) -> Result<Response, ClientError> {
        self.request(Method::GET, uri, options).await
    }

    pub async fn post(&self, uri: &str, options: RequestOptions) -> Result<Response, ClientError> {
        self.request(Method::POST, uri, options).await
    }

    /// Issue a request and follow redirects according to `options`.
    ///
    /// Relative URIs are resolved against the configured base URL. The
    /// returned response is the first one that is not followed; its body is
    /// still on the connection.
    ///
    /// # Errors
    ///
    /// Any [`ClientError`]. Whatever hop was in flight when the error
    /// occurred has had its connection closed or released.
    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        options: RequestOptions,
    ) -> Result<Response, ClientError> {
        let RequestOptions {
            redirect,
            redirect_limit,
            headers,
            body,
            timeout,
            cancel,
        } = options;

        let url = self.resolve_uri(uri)?;
        let mut request = RequestSpec::new(method, url);
        request.headers = headers;
        if !request.headers.contains_key(header::USER_AGENT) {
            request
                .headers
                .insert(header::USER_AGENT, self.user_agent.clone());
        }
        request.body = body;

        let policy = redirect.unwrap_or_else(|| {
            if self.config.follow_redirects.is_on() {
                RedirectPolicy::Follow
            } else {
                RedirectPolicy::None
            }
        });
        let limit = redirect_limit.unwrap_or(self.config.redirect_limit);

        let chain = async {
            match timeout {
                Some(deadline) => {
                    let chain = self.execute(request, &policy, limit);
                    match tokio::time::timeout(deadline, chain).await {
                        Ok(result) => result,
                        Err(_) => Err(ClientError::Timeout),
                    }
                }
                None => self.execute(request, &policy, limit).await,
            }
        };

        match cancel {
            Some(token) => tokio::select! {
                biased;
                _ = token.cancelled() => Err(ClientError::Cancelled),
                result = chain => result,
            },
            None => chain.await,
        }
    }

    fn resolve_uri(&self, uri: &str) -> Result<Url, ClientError> {
        let parsed = match Url::parse(uri) {
            Ok(url) => url,
            Err(url::ParseError::RelativeUrlWithoutBase) => {
                let base = self.base_url.as_ref().ok_or_else(|| {
                    ClientError::InvalidUri(format!("relative uri without base-url: {}", uri))
                })?;
                base.join(uri)
                    .map_err(|e| ClientError::InvalidUri(format!("{}: {}", uri, e)))?
            }
            Err(e) => return Err(ClientError::InvalidUri(format!("{}: {}", uri, e))),
        };
        Endpoint::from_url(&parsed)?;
        Ok(parsed)
    }

    /// The hop loop
    async fn execute(
        &self,
        mut request: RequestSpec,
        policy: &RedirectPolicy,
        limit: usize,
    ) -> Result<Response, ClientError> {
        let mut redirects: Vec<Url> = Vec::new();
        let mut endpoint = request.endpoint()?;

        loop {
            let mut lease = self.pool.acquire(&endpoint).await?;

            let response = match self.exchange(&mut lease, &request).await {
                Ok(response) => response,
                Err(e) => {
                    lease.close();
                    return Err(e);
                }
            };

            let status = response.status();
            match redirect::resolve(&request, &response, redirects.len(), policy, limit) {
                Ok(RedirectDecision::Terminal) => {
                    let (parts, body) = response.into_parts();
                    let body = ResponseBody::new(body, lease, self.config.max_body_size);
                    return Ok(Response::new(parts, request.url, redirects, body));
                }
                Ok(RedirectDecision::Follow(next)) => {
                    debug!(
                        "Following {} redirect from {} to {}",
                        status.as_u16(),
                        request.url,
                        next.request.url
                    );
                    self.finish_hop(lease, response.into_body()).await;
                    redirects.push(request.url);
                    request = next.request;
                    endpoint = next.endpoint;
                }
                Err(e) => {
                    self.finish_hop(lease, response.into_body()).await;
                    return Err(e);
                }
            }
        }
    }

    async fn exchange(
        &self,
        lease: &mut Lease<HttpConnection>,
        request: &RequestSpec,
    ) -> Result<http::Response<Incoming>, ClientError> {
        match self.config.io_timeout() {
            Some(limit) => tokio::time::timeout(limit, session::exchange(lease, request))
                .await
                .map_err(|_| ClientError::Timeout)?,
            None => session::exchange(lease, request).await,
        }
    }

    /// Read off a body that is not handed to the caller, then give the
    /// connection back
    async fn finish_hop(&self, lease: Lease<HttpConnection>, body: Incoming) {
        match body::drain(body, MAX_DRAIN_SIZE).await {
            Ok(()) => self.pool.release(lease),
            Err(e) => {
                trace!("Closing connection to {}: {}", lease.endpoint(), e);
                lease.close();
            }
        }
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.pool.stats()
    }

    pub fn host_stats(&self, endpoint: &Endpoint) -> Option<HostStats> {
        self.pool.host_stats(endpoint)
    }

    /// Close all pooled connections; later calls fail with `PoolClosed`
    pub fn dispose(&self) {
        self.pool.dispose();
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("base_url", &self.base_url)
            .field("pool", &self.pool.stats())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client_with_base(base: Option<&str>) -> Client {
        Client::new(ClientConfig {
            base_url: base.map(str::to_string),
            ..ClientConfig::default()
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_resolve_uri_absolute() {
        let client = client_with_base(None);
        let url = client.resolve_uri("http://localhost:9991/3").unwrap();
        assert_eq!(url.as_str(), "http://localhost:9991/3");
    }

    #[tokio::test]
    async fn test_resolve_uri_relative_to_base() {
        let client = client_with_base(Some("http://127.0.0.1:8888/api/"));
        assert_eq!(
            client.resolve_uri("/login").unwrap().as_str(),
            "http://127.0.0.1:8888/login"
        );
        assert_eq!(
            client.resolve_uri("users?id=1").unwrap().as_str(),
            "http://127.0.0.1:8888/api/users?id=1"
        );
    }

    #[tokio::test]
    async fn test_resolve_uri_relative_without_base() {
        let client = client_with_base(None);
        let err = client.resolve_uri("/login").unwrap_err();
        assert!(matches!(err, ClientError::InvalidUri(_)));
    }

    #[tokio::test]
    async fn test_resolve_uri_rejects_other_schemes() {
        let client = client_with_base(None);
        let err = client.resolve_uri("ftp://files.example.com/a").unwrap_err();
        assert!(matches!(err, ClientError::InvalidUri(_)));
    }

    #[tokio::test]
    async fn test_new_rejects_bad_base_url() {
        let result = Client::new(ClientConfig {
            base_url: Some("::not a url".to_string()),
            ..ClientConfig::default()
        });
        assert!(matches!(result, Err(ClientError::InvalidUri(_))));
    }

    #[tokio::test]
    async fn test_new_rejects_bad_user_agent() {
        let result = Client::new(ClientConfig {
            user_agent: "bad\nagent".to_string(),
            ..ClientConfig::default()
        });
        assert!(matches!(result, Err(ClientError::Request(_))));
    }

    #[tokio::test]
    async fn test_disposed_client_fails_fast() {
        let client = client_with_base(None);
        client.dispose();
        let err = client
            .get("http://127.0.0.1:1/", RequestOptions::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::PoolClosed));
    }
}
