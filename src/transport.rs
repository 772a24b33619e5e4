//! Connection establishment
//!
//! The pool never touches sockets itself. It asks a [`Connector`] for a new
//! connection and checks [`Poolable::is_open`] before handing an idle one out.
//! [`HttpConnector`] is the production connector: DNS lookup, TCP connect
//! with a per-address fallback, optional rustls handshake and an HTTP/1.1
//! handshake whose connection driver runs on its own task.

use bytes::Bytes;
use http_body_util::Full;
use hyper::client::conn::http1;
use hyper_util::rt::TokioIo;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_rustls::rustls::{ClientConfig, RootCertStore};
use tokio_rustls::TlsConnector;
use tracing::trace;

use crate::endpoint::Endpoint;

/// Per-address connect budget before falling through to the next address
const ADDRESS_ATTEMPT_TIMEOUT: Duration = Duration::from_millis(300);

/// A connection the pool can hold while idle
pub trait Poolable: Send + 'static {
    /// Whether the connection can still carry an exchange
    fn is_open(&self) -> bool;
}

/// Opens new connections to an endpoint
pub trait Connector: Send + Sync + 'static {
    type Connection: Poolable;

    fn connect(
        &self,
        endpoint: &Endpoint,
    ) -> impl Future<Output = Result<Self::Connection, TransportError>> + Send;
}

/// A live HTTP/1.1 client connection
pub struct HttpConnection {
    sender: http1::SendRequest<Full<Bytes>>,
    endpoint: Endpoint,
}

impl HttpConnection {
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub(crate) fn sender_mut(&mut self) -> &mut http1::SendRequest<Full<Bytes>> {
        &mut self.sender
    }
}

impl Poolable for HttpConnection {
    fn is_open(&self) -> bool {
        !self.sender.is_closed()
    }
}

/// Plain TCP / TLS connector speaking HTTP/1.1
#[derive(Clone)]
pub struct HttpConnector {
    connect_timeout: Duration,
    tls: TlsConnector,
}

impl HttpConnector {
    pub fn new(connect_timeout: Duration) -> Self {
        let mut root_store = RootCertStore::empty();
        root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

        let mut config = ClientConfig::builder()
            .with_root_certificates(root_store)
            .with_no_client_auth();
        config.alpn_protocols = vec![b"http/1.1".to_vec()];

        Self {
            connect_timeout,
            tls: TlsConnector::from(Arc::new(config)),
        }
    }

    async fn open(&self, endpoint: &Endpoint) -> Result<HttpConnection, TransportError> {
        let addrs = resolve_host_all(endpoint).await?;

        let (stream, addr) = tokio::time::timeout(self.connect_timeout, connect_any(&addrs))
            .await
            .map_err(|_| TransportError::ConnectTimeout)??;

        stream.set_nodelay(true).ok();
        trace!("Opened connection to {} via {}", endpoint, addr);

        let sender = if endpoint.scheme().is_tls() {
            let domain =
                tokio_rustls::rustls::pki_types::ServerName::try_from(endpoint.host().to_string())
                    .map_err(|_| TransportError::Handshake("invalid DNS name".to_string()))?;

            let tls_stream = self
                .tls
                .connect(domain, stream)
                .await
                .map_err(|e| TransportError::Handshake(format!("TLS handshake failed: {}", e)))?;

            handshake(TokioIo::new(tls_stream)).await?
        } else {
            handshake(TokioIo::new(stream)).await?
        };

        Ok(HttpConnection {
            sender,
            endpoint: endpoint.clone(),
        })
    }
}

impl Connector for HttpConnector {
    type Connection = HttpConnection;

    fn connect(
        &self,
        endpoint: &Endpoint,
    ) -> impl Future<Output = Result<HttpConnection, TransportError>> + Send {
        self.open(endpoint)
    }
}

/// HTTP/1.1 handshake; the connection driver is spawned and lives until the
/// peer closes or the last `SendRequest` handle is dropped.
async fn handshake<T>(io: TokioIo<T>) -> Result<http1::SendRequest<Full<Bytes>>, TransportError>
where
    T: tokio::io::AsyncRead + tokio::io::AsyncWrite + Send + Unpin + 'static,
{
    let (sender, conn) = http1::handshake(io)
        .await
        .map_err(|e| TransportError::Handshake(e.to_string()))?;

    tokio::spawn(async move {
        if let Err(e) = conn.await {
            trace!("Connection closed: {}", e);
        }
    });

    Ok(sender)
}

async fn resolve_host_all(endpoint: &Endpoint) -> Result<Vec<SocketAddr>, TransportError> {
    let addrs: Vec<SocketAddr> = tokio::net::lookup_host(endpoint.socket_addr_str())
        .await
        .map_err(|e| TransportError::Resolve(e.to_string()))?
        .collect();

    if addrs.is_empty() {
        return Err(TransportError::Resolve(format!(
            "no addresses found for {}",
            endpoint.host()
        )));
    }

    Ok(addrs)
}

/// Try each resolved address in order with a short per-address budget
async fn connect_any(addrs: &[SocketAddr]) -> Result<(TcpStream, SocketAddr), TransportError> {
    let mut last_error = None;

    for addr in addrs {
        match tokio::time::timeout(ADDRESS_ATTEMPT_TIMEOUT, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => return Ok((stream, *addr)),
            Ok(Err(e)) => {
                trace!("Failed to connect to {}: {}", addr, e);
                last_error = Some(e.to_string());
            }
            Err(_) => {
                trace!("Timeout connecting to {}", addr);
                last_error = Some(format!("connection timeout to {}", addr));
            }
        }
    }

    Err(TransportError::Connect(
        last_error.unwrap_or_else(|| "all resolved addresses failed".to_string()),
    ))
}

/// I/O level failures. A connection that produced one is never reused.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    #[error("DNS resolution error: {0}")]
    Resolve(String),

    #[error("connection error: {0}")]
    Connect(String),

    #[error("connection timeout")]
    ConnectTimeout,

    #[error("handshake error: {0}")]
    Handshake(String),

    #[error("connection closed: {0}")]
    Closed(String),

    #[error("i/o error: {0}")]
    Io(String),
}
