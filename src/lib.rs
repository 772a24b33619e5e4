//! ferry - HTTP/1.1 client with redirect following over a bounded pool
//!
//! Connections are pooled per endpoint (scheme, host, port), each endpoint
//! with its own fixed capacity. A request that is redirected gives its
//! connection back before the next hop asks for one, so arbitrarily long
//! redirect chains to the same endpoint complete even with a capacity of 1.
//!
//! ```no_run
//! use ferry::{Client, ClientConfig, RequestOptions};
//!
//! # async fn run() -> Result<(), ferry::ClientError> {
//! let client = Client::new(ClientConfig::default())?;
//! let response = client
//!     .get("http://localhost:8080/1", RequestOptions::new().follow_redirects(true))
//!     .await?;
//! println!("{} {}", response.status(), response.text().await?);
//! # Ok(())
//! # }
//! ```

pub mod body;
pub mod client;
pub mod config;
pub mod endpoint;
pub mod error;
pub mod pool;
pub mod redirect;
pub mod request;
pub mod response;
pub mod session;
pub mod transport;

pub use body::ResponseBody;
pub use client::Client;
pub use config::{ClientConfig, OnOff};
pub use endpoint::{Endpoint, Scheme};
pub use error::ClientError;
pub use pool::{ConnectionPool, HostStats, Lease, PoolConfig, PoolError, PoolStats};
pub use redirect::{RedirectAttempt, RedirectPolicy};
pub use request::{RequestOptions, RequestSpec};
pub use response::Response;
pub use transport::{Connector, HttpConnection, HttpConnector, Poolable, TransportError};
