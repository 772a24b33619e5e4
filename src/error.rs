//! Client errors
//!
//! Everything a call to [`crate::Client::request`] can fail with. Nothing here
//! is retried inside the client.

use std::time::Duration;

use crate::endpoint::EndpointError;
use crate::pool::PoolError;
use crate::transport::TransportError;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("invalid uri: {0}")]
    InvalidUri(String),

    #[error("invalid request: {0}")]
    Request(String),

    #[error("invalid redirect location: {0}")]
    InvalidLocation(String),

    /// I/O failure; the connection it happened on is closed
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Malformed response; the connection it came from is closed
    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("too many redirects: limit of {limit} exceeded at {location}")]
    TooManyRedirects { limit: usize, location: String },

    #[error("timeout waiting for connection pool slot after {0:?}")]
    PoolExhaustedTimeout(Duration),

    #[error("connection pool closed")]
    PoolClosed,

    #[error("request timeout")]
    Timeout,

    #[error("request cancelled")]
    Cancelled,

    /// Body bytes arrived intact but could not be decoded as asked
    #[error("body error: {0}")]
    Body(String),

    #[error("response body too large")]
    BodyTooLarge,
}

impl ClientError {
    /// Whether the error came from the connection rather than the caller or
    /// the redirect chain
    pub fn is_connection_failure(&self) -> bool {
        matches!(self, ClientError::Transport(_) | ClientError::Protocol(_))
    }
}

impl From<PoolError> for ClientError {
    fn from(err: PoolError) -> Self {
        match err {
            PoolError::AcquireTimeout(limit) => ClientError::PoolExhaustedTimeout(limit),
            PoolError::Closed => ClientError::PoolClosed,
            PoolError::Connect(e) => ClientError::Transport(e),
        }
    }
}

impl From<EndpointError> for ClientError {
    fn from(err: EndpointError) -> Self {
        ClientError::InvalidUri(err.to_string())
    }
}

/// Split hyper errors into malformed-response and I/O failures
pub(crate) fn classify_hyper_error(err: hyper::Error) -> ClientError {
    if err.is_parse() || err.is_parse_status() || is_malformed_body(&err) {
        ClientError::Protocol(err.to_string())
    } else if err.is_closed() || err.is_incomplete_message() || err.is_canceled() {
        ClientError::Transport(TransportError::Closed(err.to_string()))
    } else {
        ClientError::Transport(TransportError::Io(err.to_string()))
    }
}

/// Body framing errors (bad chunk sizes and the like) surface as invalid
/// input from the decoder
fn is_malformed_body(err: &hyper::Error) -> bool {
    std::error::Error::source(err)
        .and_then(|source| source.downcast_ref::<std::io::Error>())
        .is_some_and(|io| {
            matches!(
                io.kind(),
                std::io::ErrorKind::InvalidInput | std::io::ErrorKind::InvalidData
            )
        })
}
