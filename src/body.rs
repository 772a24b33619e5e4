//! Response bodies
//!
//! A [`ResponseBody`] is a finite, single-pass sequence of byte chunks read
//! lazily off the connection. The body of the final response in a chain owns
//! that connection's lease: reaching the end of the body returns the
//! connection to the pool, while an error or an early drop closes it.

use bytes::{Bytes, BytesMut};
use hyper::body::{Body, Frame, Incoming, SizeHint};
use std::pin::Pin;
use std::task::{Context, Poll};
use tracing::trace;

use crate::error::{classify_hyper_error, ClientError};
use crate::pool::Lease;
use crate::transport::HttpConnection;

pub struct ResponseBody {
    inner: Incoming,
    lease: Option<Lease<HttpConnection>>,
    max_size: u64,
}

impl ResponseBody {
    pub(crate) fn new(inner: Incoming, lease: Lease<HttpConnection>, max_size: u64) -> Self {
        let mut body = Self {
            inner,
            lease: Some(lease),
            max_size,
        };
        // Nothing left to read: the connection is free right away
        if body.inner.is_end_stream() {
            body.finish(true);
        }
        body
    }

    /// Whether the body still holds its connection
    pub fn holds_connection(&self) -> bool {
        self.lease.is_some()
    }

    fn finish(&mut self, clean: bool) {
        if let Some(lease) = self.lease.take() {
            if clean {
                lease.release();
            } else {
                trace!("Closing connection to {} after body error", lease.endpoint());
                lease.close();
            }
        }
    }

    /// Next data chunk, or `None` at end of body
    pub async fn chunk(&mut self) -> Result<Option<Bytes>, ClientError> {
        loop {
            match std::future::poll_fn(|cx| Pin::new(&mut *self).poll_frame(cx)).await {
                Some(Ok(frame)) => {
                    if let Ok(data) = frame.into_data() {
                        return Ok(Some(data));
                    }
                }
                Some(Err(e)) => return Err(classify_hyper_error(e)),
                None => return Ok(None),
            }
        }
    }

    /// Aggregate the whole body, enforcing the size limit while streaming
    pub async fn collect_all(mut self) -> Result<Bytes, ClientError> {
        let mut buf = BytesMut::new();

        while let Some(data) = self.chunk().await? {
            // Check size BEFORE adding to buffer
            let new_size = buf.len() + data.len();
            if new_size as u64 > self.max_size {
                self.finish(false);
                return Err(ClientError::BodyTooLarge);
            }
            buf.extend_from_slice(&data);
        }

        Ok(buf.freeze())
    }

    /// Aggregate the body as UTF-8 text
    pub async fn collect_string(self) -> Result<String, ClientError> {
        let bytes = self.collect_all().await?;
        String::from_utf8(bytes.to_vec())
            .map_err(|e| ClientError::Body(format!("invalid UTF-8: {}", e)))
    }
}

impl Body for ResponseBody {
    type Data = Bytes;
    type Error = hyper::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Bytes>, hyper::Error>>> {
        let this = self.get_mut();
        match Pin::new(&mut this.inner).poll_frame(cx) {
            Poll::Ready(None) => {
                this.finish(true);
                Poll::Ready(None)
            }
            Poll::Ready(Some(Err(e))) => {
                this.finish(false);
                Poll::Ready(Some(Err(e)))
            }
            other => other,
        }
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

impl std::fmt::Debug for ResponseBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseBody")
            .field("holds_connection", &self.lease.is_some())
            .field("max_size", &self.max_size)
            .finish()
    }
}

/// Read and discard a redirect body so its connection can carry the next
/// exchange.
///
/// # Errors
///
/// `BodyTooLarge` once more than `limit` bytes were read; the connection
/// should then be closed rather than reused.
pub(crate) async fn drain(mut body: Incoming, limit: u64) -> Result<(), ClientError> {
    use http_body_util::BodyExt;

    let mut read = 0u64;
    while let Some(frame) = body.frame().await {
        let frame = frame.map_err(classify_hyper_error)?;
        if let Some(data) = frame.data_ref() {
            read += data.len() as u64;
            if read > limit {
                return Err(ClientError::BodyTooLarge);
            }
        }
    }
    Ok(())
}
