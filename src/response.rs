//! Final response of a redirect chain

use bytes::Bytes;
use http::{HeaderMap, StatusCode, Version};
use url::Url;

use crate::body::ResponseBody;
use crate::error::ClientError;

#[derive(Debug)]
pub struct Response {
    status: StatusCode,
    version: Version,
    headers: HeaderMap,
    url: Url,
    redirects: Vec<Url>,
    body: ResponseBody,
}

impl Response {
    pub(crate) fn new(
        parts: http::response::Parts,
        url: Url,
        redirects: Vec<Url>,
        body: ResponseBody,
    ) -> Self {
        Self {
            status: parts.status,
            version: parts.version,
            headers: parts.headers,
            url,
            redirects,
            body,
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// URL the final response was served from
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// URLs that answered with a followed redirect, in order
    pub fn redirects(&self) -> &[Url] {
        &self.redirects
    }

    pub fn into_body(self) -> ResponseBody {
        self.body
    }

    pub async fn collect_all(self) -> Result<Bytes, ClientError> {
        self.body.collect_all().await
    }

    pub async fn text(self) -> Result<String, ClientError> {
        self.body.collect_string().await
    }
}
