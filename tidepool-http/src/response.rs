//! HTTP response model.

use bytes::Bytes;
use http::{HeaderMap, StatusCode, Version};

/// A fully received HTTP response: status, headers, body.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    status: StatusCode,
    version: Version,
    headers: HeaderMap,
    body: Bytes,
}

impl HttpResponse {
    pub(crate) fn new(
        status: StatusCode,
        version: Version,
        headers: HeaderMap,
        body: Bytes,
    ) -> Self {
        Self {
            status,
            version,
            headers,
            body,
        }
    }

    /// The response status code.
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// The HTTP version the server answered with.
    pub fn version(&self) -> Version {
        self.version
    }

    /// The response headers.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// The response body.
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Consume the response, returning the body.
    pub fn into_body(self) -> Bytes {
        self.body
    }
}
