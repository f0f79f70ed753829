//! HTTP request model and builder.
//!
//! The builder only constructs requests with an absolute http/https URL
//! carrying a host; the dispatcher relies on that guarantee when it
//! resolves and dials.

use bytes::Bytes;
use http::header::{HeaderName, HeaderValue};
use http::{HeaderMap, Method};
use url::Url;

use crate::error::HttpError;

/// An outbound HTTP request: method, absolute URL, headers, body.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    method: Method,
    url: Url,
    host: String,
    port: u16,
    headers: HeaderMap,
    body: Bytes,
}

impl HttpRequest {
    /// Start building a GET request.
    pub fn get(url: &str) -> Result<HttpRequestBuilder, HttpError> {
        HttpRequestBuilder::new(Method::GET, url)
    }

    /// Start building a POST request.
    pub fn post(url: &str) -> Result<HttpRequestBuilder, HttpError> {
        HttpRequestBuilder::new(Method::POST, url)
    }

    /// Start building a PUT request.
    pub fn put(url: &str) -> Result<HttpRequestBuilder, HttpError> {
        HttpRequestBuilder::new(Method::PUT, url)
    }

    /// Start building a DELETE request.
    pub fn delete(url: &str) -> Result<HttpRequestBuilder, HttpError> {
        HttpRequestBuilder::new(Method::DELETE, url)
    }

    /// Start building a HEAD request.
    pub fn head(url: &str) -> Result<HttpRequestBuilder, HttpError> {
        HttpRequestBuilder::new(Method::HEAD, url)
    }

    /// Start building a request with an arbitrary method.
    pub fn builder(method: Method, url: &str) -> Result<HttpRequestBuilder, HttpError> {
        HttpRequestBuilder::new(method, url)
    }

    /// The request method.
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// The absolute request URL.
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// The target hostname. Always present.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// The target port (explicit, or the scheme default).
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Whether this request uses the https scheme.
    pub fn is_https(&self) -> bool {
        self.url.scheme() == "https"
    }

    /// The request headers.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// The request body.
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Path plus query string, as written on the request line.
    pub fn path_and_query(&self) -> String {
        match self.url.query() {
            Some(query) => format!("{}?{}", self.url.path(), query),
            None => self.url.path().to_string(),
        }
    }
}

/// Builder for [`HttpRequest`].
#[derive(Debug)]
pub struct HttpRequestBuilder {
    method: Method,
    url: Url,
    host: String,
    port: u16,
    headers: HeaderMap,
    body: Bytes,
}

impl HttpRequestBuilder {
    fn new(method: Method, url: &str) -> Result<Self, HttpError> {
        let parsed = Url::parse(url).map_err(|e| HttpError::InvalidUrl {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

        match parsed.scheme() {
            "http" | "https" => {}
            other => {
                return Err(HttpError::InvalidUrl {
                    url: url.to_string(),
                    reason: format!("unsupported scheme {:?}", other),
                })
            }
        }

        let host = match parsed.host_str() {
            Some(host) => host.to_string(),
            None => {
                return Err(HttpError::InvalidUrl {
                    url: url.to_string(),
                    reason: "missing host".to_string(),
                })
            }
        };

        let default_port = if parsed.scheme() == "https" { 443 } else { 80 };
        let port = parsed.port().unwrap_or(default_port);

        Ok(Self {
            method,
            url: parsed,
            host,
            port,
            headers: HeaderMap::new(),
            body: Bytes::new(),
        })
    }

    /// Append a header.
    pub fn with_header(mut self, name: &str, value: &str) -> Result<Self, HttpError> {
        let name = HeaderName::try_from(name).map_err(|e| HttpError::InvalidHeader {
            reason: e.to_string(),
        })?;
        let value = HeaderValue::try_from(value).map_err(|e| HttpError::InvalidHeader {
            reason: e.to_string(),
        })?;
        self.headers.append(name, value);
        Ok(self)
    }

    /// Set the request body.
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Finish building the request.
    pub fn build(self) -> HttpRequest {
        HttpRequest {
            method: self.method,
            url: self.url,
            host: self.host,
            port: self.port,
            headers: self.headers,
            body: self.body,
        }
    }
}
