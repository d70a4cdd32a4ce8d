//! Request descriptor and builder

use crate::cache::Fingerprint;
use crate::{Error, Result, body::Body};
use http::{HeaderMap, HeaderName, HeaderValue, Method};
use std::time::Duration;
use url::Url;

/// Immutable description of one outbound HTTP request
#[derive(Debug, Clone)]
pub struct Request {
    method: Method,
    url: Url,
    headers: HeaderMap,
    body: Option<Body>,
    timeout: Option<Duration>,
}

impl Request {
    /// Create a request with no headers or body
    pub fn new(method: Method, url: &str) -> Result<Self> {
        Ok(Self {
            method,
            url: parse_absolute_url(url)?,
            headers: HeaderMap::new(),
            body: None,
            timeout: None,
        })
    }

    /// Start building a request
    pub fn builder(method: Method, url: &str) -> Result<RequestBuilder> {
        Ok(RequestBuilder {
            request: Self::new(method, url)?,
        })
    }

    /// Shorthand for a `GET` request builder
    pub fn get(url: &str) -> Result<RequestBuilder> {
        Self::builder(Method::GET, url)
    }

    /// Shorthand for a `POST` request builder
    pub fn post(url: &str) -> Result<RequestBuilder> {
        Self::builder(Method::POST, url)
    }

    /// Shorthand for a `PUT` request builder
    pub fn put(url: &str) -> Result<RequestBuilder> {
        Self::builder(Method::PUT, url)
    }

    /// Shorthand for a `DELETE` request builder
    pub fn delete(url: &str) -> Result<RequestBuilder> {
        Self::builder(Method::DELETE, url)
    }

    /// HTTP method
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Absolute request URL
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Request headers
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Request body, if any
    pub fn body(&self) -> Option<&Body> {
        self.body.as_ref()
    }

    /// Per-request timeout handed through to the transport
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Cache key for this request
    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint::of(self)
    }

    /// Headers with the body's content type filled in when the caller did not set one
    pub fn effective_headers(&self) -> HeaderMap {
        let mut headers = self.headers.clone();
        if let Some(content_type) = self.body.as_ref().and_then(Body::content_type) {
            if !headers.contains_key(http::header::CONTENT_TYPE) {
                if let Ok(value) = HeaderValue::from_str(content_type) {
                    headers.insert(http::header::CONTENT_TYPE, value);
                }
            }
        }
        headers
    }
}

/// Request builder
#[derive(Debug, Clone)]
pub struct RequestBuilder {
    request: Request,
}

impl RequestBuilder {
    /// Add a header
    pub fn header(
        mut self,
        name: impl TryInto<HeaderName>,
        value: impl AsRef<str>,
    ) -> Result<Self> {
        let name = name.try_into().map_err(|_| Error::InvalidHeader)?;
        let value = HeaderValue::from_str(value.as_ref()).map_err(|_| Error::InvalidHeader)?;
        self.request.headers.append(name, value);
        Ok(self)
    }

    /// Replace all headers
    pub fn headers(mut self, headers: HeaderMap) -> Self {
        self.request.headers = headers;
        self
    }

    /// Set the request body
    pub fn body(mut self, body: impl Into<Body>) -> Self {
        self.request.body = Some(body.into());
        self
    }

    /// Set a text body
    pub fn text(self, content: impl Into<String>) -> Self {
        self.body(Body::text(content))
    }

    /// Set a JSON body
    pub fn json(self, value: impl serde::Serialize) -> Result<Self> {
        Ok(self.body(Body::json(value)?))
    }

    /// Set a form body
    pub fn form<K, V>(self, fields: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: AsRef<str>,
        V: AsRef<str>,
    {
        self.body(Body::form(fields))
    }

    /// Set a timeout for this request only
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.request.timeout = Some(timeout);
        self
    }

    /// Finish building
    pub fn build(self) -> Request {
        self.request
    }
}

fn parse_absolute_url(url: &str) -> Result<Url> {
    let parsed = Url::parse(url).map_err(|_| Error::InvalidUrl)?;
    match parsed.scheme() {
        "http" | "https" if parsed.has_host() => Ok(parsed),
        _ => Err(Error::InvalidUrl),
    }
}
