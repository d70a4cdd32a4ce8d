//! Response metadata delivered when headers arrive

use http::{HeaderMap, StatusCode};
use url::Url;

/// Status line and headers of an HTTP response
#[derive(Debug, Clone)]
pub struct ResponseMetadata {
    status: StatusCode,
    headers: HeaderMap,
    url: Url,
    expected_content_length: Option<u64>,
}

impl ResponseMetadata {
    /// Build response metadata; the expected length is read from `Content-Length`
    pub fn new(status: StatusCode, headers: HeaderMap, url: Url) -> Self {
        let expected_content_length = headers
            .get(http::header::CONTENT_LENGTH)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.trim().parse().ok());

        Self {
            status,
            headers,
            url,
            expected_content_length,
        }
    }

    /// Override the expected content length, e.g. when the transport decodes the body
    pub fn with_expected_content_length(mut self, length: Option<u64>) -> Self {
        self.expected_content_length = length;
        self
    }

    /// Get the response status code
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Check if the response status indicates success (2xx)
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Check if the response status indicates a client error (4xx)
    pub fn is_client_error(&self) -> bool {
        self.status.is_client_error()
    }

    /// Check if the response status indicates a server error (5xx)
    pub fn is_server_error(&self) -> bool {
        self.status.is_server_error()
    }

    /// Get all headers
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Get a header value as a string
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|value| value.to_str().ok())
    }

    /// Get the MIME type
    pub fn content_type(&self) -> Option<&str> {
        self.header(http::header::CONTENT_TYPE.as_str())
    }

    /// Final URL of the response after redirects
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Body length announced by the server, if any
    pub fn expected_content_length(&self) -> Option<u64> {
        self.expected_content_length
    }
}
