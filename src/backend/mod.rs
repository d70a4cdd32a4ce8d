//! Transport abstraction the request task drives

pub mod types;

#[cfg(feature = "backend-reqwest")]
pub mod reqwest;

use crate::Result;
use crate::cache::{CachedResponse, Fingerprint};
use crate::resume::ResumeData;
use std::path::PathBuf;
use std::time::Duration;
use types::{Submission, TransportHandle};

/// Network transport performing the actual I/O for request tasks
pub trait Transport: Send + Sync {
    /// Begin performing a request.
    ///
    /// Events are reported through `submission.events`. An `Err` here means
    /// nothing was started and no events will follow.
    fn submit(&self, submission: Submission) -> Result<TransportHandle>;

    /// Ask the transport to abort a submission. Events arriving afterwards are ignored.
    fn cancel(&self, handle: &TransportHandle);

    /// Previously stored response for a request fingerprint
    fn lookup_cache(&self, fingerprint: &Fingerprint) -> Option<CachedResponse> {
        let _ = fingerprint;
        None
    }

    /// Directory used to stage background transfer payloads
    fn staging_directory(&self) -> PathBuf {
        crate::background::background_session_files_directory().to_path_buf()
    }

    /// Resume data for an interrupted background submission
    fn resume_data(&self, handle: &TransportHandle) -> Option<ResumeData> {
        let _ = handle;
        None
    }
}

/// Proxy server settings
#[derive(Clone, Debug)]
pub struct ProxyConfig {
    /// Proxy host
    pub host: String,
    /// Proxy port
    pub port: u16,
    /// Optional username
    pub username: Option<String>,
    /// Optional password
    pub password: Option<String>,
}

impl ProxyConfig {
    /// Proxy without authentication
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            username: None,
            password: None,
        }
    }

    /// Add basic authentication
    pub fn with_auth(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }
}

/// Configuration for transport creation
#[derive(Clone, Debug, Default)]
pub struct TransportConfig {
    /// Request timeout, overridden by a request's own timeout
    pub timeout: Option<Duration>,
    /// User agent string
    pub user_agent: Option<String>,
    /// Default headers to add to all requests
    pub default_headers: Option<http::HeaderMap>,
    /// HTTP proxy configuration
    pub http_proxy: Option<ProxyConfig>,
    /// HTTPS proxy configuration
    pub https_proxy: Option<ProxyConfig>,
    /// Deliver non-2xx responses as `Error::Status` instead of a successful body
    pub error_for_status: bool,
    /// Store successful `GET` responses and answer cache lookups from them
    pub use_cache: bool,
    /// Most responses to keep; defaults to
    /// [`DEFAULT_CACHE_CAPACITY`](crate::DEFAULT_CACHE_CAPACITY)
    pub cache_capacity: Option<usize>,
    /// Directory for staged background payloads; defaults to
    /// [`background_session_files_directory`](crate::background_session_files_directory)
    pub staging_directory: Option<PathBuf>,
}
