//! Observable asynchronous HTTP request tasks
//!
//! A [`RequestTask`] wraps one outbound request, hands it to a [`Transport`]
//! and reports what happens through optional observers: response headers,
//! upload and download progress, and a single completion callback. Tasks can
//! be cancelled at any time and can run as resumable background transfers.
//!
//! The crate ships [`ReqwestTransport`] (feature `backend-reqwest`, on by
//! default); any other network stack can be plugged in by implementing
//! [`Transport`].

#![cfg_attr(docsrs, feature(doc_cfg))]
#![deny(missing_docs)]

pub use backend::types::{Direction, Submission, TransportEvents, TransportHandle};
pub use backend::{ProxyConfig, Transport, TransportConfig};
pub use background::{
    BackgroundCompletion, BackgroundCompletionHandler, background_session_files_directory,
};
pub use body::Body;
pub use cache::{CachedResponse, DEFAULT_CACHE_CAPACITY, Fingerprint, ResponseCache};
pub use error::{Error, ErrorKind, Result};
pub use request::{Request, RequestBuilder};
pub use response::ResponseMetadata;
pub use resume::{RESUME_DATA_VERSION, ResumeData};
pub use task::{
    CompletionObserver, Observers, ProgressObserver, RequestTask, ResponseObserver, TaskBuilder,
    TaskOptions, TaskState,
};

#[cfg(feature = "backend-reqwest")]
#[cfg_attr(docsrs, doc(cfg(feature = "backend-reqwest")))]
pub use backend::reqwest::{ReqwestTransport, ReqwestTransportBuilder};

// Re-export the HTTP types used in the public API
pub use http;
pub use url::Url;

mod backend;
mod background;
mod body;
mod cache;
mod error;
mod request;
mod response;
mod resume;
mod task;
