//! Observer callbacks a request task reports to

use crate::{Result, response::ResponseMetadata};
use bytes::Bytes;
use std::fmt;

/// Called once when response headers arrive
pub type ResponseObserver = Box<dyn FnMut(&ResponseMetadata) + Send + 'static>;

/// Called on every progress increase with the completed fraction, or `None`
/// when the total size is unknown
pub type ProgressObserver = Box<dyn FnMut(Option<f64>) + Send + 'static>;

/// Called exactly once with the response body or the error that ended the task
pub type CompletionObserver = Box<dyn FnOnce(Result<Bytes>) + Send + 'static>;

/// The four optional observers of a request task
#[derive(Default)]
pub struct Observers {
    pub(crate) response: Option<ResponseObserver>,
    pub(crate) upload_progress: Option<ProgressObserver>,
    pub(crate) download_progress: Option<ProgressObserver>,
    pub(crate) completion: Option<CompletionObserver>,
}

impl Observers {
    /// No observers
    pub fn new() -> Self {
        Self::default()
    }

    /// Observe response headers
    pub fn on_response<F>(mut self, observer: F) -> Self
    where
        F: FnMut(&ResponseMetadata) + Send + 'static,
    {
        self.response = Some(Box::new(observer));
        self
    }

    /// Observe upload progress
    pub fn on_upload_progress<F>(mut self, observer: F) -> Self
    where
        F: FnMut(Option<f64>) + Send + 'static,
    {
        self.upload_progress = Some(Box::new(observer));
        self
    }

    /// Observe download progress
    pub fn on_download_progress<F>(mut self, observer: F) -> Self
    where
        F: FnMut(Option<f64>) + Send + 'static,
    {
        self.download_progress = Some(Box::new(observer));
        self
    }

    /// Observe completion
    pub fn on_completion<F>(mut self, observer: F) -> Self
    where
        F: FnOnce(Result<Bytes>) + Send + 'static,
    {
        self.completion = Some(Box::new(observer));
        self
    }
}

impl fmt::Debug for Observers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Observers")
            .field("response", &self.response.is_some())
            .field("upload_progress", &self.upload_progress.is_some())
            .field("download_progress", &self.download_progress.is_some())
            .field("completion", &self.completion.is_some())
            .finish()
    }
}
