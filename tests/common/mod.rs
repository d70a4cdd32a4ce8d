//! Shared helpers for integration tests

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use urltask::http::{HeaderMap, StatusCode};
use urltask::{
    CachedResponse, Error, Fingerprint, Request, ResponseCache, ResponseMetadata, Result,
    ResumeData, Submission, Transport, TransportEvents, TransportHandle,
};

/// What the mock transport saw for one submission
pub struct Recorded {
    pub request: Request,
    pub background: bool,
    pub resume_data: Option<ResumeData>,
    pub events: Arc<dyn TransportEvents>,
    pub handle: TransportHandle,
}

/// Transport that records submissions and lets the test drive events by hand
#[derive(Default)]
pub struct MockTransport {
    submissions: Mutex<Vec<Recorded>>,
    cancelled: Mutex<Vec<TransportHandle>>,
    submit_error: Mutex<Option<Error>>,
    resume_data: Mutex<Option<ResumeData>>,
    staging: Mutex<Option<PathBuf>>,
    pub cache: ResponseCache,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make the next `submit` fail with `error`
    pub fn fail_next_submit(&self, error: Error) {
        *self.submit_error.lock().unwrap() = Some(error);
    }

    /// Resume data to hand out for any handle
    pub fn set_resume_data(&self, resume_data: ResumeData) {
        *self.resume_data.lock().unwrap() = Some(resume_data);
    }

    /// Stage background transfers in `directory` instead of the shared location
    pub fn set_staging_directory(&self, directory: impl Into<PathBuf>) {
        *self.staging.lock().unwrap() = Some(directory.into());
    }

    pub fn submit_count(&self) -> usize {
        self.submissions.lock().unwrap().len()
    }

    pub fn cancel_count(&self) -> usize {
        self.cancelled.lock().unwrap().len()
    }

    /// Event sink of the `index`th submission
    pub fn events(&self, index: usize) -> Arc<dyn TransportEvents> {
        self.submissions.lock().unwrap()[index].events.clone()
    }

    /// Inspect the `index`th submission
    pub fn with_submission<T>(&self, index: usize, f: impl FnOnce(&Recorded) -> T) -> T {
        f(&self.submissions.lock().unwrap()[index])
    }
}

impl Transport for MockTransport {
    fn submit(&self, submission: Submission) -> Result<TransportHandle> {
        if let Some(error) = self.submit_error.lock().unwrap().take() {
            return Err(error);
        }
        let handle = TransportHandle::next(submission.background);
        self.submissions.lock().unwrap().push(Recorded {
            request: submission.request,
            background: submission.background,
            resume_data: submission.resume_data,
            events: submission.events,
            handle: handle.clone(),
        });
        Ok(handle)
    }

    fn cancel(&self, handle: &TransportHandle) {
        self.cancelled.lock().unwrap().push(handle.clone());
    }

    fn lookup_cache(&self, fingerprint: &Fingerprint) -> Option<CachedResponse> {
        self.cache.get(fingerprint)
    }

    fn staging_directory(&self) -> PathBuf {
        self.staging
            .lock()
            .unwrap()
            .clone()
            .unwrap_or_else(|| urltask::background_session_files_directory().to_path_buf())
    }

    fn resume_data(&self, _handle: &TransportHandle) -> Option<ResumeData> {
        self.resume_data.lock().unwrap().clone()
    }
}

/// Response metadata for `url` with an optional `Content-Length`
pub fn response_for(url: &str, status: StatusCode, content_length: Option<u64>) -> ResponseMetadata {
    let mut headers = HeaderMap::new();
    if let Some(length) = content_length {
        headers.insert("content-length", length.into());
    }
    ResponseMetadata::new(status, headers, url.parse().unwrap())
}

/// Ordered log of observer calls
#[derive(Clone, Default)]
pub struct CallLog(Arc<Mutex<Vec<String>>>);

impl CallLog {
    pub fn push(&self, entry: impl Into<String>) {
        self.0.lock().unwrap().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.entries()
            .iter()
            .filter(|entry| entry.starts_with(prefix))
            .count()
    }
}

/// Poll `condition` until it holds, panicking after `limit`
pub async fn wait_until(limit: Duration, mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + limit;
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not met within {:?}",
            limit
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
