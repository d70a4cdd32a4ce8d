//! Request tasks: one observable HTTP request driven by a transport

mod observers;
mod progress;
mod shared;

pub use observers::{CompletionObserver, Observers, ProgressObserver, ResponseObserver};
pub use shared::TaskState;

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;

use crate::backend::Transport;
use crate::backend::types::{Direction, Submission, TransportEvents, TransportHandle};
use crate::cache::CachedResponse;
use crate::response::ResponseMetadata;
use crate::resume::ResumeData;
use crate::{Error, Request, Result};
use shared::TaskShared;

/// Construction options for a deferred task
#[derive(Debug, Clone, Default)]
pub struct TaskOptions {
    /// Run as a background transfer that can be resumed later
    pub background: bool,
    /// Opaque resume data from an interrupted background transfer
    pub resume_data: Option<Vec<u8>>,
}

/// An asynchronous HTTP request with observable progress and completion.
///
/// A task is created for exactly one request. It reports to its observers in
/// a fixed order: the response observer (once, when headers arrive), progress
/// observers (on every increase), then the completion observer exactly once.
/// Nothing is reported after completion.
///
/// Handles are cheap to clone; clones refer to the same task.
///
/// # Examples
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use urltask::{Observers, ReqwestTransport, Request, RequestTask};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let transport = Arc::new(ReqwestTransport::new()?);
/// let request = Request::get("https://httpbin.org/bytes/4096")?.build();
///
/// let task = RequestTask::send(
///     transport,
///     request,
///     Observers::new()
///         .on_response(|response| println!("status: {}", response.status()))
///         .on_download_progress(|fraction| println!("progress: {:?}", fraction)),
/// );
///
/// let body = task.finished().await?;
/// println!("received {} bytes", body.len());
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct RequestTask {
    shared: Arc<TaskShared>,
    transport: Arc<dyn Transport>,
}

impl RequestTask {
    /// Create a task and start it immediately.
    ///
    /// Failures after this point, including the transport refusing the
    /// request, are delivered to the completion observer.
    pub fn send(transport: Arc<dyn Transport>, request: Request, observers: Observers) -> Self {
        let task = Self::from_parts(transport, request, false, None, observers);
        if let Err(error) = task.start() {
            tracing::warn!(%error, "Freshly created task refused to start");
        }
        task
    }

    /// Create a task without starting it; call [`start`](Self::start) when ready.
    ///
    /// Resume data is decoded here. It must belong to a background task for
    /// the same URL and name a staged file inside the transport's
    /// [`staging_directory`](Transport::staging_directory), otherwise this
    /// fails with [`Error::MalformedResumeData`] before anything reaches the
    /// transport.
    pub fn new(
        transport: Arc<dyn Transport>,
        request: Request,
        options: TaskOptions,
        observers: Observers,
    ) -> Result<Self> {
        let resume_data = match options.resume_data {
            Some(_) if !options.background => {
                return Err(Error::MalformedResumeData(
                    "resume data requires a background task".to_string(),
                ));
            }
            Some(bytes) => {
                let resume_data = ResumeData::decode_for(&bytes, request.url())?;
                resume_data.ensure_staged_in(&transport.staging_directory())?;
                Some(resume_data)
            }
            None => None,
        };

        Ok(Self::from_parts(
            transport,
            request,
            options.background,
            resume_data,
            observers,
        ))
    }

    /// Configure a task step by step
    pub fn builder(transport: Arc<dyn Transport>, request: Request) -> TaskBuilder {
        TaskBuilder {
            transport,
            request,
            options: TaskOptions::default(),
            observers: Observers::new(),
        }
    }

    fn from_parts(
        transport: Arc<dyn Transport>,
        request: Request,
        background: bool,
        resume_data: Option<ResumeData>,
        observers: Observers,
    ) -> Self {
        Self {
            shared: Arc::new(TaskShared::new(request, background, resume_data, observers)),
            transport,
        }
    }

    /// Submit the request to the transport.
    ///
    /// Only the first call does anything; later calls return
    /// [`Error::AlreadyStarted`]. A cached response for the request, if the
    /// transport has one, is available from
    /// [`cached_url_response`](Self::cached_url_response) by the time the
    /// request is submitted.
    pub fn start(&self) -> Result<()> {
        let resume_data = {
            let mut inner = self.shared.lock();
            if inner.state != TaskState::Created {
                return Err(Error::AlreadyStarted);
            }
            inner.state = TaskState::Running;
            inner.resume_data.take()
        };

        let request = &self.shared.request;
        tracing::debug!(
            method = %request.method(),
            url = %request.url(),
            background = self.shared.background,
            resuming = resume_data.is_some(),
            "Starting request task"
        );

        if let Some(cached) = self.transport.lookup_cache(&request.fingerprint()) {
            tracing::trace!(url = %request.url(), "Found cached response");
            self.shared
                .cached_dictionary
                .store(cached.as_dictionary().map(Arc::new));
            self.shared.cached_response.store(Some(Arc::new(cached)));
        }

        if self.shared.state().is_terminal() {
            // Cancelled while looking up the cache.
            return Ok(());
        }

        let submission = Submission {
            request: request.clone(),
            background: self.shared.background,
            resume_data,
            events: self.shared.clone() as Arc<dyn TransportEvents>,
        };

        match self.transport.submit(submission) {
            Ok(handle) => {
                let cancelled = {
                    let mut inner = self.shared.lock();
                    inner.handle = Some(handle.clone());
                    inner.state == TaskState::Cancelled
                };
                if cancelled {
                    self.transport.cancel(&handle);
                }
            }
            Err(error) => self.shared.fail(error),
        }

        Ok(())
    }

    /// Cancel the task.
    ///
    /// A task that has not completed yet ends as [`TaskState::Cancelled`] and
    /// its completion observer receives [`Error::Cancelled`]. Cancelling a
    /// finished task does nothing.
    pub fn cancel(&self) {
        if let Some(Some(handle)) = self.shared.cancel() {
            self.transport.cancel(&handle);
        }
    }

    /// Cancel a background task and return data to resume it with later.
    ///
    /// Returns `None` for foreground tasks, for tasks that completed, and when
    /// the transport has nothing staged yet.
    pub fn cancel_producing_resume_data(&self) -> Option<Vec<u8>> {
        self.cancel();
        if !self.shared.background || self.state() == TaskState::Succeeded {
            return None;
        }

        let handle = self.task()?;
        let resume_data = self.transport.resume_data(&handle)?;
        match resume_data.encode() {
            Ok(bytes) => Some(bytes),
            Err(error) => {
                tracing::warn!(%error, "Failed to encode resume data");
                None
            }
        }
    }

    /// Wait for the task to finish and return its outcome.
    ///
    /// Resolves after the completion observer has run. A task that is never
    /// started or cancelled never resolves.
    pub async fn finished(&self) -> Result<Bytes> {
        self.shared.wait_finished().await;
        match self.shared.response_data() {
            Some(data) => Ok(data),
            None => Err(self
                .shared
                .error()
                .unwrap_or_else(|| Error::Internal("Task finished without an outcome".to_string()))),
        }
    }

    /// The request this task performs
    pub fn original_request(&self) -> &Request {
        &self.shared.request
    }

    /// Whether this task runs as a background transfer
    pub fn is_background_task(&self) -> bool {
        self.shared.background
    }

    /// Current lifecycle state
    pub fn state(&self) -> TaskState {
        self.shared.state()
    }

    /// Response headers, once they have arrived
    pub fn response(&self) -> Option<Arc<ResponseMetadata>> {
        self.shared.response.load_full()
    }

    /// Response body, once the task succeeded
    pub fn response_data(&self) -> Option<Bytes> {
        self.shared.response_data()
    }

    /// The error that ended the task, if it failed or was cancelled
    pub fn error(&self) -> Option<Error> {
        self.shared.error()
    }

    /// Fraction of the request body sent so far
    pub fn upload_progress(&self) -> f64 {
        self.shared.progress(Direction::Upload)
    }

    /// Fraction of the response body received so far
    pub fn download_progress(&self) -> f64 {
        self.shared.progress(Direction::Download)
    }

    /// Response stored for this request before it was started
    pub fn cached_url_response(&self) -> Option<Arc<CachedResponse>> {
        self.shared.cached_response.load_full()
    }

    /// The cached response body as a JSON object, when it is one
    pub fn cached_dictionary_response(
        &self,
    ) -> Option<Arc<serde_json::Map<String, serde_json::Value>>> {
        self.shared.cached_dictionary.load_full()
    }

    /// Transport handle, once the request has been submitted
    pub fn task(&self) -> Option<TransportHandle> {
        self.shared.lock().handle.clone()
    }

    /// Set the response observer; fails with [`Error::AlreadyStarted`] after `start`
    pub fn set_response_observer<F>(&self, observer: F) -> Result<()>
    where
        F: FnMut(&ResponseMetadata) + Send + 'static,
    {
        self.shared
            .update_observers(|observers| observers.response = Some(Box::new(observer)))
    }

    /// Set the upload progress observer; fails with [`Error::AlreadyStarted`] after `start`
    pub fn set_upload_progress_observer<F>(&self, observer: F) -> Result<()>
    where
        F: FnMut(Option<f64>) + Send + 'static,
    {
        self.shared
            .update_observers(|observers| observers.upload_progress = Some(Box::new(observer)))
    }

    /// Set the download progress observer; fails with [`Error::AlreadyStarted`] after `start`
    pub fn set_download_progress_observer<F>(&self, observer: F) -> Result<()>
    where
        F: FnMut(Option<f64>) + Send + 'static,
    {
        self.shared
            .update_observers(|observers| observers.download_progress = Some(Box::new(observer)))
    }

    /// Set the completion observer; fails with [`Error::AlreadyStarted`] after `start`
    pub fn set_completion_observer<F>(&self, observer: F) -> Result<()>
    where
        F: FnOnce(Result<Bytes>) + Send + 'static,
    {
        self.shared
            .update_observers(|observers| observers.completion = Some(Box::new(observer)))
    }
}

impl fmt::Debug for RequestTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestTask")
            .field("method", self.shared.request.method())
            .field("url", &self.shared.request.url().as_str())
            .field("background", &self.shared.background)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

/// Builder for [`RequestTask`]
pub struct TaskBuilder {
    transport: Arc<dyn Transport>,
    request: Request,
    options: TaskOptions,
    observers: Observers,
}

impl TaskBuilder {
    /// Run as a background transfer
    pub fn background(mut self, background: bool) -> Self {
        self.options.background = background;
        self
    }

    /// Resume an interrupted background transfer
    pub fn resume_data(mut self, resume_data: impl Into<Vec<u8>>) -> Self {
        self.options.resume_data = Some(resume_data.into());
        self
    }

    /// Observe response headers
    pub fn on_response<F>(mut self, observer: F) -> Self
    where
        F: FnMut(&ResponseMetadata) + Send + 'static,
    {
        self.observers = self.observers.on_response(observer);
        self
    }

    /// Observe upload progress
    pub fn on_upload_progress<F>(mut self, observer: F) -> Self
    where
        F: FnMut(Option<f64>) + Send + 'static,
    {
        self.observers = self.observers.on_upload_progress(observer);
        self
    }

    /// Observe download progress
    pub fn on_download_progress<F>(mut self, observer: F) -> Self
    where
        F: FnMut(Option<f64>) + Send + 'static,
    {
        self.observers = self.observers.on_download_progress(observer);
        self
    }

    /// Observe completion
    pub fn on_completion<F>(mut self, observer: F) -> Self
    where
        F: FnOnce(Result<Bytes>) + Send + 'static,
    {
        self.observers = self.observers.on_completion(observer);
        self
    }

    /// Create the task without starting it
    pub fn build(self) -> Result<RequestTask> {
        RequestTask::new(self.transport, self.request, self.options, self.observers)
    }

    /// Create the task and start it
    pub fn start(self) -> Result<RequestTask> {
        let task = self.build()?;
        task.start()?;
        Ok(task)
    }
}
