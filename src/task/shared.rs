//! State shared between a request task and its transport

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use arc_swap::ArcSwapOption;
use bytes::{Bytes, BytesMut};
use tokio::sync::watch;

use super::observers::Observers;
use super::progress::ProgressTracker;
use crate::backend::types::{Direction, TransportEvents, TransportHandle};
use crate::cache::CachedResponse;
use crate::response::ResponseMetadata;
use crate::resume::ResumeData;
use crate::{Error, Request, Result};

/// Lifecycle state of a request task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// Constructed, not yet started
    Created,
    /// Submitted to the transport
    Running,
    /// Cancelled before it completed
    Cancelled,
    /// Completed with a response body
    Succeeded,
    /// Completed with a transport error
    Failed,
}

impl TaskState {
    /// Whether no further transitions or callbacks can follow
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskState::Cancelled | TaskState::Succeeded | TaskState::Failed
        )
    }
}

/// Observer invocation waiting to run
enum Delivery {
    Response(Arc<ResponseMetadata>),
    Progress(Direction, Option<f64>),
    Completion(Result<Bytes>),
}

/// Mutable task state, always accessed under the lock
pub(crate) struct Inner {
    pub(crate) state: TaskState,
    pub(crate) handle: Option<TransportHandle>,
    pub(crate) resume_data: Option<ResumeData>,
    upload: ProgressTracker,
    download: ProgressTracker,
    buffer: BytesMut,
    response_data: Option<Bytes>,
    error: Option<Error>,
    queue: VecDeque<Delivery>,
    draining: bool,
}

/// Shared context for one request task
pub(crate) struct TaskShared {
    pub(crate) request: Request,
    pub(crate) background: bool,
    inner: Mutex<Inner>,
    observers: Mutex<Observers>,
    pub(crate) response: ArcSwapOption<ResponseMetadata>,
    pub(crate) cached_response: ArcSwapOption<CachedResponse>,
    pub(crate) cached_dictionary: ArcSwapOption<serde_json::Map<String, serde_json::Value>>,
    finished: watch::Sender<bool>,
}

impl TaskShared {
    pub(crate) fn new(
        request: Request,
        background: bool,
        resume_data: Option<ResumeData>,
        observers: Observers,
    ) -> Self {
        let (finished, _) = watch::channel(false);
        Self {
            request,
            background,
            inner: Mutex::new(Inner {
                state: TaskState::Created,
                handle: None,
                resume_data,
                upload: ProgressTracker::default(),
                download: ProgressTracker::default(),
                buffer: BytesMut::new(),
                response_data: None,
                error: None,
                queue: VecDeque::new(),
                draining: false,
            }),
            observers: Mutex::new(observers),
            response: ArcSwapOption::new(None),
            cached_response: ArcSwapOption::new(None),
            cached_dictionary: ArcSwapOption::new(None),
            finished,
        }
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock_observers(&self) -> MutexGuard<'_, Observers> {
        self.observers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub(crate) fn state(&self) -> TaskState {
        self.lock().state
    }

    pub(crate) fn response_data(&self) -> Option<Bytes> {
        self.lock().response_data.clone()
    }

    pub(crate) fn error(&self) -> Option<Error> {
        self.lock().error.clone()
    }

    pub(crate) fn progress(&self, direction: Direction) -> f64 {
        let inner = self.lock();
        match direction {
            Direction::Upload => inner.upload.fraction(),
            Direction::Download => inner.download.fraction(),
        }
    }

    /// Replace observers while the task is still `Created`
    pub(crate) fn update_observers(&self, update: impl FnOnce(&mut Observers)) -> Result<()> {
        let inner = self.lock();
        if inner.state != TaskState::Created {
            return Err(Error::AlreadyStarted);
        }
        let mut observers = self.lock_observers();
        update(&mut *observers);
        drop(observers);
        drop(inner);
        Ok(())
    }

    /// Move a non-terminal task to `Cancelled`.
    ///
    /// Returns `None` when the task was already terminal, otherwise the
    /// transport handle to abort, if one had been assigned.
    pub(crate) fn cancel(&self) -> Option<Option<TransportHandle>> {
        let handle = {
            let mut inner = self.lock();
            if inner.state.is_terminal() {
                return None;
            }
            tracing::debug!(url = %self.request.url(), "Cancelling request task");
            inner.buffer.clear();
            Self::finish(&mut inner, TaskState::Cancelled, Err(Error::Cancelled));
            inner.handle.clone()
        };
        self.drain();
        Some(handle)
    }

    /// Record the outcome and queue the completion observer
    fn finish(inner: &mut Inner, state: TaskState, result: Result<Bytes>) {
        inner.state = state;
        inner.resume_data = None;
        match &result {
            Ok(data) => {
                inner.upload.finish();
                inner.download.finish();
                inner.response_data = Some(data.clone());
            }
            Err(error) => inner.error = Some(error.clone()),
        }
        inner.queue.push_back(Delivery::Completion(result));
    }

    /// Run queued observer invocations unless another caller already is.
    ///
    /// Observers run without the state lock held, so they may call back into
    /// the task. Calls made from inside an observer only enqueue; the outer
    /// drain picks them up in order.
    fn drain(&self) {
        {
            let mut inner = self.lock();
            if inner.draining {
                return;
            }
            inner.draining = true;
        }

        let _reset = DrainReset(self);
        loop {
            let delivery = {
                let mut inner = self.lock();
                match inner.queue.pop_front() {
                    Some(delivery) => delivery,
                    None => {
                        inner.draining = false;
                        return;
                    }
                }
            };
            self.deliver(delivery);
        }
    }

    fn deliver(&self, delivery: Delivery) {
        match delivery {
            Delivery::Response(response) => {
                if let Some(observer) = self.lock_observers().response.as_mut() {
                    observer(&response);
                }
            }
            Delivery::Progress(Direction::Upload, fraction) => {
                if let Some(observer) = self.lock_observers().upload_progress.as_mut() {
                    observer(fraction);
                }
            }
            Delivery::Progress(Direction::Download, fraction) => {
                if let Some(observer) = self.lock_observers().download_progress.as_mut() {
                    observer(fraction);
                }
            }
            Delivery::Completion(result) => {
                let observer = self.lock_observers().completion.take();
                if let Some(observer) = observer {
                    observer(result);
                }
                self.finished.send_replace(true);
            }
        }
    }

    /// Wait until the completion observer has run
    pub(crate) async fn wait_finished(&self) {
        let mut receiver = self.finished.subscribe();
        // The sender lives as long as `self`, so this only fails if it is dropped.
        let _ = receiver.wait_for(|finished| *finished).await;
    }

    /// Record a submission failure that happened before any event was reported
    pub(crate) fn fail(&self, error: Error) {
        self.complete(Err(error));
    }

    fn complete(&self, result: Result<()>) {
        {
            let mut inner = self.lock();
            if inner.state.is_terminal() {
                tracing::trace!(url = %self.request.url(), "Ignoring completion of a finished task");
                return;
            }
            match result {
                Ok(()) => {
                    let data = std::mem::take(&mut inner.buffer).freeze();
                    tracing::debug!(
                        url = %self.request.url(),
                        bytes = data.len(),
                        "Request task succeeded"
                    );
                    Self::finish(&mut inner, TaskState::Succeeded, Ok(data));
                }
                Err(error) => {
                    tracing::debug!(url = %self.request.url(), %error, "Request task failed");
                    inner.buffer.clear();
                    let state = if error.is_cancelled() {
                        TaskState::Cancelled
                    } else {
                        TaskState::Failed
                    };
                    Self::finish(&mut inner, state, Err(error));
                }
            }
        }
        self.drain();
    }
}

impl TransportEvents for TaskShared {
    fn on_response(&self, response: ResponseMetadata) {
        {
            let mut inner = self.lock();
            if inner.state != TaskState::Running {
                return;
            }
            if self.response.load().is_some() {
                tracing::warn!(url = %self.request.url(), "Transport reported headers twice");
                return;
            }
            let response = Arc::new(response);
            self.response.store(Some(response.clone()));
            inner.queue.push_back(Delivery::Response(response));
        }
        self.drain();
    }

    fn on_progress(&self, direction: Direction, done: u64, total: Option<u64>) {
        {
            let mut inner = self.lock();
            if inner.state != TaskState::Running {
                return;
            }
            let tracker = match direction {
                Direction::Upload => &mut inner.upload,
                Direction::Download => &mut inner.download,
            };
            match tracker.advance(done, total) {
                Some(fraction) => inner.queue.push_back(Delivery::Progress(direction, fraction)),
                None => return,
            }
        }
        self.drain();
    }

    fn on_data(&self, chunk: Bytes) {
        let mut inner = self.lock();
        if inner.state == TaskState::Running {
            inner.buffer.extend_from_slice(&chunk);
        }
    }

    fn on_complete(&self, result: Result<()>) {
        self.complete(result);
    }
}

/// Clears the draining flag if an observer panics mid-drain
struct DrainReset<'a>(&'a TaskShared);

impl Drop for DrainReset<'_> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            self.0.lock().draining = false;
        }
    }
}
