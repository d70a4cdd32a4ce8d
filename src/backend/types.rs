//! Shared types between the task core and transport implementations

use crate::{Request, Result, resume::ResumeData, response::ResponseMetadata};
use bytes::Bytes;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Which way bytes are moving
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Request body being sent
    Upload,
    /// Response body being received
    Download,
}

/// Receiver for everything a transport observes about one submission.
///
/// Transports may call these from any thread. Calls for one submission must
/// not overlap in time, and `on_complete` must be the last call.
pub trait TransportEvents: Send + Sync {
    /// Status line and headers arrived
    fn on_response(&self, response: ResponseMetadata);

    /// Bytes moved in `direction`; `total` is `None` when the size is unknown
    fn on_progress(&self, direction: Direction, done: u64, total: Option<u64>);

    /// A chunk of the response body arrived
    fn on_data(&self, chunk: Bytes);

    /// The submission finished; the body is everything passed to `on_data`
    fn on_complete(&self, result: Result<()>);
}

/// Everything a transport needs to run one request
pub struct Submission {
    /// The request to perform
    pub request: Request,
    /// Whether the transfer should survive process suspension
    pub background: bool,
    /// Decoded resume data for a previously interrupted background transfer
    pub resume_data: Option<ResumeData>,
    /// Where to report progress
    pub events: Arc<dyn TransportEvents>,
}

impl fmt::Debug for Submission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Submission")
            .field("request", &self.request)
            .field("background", &self.background)
            .field("resume_data", &self.resume_data)
            .finish_non_exhaustive()
    }
}

/// Transport side identity of a submission
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TransportHandle {
    id: u64,
    background: bool,
}

impl TransportHandle {
    /// Allocate a handle with a process-unique identifier
    pub fn next(background: bool) -> Self {
        static NEXT_ID: AtomicU64 = AtomicU64::new(1);
        Self {
            id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
            background,
        }
    }

    /// Identifier of the submission
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Whether the submission is a background transfer
    pub fn is_background(&self) -> bool {
        self.background
    }
}

impl fmt::Display for TransportHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.background {
            write!(f, "background-{}", self.id)
        } else {
            write!(f, "task-{}", self.id)
        }
    }
}
