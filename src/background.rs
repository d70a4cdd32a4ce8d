//! Process-wide state for background sessions
//!
//! Background transfers outlive the request tasks that started them. When the
//! host environment relaunches the process to deliver their results, it hands
//! over a one-shot completion handler that must run once every outstanding
//! background transfer is done. [`BackgroundCompletion`] holds that handler:
//! the host sets it, the transport fires it when delivery finishes, and firing
//! clears it so a later delivery event cannot run it again.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock};

/// Host supplied handler run once background delivery has finished
pub type BackgroundCompletionHandler = Box<dyn FnOnce() + Send + 'static>;

/// Slot for the background session completion handler
pub struct BackgroundCompletion {
    handler: Mutex<Option<BackgroundCompletionHandler>>,
}

impl BackgroundCompletion {
    /// Create an empty slot
    pub const fn new() -> Self {
        Self {
            handler: Mutex::new(None),
        }
    }

    /// The slot shared by the whole process
    pub fn shared() -> &'static BackgroundCompletion {
        static SHARED: BackgroundCompletion = BackgroundCompletion::new();
        &SHARED
    }

    /// Install the handler for the next delivery event, replacing any previous one
    pub fn set<F>(&self, handler: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let previous = match self.handler.lock() {
            Ok(mut slot) => slot.replace(Box::new(handler)),
            Err(poisoned) => poisoned.into_inner().replace(Box::new(handler)),
        };
        if previous.is_some() {
            tracing::debug!("Replaced an unfired background session completion handler");
        }
    }

    /// Whether a handler is waiting to be fired
    pub fn is_set(&self) -> bool {
        match self.handler.lock() {
            Ok(slot) => slot.is_some(),
            Err(poisoned) => poisoned.into_inner().is_some(),
        }
    }

    /// Remove the handler without running it
    pub fn clear(&self) -> bool {
        self.take().is_some()
    }

    /// Raise the background-delivery-complete event.
    ///
    /// Runs the installed handler, if any, and clears the slot. Returns whether
    /// a handler ran. The handler is called after the lock is released, so it
    /// may install a handler for the next event.
    pub fn finish_events(&self) -> bool {
        match self.take() {
            Some(handler) => {
                tracing::debug!("Running background session completion handler");
                handler();
                true
            }
            None => false,
        }
    }

    fn take(&self) -> Option<BackgroundCompletionHandler> {
        match self.handler.lock() {
            Ok(mut slot) => slot.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        }
    }
}

impl Default for BackgroundCompletion {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for BackgroundCompletion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackgroundCompletion")
            .field("is_set", &self.is_set())
            .finish()
    }
}

/// Directory where transports stage background transfer payloads.
///
/// The path is computed once per process and never created here.
pub fn background_session_files_directory() -> &'static Path {
    static DIRECTORY: OnceLock<PathBuf> = OnceLock::new();
    DIRECTORY.get_or_init(|| {
        std::env::temp_dir()
            .join("urltask")
            .join("background-sessions")
    })
}

/// Create `directory` if needed and return it
pub(crate) fn ensure_directory(directory: &Path) -> crate::Result<PathBuf> {
    std::fs::create_dir_all(directory).map_err(|e| {
        crate::Error::Internal(format!(
            "Failed to create staging directory {}: {}",
            directory.display(),
            e
        ))
    })?;
    Ok(directory.to_path_buf())
}
