//! Staging of background transfers for the reqwest transport

use crate::backend::types::TransportHandle;
use crate::resume::ResumeData;
use crate::{Error, Result};
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use url::Url;

/// A background transfer whose body is written to a file as it arrives
#[derive(Debug)]
pub(crate) struct StagedTransfer {
    url: Url,
    path: PathBuf,
    /// Bytes already on disk when this submission started
    offset: u64,
    /// Bytes on disk now
    written: AtomicU64,
    validator: Mutex<Option<String>>,
}

impl StagedTransfer {
    /// Stage a new transfer, or continue the one described by `resume`
    pub(crate) fn prepare(
        directory: &Path,
        handle: &TransportHandle,
        url: &Url,
        resume: Option<&ResumeData>,
    ) -> Self {
        if let Some(resume) = resume.filter(|resume| {
            let inside = resume.is_staged_in(directory);
            if !inside {
                tracing::warn!(
                    path = %resume.staged_file.display(),
                    "Ignoring resume data staged outside the staging directory"
                );
            }
            inside
        }) {
            let on_disk = std::fs::metadata(&resume.staged_file)
                .map(|metadata| metadata.len())
                .unwrap_or(0);
            if resume.bytes_received > 0 && on_disk >= resume.bytes_received {
                tracing::debug!(
                    path = %resume.staged_file.display(),
                    offset = resume.bytes_received,
                    "Resuming staged background transfer"
                );
                return Self {
                    url: url.clone(),
                    path: resume.staged_file.clone(),
                    offset: resume.bytes_received,
                    written: AtomicU64::new(resume.bytes_received),
                    validator: Mutex::new(resume.validator.clone()),
                };
            }
            tracing::warn!(
                path = %resume.staged_file.display(),
                "Staged file is missing or short, restarting background transfer"
            );
        }

        let path = directory.join(format!(
            "urltask-{}-{}.part",
            std::process::id(),
            handle.id()
        ));
        Self {
            url: url.clone(),
            path,
            offset: 0,
            written: AtomicU64::new(0),
            validator: Mutex::new(None),
        }
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    /// Byte offset to request with a `Range` header, zero for a fresh transfer
    pub(crate) fn offset(&self) -> u64 {
        self.offset
    }

    pub(crate) fn validator(&self) -> Option<String> {
        self.validator
            .lock()
            .ok()
            .and_then(|validator| validator.clone())
    }

    pub(crate) fn set_validator(&self, validator: Option<String>) {
        if let Ok(mut slot) = self.validator.lock() {
            *slot = validator;
        }
    }

    /// Open the staged file positioned at `start`, discarding anything after it
    pub(crate) async fn open_at(&self, start: u64) -> Result<tokio::fs::File> {
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(start == 0)
            .open(&self.path)
            .await
            .map_err(|e| {
                Error::Internal(format!(
                    "Failed to open staged file {}: {}",
                    self.path.display(),
                    e
                ))
            })?;

        if start > 0 {
            file.set_len(start).await?;
            file.seek(SeekFrom::Start(start)).await?;
        }
        self.written.store(start, Ordering::Release);
        Ok(file)
    }

    /// Append a chunk and record the new length
    pub(crate) async fn write(&self, file: &mut tokio::fs::File, chunk: &[u8]) -> Result<u64> {
        file.write_all(chunk).await?;
        Ok(self.written.fetch_add(chunk.len() as u64, Ordering::AcqRel) + chunk.len() as u64)
    }

    /// Flush the file and read back the complete body, removing the staged file
    pub(crate) async fn finish(&self, mut file: tokio::fs::File) -> Result<bytes::Bytes> {
        file.flush().await?;
        drop(file);

        let body = tokio::fs::read(&self.path).await?;
        if let Err(e) = tokio::fs::remove_file(&self.path).await {
            tracing::warn!(path = %self.path.display(), "Failed to remove staged file: {}", e);
        }
        Ok(body.into())
    }

    /// Remove the staged file of a transfer nobody will resume
    pub(crate) fn discard(&self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => tracing::debug!(path = %self.path.display(), "Discarded staged transfer"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(path = %self.path.display(), "Failed to remove staged file: {}", e)
            }
        }
    }

    /// Resume data describing what is on disk, if anything is
    pub(crate) fn resume_data(&self) -> Option<ResumeData> {
        let written = self.written.load(Ordering::Acquire);
        if written == 0 {
            return None;
        }
        Some(
            ResumeData::new(self.url.clone(), written, self.path.clone())
                .with_validator(self.validator()),
        )
    }
}
