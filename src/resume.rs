//! Resume data for interrupted background transfers

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use url::Url;

/// Format version written by [`ResumeData::encode`]
pub const RESUME_DATA_VERSION: u32 = 1;

/// Everything needed to continue a background transfer where it stopped
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResumeData {
    /// Format version
    pub version: u32,
    /// URL of the interrupted request
    pub url: Url,
    /// Bytes already written to the staged file
    pub bytes_received: u64,
    /// File holding the bytes received so far
    pub staged_file: PathBuf,
    /// `ETag` of the partial response, sent back as `If-Range`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validator: Option<String>,
}

impl ResumeData {
    /// Describe a partially staged transfer
    pub fn new(url: Url, bytes_received: u64, staged_file: PathBuf) -> Self {
        Self {
            version: RESUME_DATA_VERSION,
            url,
            bytes_received,
            staged_file,
            validator: None,
        }
    }

    /// Attach the response validator
    pub fn with_validator(mut self, validator: Option<String>) -> Self {
        self.validator = validator;
        self
    }

    /// Serialize into the opaque blob handed to callers
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Parse an opaque blob produced by [`encode`](Self::encode)
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.is_empty() {
            return Err(Error::MalformedResumeData("empty".to_string()));
        }

        let data: ResumeData = serde_json::from_slice(bytes)
            .map_err(|e| Error::MalformedResumeData(e.to_string()))?;

        if data.version != RESUME_DATA_VERSION {
            return Err(Error::MalformedResumeData(format!(
                "unsupported version {}",
                data.version
            )));
        }

        Ok(data)
    }

    /// Decode and check that the blob belongs to `url`
    pub fn decode_for(bytes: &[u8], url: &Url) -> Result<Self> {
        let data = Self::decode(bytes)?;
        if data.url != *url {
            return Err(Error::MalformedResumeData(format!(
                "resume data is for {}, not {}",
                data.url, url
            )));
        }
        Ok(data)
    }

    /// Check that the staged file lives directly inside `directory`.
    ///
    /// Symlinks and `..` components are resolved first, so the blob cannot
    /// point the transport at a file it does not own.
    pub fn ensure_staged_in(&self, directory: &Path) -> Result<()> {
        if self.is_staged_in(directory) {
            return Ok(());
        }
        Err(Error::MalformedResumeData(format!(
            "staged file {} is outside {}",
            self.staged_file.display(),
            directory.display()
        )))
    }

    pub(crate) fn is_staged_in(&self, directory: &Path) -> bool {
        let Ok(directory) = directory.canonicalize() else {
            return false;
        };
        let resolved = match self.staged_file.canonicalize() {
            Ok(path) => path,
            Err(_) => match (self.staged_file.parent(), self.staged_file.file_name()) {
                (Some(parent), Some(name)) => match parent.canonicalize() {
                    Ok(parent) => parent.join(name),
                    Err(_) => return false,
                },
                _ => return false,
            },
        };
        resolved.parent() == Some(directory.as_path())
    }
}
