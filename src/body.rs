//! Request payloads
//!
//! A [`Body`] is encoded when it is built, so the transport knows the exact
//! upload size before the first byte is sent.

use crate::Result;
use bytes::Bytes;
use std::path::Path;

const OCTET_STREAM: &str = "application/octet-stream";

/// Encoded request payload and the content type it implies
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Body {
    content: Bytes,
    content_type: Option<String>,
}

impl Body {
    /// A body with no content
    pub fn empty() -> Self {
        Self::default()
    }

    /// Raw bytes sent as-is
    pub fn bytes(content: impl Into<Bytes>, content_type: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            content_type: Some(content_type.into()),
        }
    }

    /// UTF-8 text
    pub fn text(content: impl Into<String>) -> Self {
        let content: String = content.into();
        Self::bytes(content, "text/plain; charset=utf-8")
    }

    /// `application/x-www-form-urlencoded` fields
    pub fn form<K, V>(fields: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let encoded = fields
            .into_iter()
            .map(|(name, value)| {
                format!(
                    "{}={}",
                    urlencoding::encode(name.as_ref()),
                    urlencoding::encode(value.as_ref())
                )
            })
            .collect::<Vec<_>>()
            .join("&");
        Self::bytes(encoded, "application/x-www-form-urlencoded")
    }

    /// Any serializable value as JSON
    pub fn json(value: impl serde::Serialize) -> Result<Self> {
        Ok(Self::bytes(serde_json::to_vec(&value)?, "application/json"))
    }

    /// Read a whole file; the content type defaults to `application/octet-stream`
    pub async fn from_file(path: impl AsRef<Path>, content_type: Option<String>) -> Result<Self> {
        let content = tokio::fs::read(path).await?;
        Ok(Self::bytes(
            content,
            content_type.unwrap_or_else(|| OCTET_STREAM.to_string()),
        ))
    }

    /// Bytes that go on the wire
    pub fn content(&self) -> &Bytes {
        &self.content
    }

    /// Upload size in bytes
    pub fn len(&self) -> usize {
        self.content.len()
    }

    /// Whether there is nothing to upload
    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
    }

    /// `Content-Type` to send when the request does not set one
    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }
}

impl From<String> for Body {
    fn from(content: String) -> Self {
        Self::text(content)
    }
}

impl From<&str> for Body {
    fn from(content: &str) -> Self {
        Self::text(content)
    }
}

impl From<Vec<u8>> for Body {
    fn from(content: Vec<u8>) -> Self {
        Self::bytes(content, OCTET_STREAM)
    }
}

impl From<&[u8]> for Body {
    fn from(content: &[u8]) -> Self {
        Self::bytes(Bytes::copy_from_slice(content), OCTET_STREAM)
    }
}

impl From<Bytes> for Body {
    fn from(content: Bytes) -> Self {
        Self::bytes(content, OCTET_STREAM)
    }
}

impl From<serde_json::Value> for Body {
    fn from(value: serde_json::Value) -> Self {
        Self::bytes(value.to_string(), "application/json")
    }
}
