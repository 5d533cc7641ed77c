//! Upload module
//!
//! The resumable upload engine. [`UploadSession`] owns the upload URL and the
//! confirmed offset and runs the create → transmit → verify → recover cycle;
//! the drivers decide how it is scheduled:
//!
//! | Driver | Chunks | Execution |
//! |--------|--------|-----------|
//! | [`Uploader`] | pulled from a [`ChunkSource`](crate::source::ChunkSource) | async |
//! | [`StreamUploader`] | pushed with `set_chunk` | async |
//! | [`BlockingUploader`] | pulled | blocks the calling thread |
//! | [`BlockingStreamUploader`] | pushed | blocks the calling thread |

use bytes::Bytes;
use reqwest::header::HeaderMap;
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;

use crate::storage::StorageError;

pub mod blocking;
pub mod progress;
pub mod request;
pub mod session;
pub mod stream;
pub mod uploader;

#[cfg(test)]
pub(crate) mod testing;

pub use blocking::{BlockingStreamUploader, BlockingUploader};
pub use progress::{LogProgress, Progress, ProgressObserver};
pub use request::{UploadRequest, UploadResponse};
pub use session::UploadSession;
pub use stream::StreamUploader;
pub use uploader::Uploader;

/// Default bytes per chunk (4 MiB)
pub const DEFAULT_CHUNK_SIZE: usize = 4 * 1024 * 1024;

/// Default wait before each recovery attempt
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(30);

/// Upload errors
#[derive(Error, Debug)]
pub enum UploadError {
    /// The server broke the protocol contract or could not be reached
    #[error("Communication error: {message}")]
    CommunicationError {
        message: String,
        status: Option<u16>,
        body: Bytes,
    },

    /// A chunk transmission did not return 204
    #[error("Upload failed: {reason}")]
    UploadFailed {
        reason: String,
        status: Option<u16>,
        body: Bytes,
    },

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("URL storage error: {0}")]
    StorageError(#[from] StorageError),

    #[error("Invalid upload configuration: {0}")]
    InvalidConfig(String),

    #[error("Upload cancelled at offset {offset}")]
    Cancelled { offset: u64 },
}

impl UploadError {
    pub(crate) fn communication(message: impl Into<String>) -> Self {
        UploadError::CommunicationError {
            message: message.into(),
            status: None,
            body: Bytes::new(),
        }
    }

    /// HTTP status of the failing response, when one was received
    pub fn status(&self) -> Option<u16> {
        match self {
            UploadError::CommunicationError { status, .. }
            | UploadError::UploadFailed { status, .. } => *status,
            _ => None,
        }
    }

    /// Raw body of the failing response
    pub fn body(&self) -> Option<&Bytes> {
        match self {
            UploadError::CommunicationError { body, .. }
            | UploadError::UploadFailed { body, .. } => Some(body),
            _ => None,
        }
    }

    /// Short label used for the error metric
    pub(crate) fn kind(&self) -> &'static str {
        match self {
            UploadError::CommunicationError { .. } => "communication",
            UploadError::UploadFailed { .. } => "upload_failed",
            UploadError::IoError(_) => "io",
            UploadError::StorageError(_) => "storage",
            UploadError::InvalidConfig(_) => "invalid_config",
            UploadError::Cancelled { .. } => "cancelled",
        }
    }
}

/// Per-session upload options
#[derive(Debug, Clone)]
pub struct UploadOptions {
    /// Maximum bytes sent per chunk
    pub chunk_size: usize,
    /// Recovery attempts allowed per chunk
    pub retries: u32,
    /// Wait before each recovery attempt
    pub retry_delay: Duration,
    /// Sent as `Upload-Metadata` on creation
    pub metadata: BTreeMap<String, String>,
    /// Extra headers sent with every request
    pub headers: HeaderMap,
    /// Send an `Upload-Checksum` with every chunk
    pub upload_checksum: bool,
}

impl Default for UploadOptions {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            retries: 0,
            retry_delay: DEFAULT_RETRY_DELAY,
            metadata: BTreeMap::new(),
            headers: HeaderMap::new(),
            upload_checksum: false,
        }
    }
}

impl UploadOptions {
    pub fn chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    pub fn metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    pub fn upload_checksum(mut self, enabled: bool) -> Self {
        self.upload_checksum = enabled;
        self
    }

    pub(crate) fn validate(&self) -> Result<(), UploadError> {
        if self.chunk_size == 0 {
            return Err(UploadError::InvalidConfig(
                "chunk_size must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}
