//! Asynchronous push-mode driver
//!
//! The caller hands over each chunk with [`StreamUploader::set_chunk`] and
//! then calls [`StreamUploader::upload_chunk`]. If recovery finds the server
//! already holds part of the chunk, only the rest is sent again.

use bytes::Bytes;
use reqwest::Url;
use std::sync::Arc;

use super::session::UploadSession;
use super::{UploadError, UploadOptions};
use crate::storage::UrlStorage;
use crate::transport::Transport;

struct PendingChunk {
    /// Offset the chunk begins at, fixed on its first transmission
    start: Option<u64>,
    data: Bytes,
}

/// Uploads caller-supplied chunks of an artifact of known length
pub struct StreamUploader<T> {
    session: UploadSession<T>,
    pending: Option<PendingChunk>,
}

impl<T: Transport> StreamUploader<T> {
    pub fn new(
        transport: T,
        endpoint: Url,
        upload_length: u64,
        options: UploadOptions,
    ) -> Result<Self, UploadError> {
        let session = UploadSession::new(transport, endpoint, upload_length, options)?;
        Ok(Self::from_session(session))
    }

    pub fn from_session(session: UploadSession<T>) -> Self {
        Self {
            session,
            pending: None,
        }
    }

    pub fn with_url_storage(mut self, storage: Arc<dyn UrlStorage>, key: impl Into<String>) -> Self {
        self.session = self.session.with_url_storage(storage, key);
        self
    }

    /// Supply the bytes that follow the confirmed offset
    ///
    /// Replaces any chunk that has not been fully persisted yet.
    pub fn set_chunk(&mut self, chunk: impl Into<Bytes>) {
        self.pending = Some(PendingChunk {
            start: None,
            data: chunk.into(),
        });
    }

    /// Whether a chunk is waiting to be persisted
    pub fn has_pending_chunk(&self) -> bool {
        self.pending.is_some()
    }

    /// Persist the current chunk; returns how far the offset moved
    pub async fn upload_chunk(&mut self) -> Result<u64, UploadError> {
        let (start, data) = match &self.pending {
            Some(pending) => (pending.start, pending.data.clone()),
            None => {
                return Err(UploadError::InvalidConfig(
                    "no chunk set for stream upload".into(),
                ))
            }
        };

        self.session.ensure_url().await?;
        let start = start.unwrap_or_else(|| self.session.offset());
        if let Some(pending) = self.pending.as_mut() {
            pending.start = Some(start);
        }

        let advanced = self.session.upload_pushed(start, data.clone()).await?;
        if self.session.offset() >= start + data.len() as u64 {
            self.pending = None;
        }
        Ok(advanced)
    }

    pub async fn resume_from(&mut self, url: Url) -> Result<u64, UploadError> {
        self.session.resume_from(url).await
    }

    pub fn is_complete(&self) -> bool {
        self.session.upload_url().is_some() && self.session.offset() == self.session.upload_length()
    }

    pub fn offset(&self) -> u64 {
        self.session.offset()
    }

    pub fn upload_url(&self) -> Option<&Url> {
        self.session.upload_url()
    }

    pub fn session(&self) -> &UploadSession<T> {
        &self.session
    }

    pub fn into_session(self) -> UploadSession<T> {
        self.session
    }
}
