//! Asynchronous pull-mode driver
//!
//! # Example
//!
//! ```no_run
//! use tus_uploadr::source::FileSource;
//! use tus_uploadr::transport::{HttpTransport, HttpTransportConfig};
//! use tus_uploadr::upload::{UploadOptions, Uploader};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let transport = HttpTransport::new(HttpTransportConfig::default())?;
//! let source = FileSource::open("video.mp4")?;
//! let options = UploadOptions::default().retries(3).metadata("filename", "video.mp4");
//!
//! let mut uploader = Uploader::new(transport, "http://localhost:1080/files/".parse()?, source, options)?;
//! uploader.upload(None).await?;
//! println!("uploaded to {}", uploader.upload_url().unwrap());
//! # Ok(())
//! # }
//! ```

use reqwest::Url;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use super::progress::{Progress, ProgressObserver};
use super::session::UploadSession;
use super::{UploadError, UploadOptions};
use crate::source::ChunkSource;
use crate::storage::UrlStorage;
use crate::transport::Transport;

/// Pulls chunks from a [`ChunkSource`] until the target offset is reached
pub struct Uploader<T, S> {
    session: UploadSession<T>,
    source: S,
    stop_at: Option<u64>,
    cancel: Option<CancellationToken>,
}

impl<T: Transport, S: ChunkSource> Uploader<T, S> {
    /// Create an uploader; the upload length is taken from `source`
    pub fn new(
        transport: T,
        endpoint: Url,
        mut source: S,
        options: UploadOptions,
    ) -> Result<Self, UploadError> {
        let upload_length = source.total_size()?;
        let session = UploadSession::new(transport, endpoint, upload_length, options)?;
        Ok(Self::with_session(session, source))
    }

    fn with_session(session: UploadSession<T>, source: S) -> Self {
        Self {
            session,
            source,
            stop_at: None,
            cancel: None,
        }
    }

    /// Drive an existing session; `source` must match its upload length
    pub fn from_session(session: UploadSession<T>, mut source: S) -> Result<Self, UploadError> {
        let size = source.total_size()?;
        if size != session.upload_length() {
            return Err(UploadError::InvalidConfig(format!(
                "source holds {} bytes but the session declares {}",
                size,
                session.upload_length()
            )));
        }
        Ok(Self::with_session(session, source))
    }

    /// Save the upload URL under `key` as soon as it is created
    pub fn with_url_storage(mut self, storage: Arc<dyn UrlStorage>, key: impl Into<String>) -> Self {
        self.session = self.session.with_url_storage(storage, key);
        self
    }

    /// Stop between chunks once `token` is cancelled
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn session(&self) -> &UploadSession<T> {
        &self.session
    }

    pub fn into_session(self) -> UploadSession<T> {
        self.session
    }

    pub fn offset(&self) -> u64 {
        self.session.offset()
    }

    pub fn upload_url(&self) -> Option<&Url> {
        self.session.upload_url()
    }

    /// Attach an existing upload resource and learn its offset
    pub async fn resume_from(&mut self, url: Url) -> Result<u64, UploadError> {
        self.session.resume_from(url).await
    }

    fn resolve_stop_at(&self, stop_at: Option<u64>) -> Result<u64, UploadError> {
        let total = self.session.upload_length();
        match stop_at {
            None => Ok(total),
            Some(stop_at) if stop_at > total => Err(UploadError::InvalidConfig(format!(
                "stop_at {} exceeds upload length {}",
                stop_at, total
            ))),
            Some(stop_at) => Ok(stop_at),
        }
    }

    /// Transmit one chunk toward the current target
    pub async fn upload_chunk(&mut self) -> Result<u64, UploadError> {
        let stop_at = self.resolve_stop_at(self.stop_at)?;
        self.session.upload_chunk(&mut self.source, stop_at).await
    }

    /// Upload until the offset reaches `stop_at` (default: the whole artifact)
    pub async fn upload(&mut self, stop_at: Option<u64>) -> Result<(), UploadError> {
        self.upload_with_progress(stop_at, &mut |_: Progress| {}).await
    }

    /// Like [`upload`](Self::upload), notifying `observer` after each chunk
    pub async fn upload_with_progress<P: ProgressObserver + Send>(
        &mut self,
        stop_at: Option<u64>,
        observer: &mut P,
    ) -> Result<(), UploadError> {
        let stop_at = self.resolve_stop_at(stop_at)?;
        self.stop_at = Some(stop_at);

        // An empty artifact is complete as soon as its resource exists
        if self.session.upload_length() == 0 {
            self.session.ensure_url().await?;
        }

        let mut last_offset = self.session.offset();
        while self.session.offset() < stop_at {
            if let Some(token) = &self.cancel {
                if token.is_cancelled() {
                    tracing::info!(offset = self.session.offset(), "Upload cancelled");
                    return Err(UploadError::Cancelled {
                        offset: self.session.offset(),
                    });
                }
            }

            let advanced = self.session.upload_chunk(&mut self.source, stop_at).await?;
            if advanced == 0 && self.session.offset() < stop_at {
                return Err(UploadError::communication(format!(
                    "server accepted a chunk at offset {} without advancing",
                    self.session.offset()
                )));
            }

            let offset = self.session.offset();
            observer.on_progress(Progress {
                offset,
                delta: offset - last_offset,
                stop_at,
            });
            last_offset = offset;
        }

        tracing::info!(
            offset = self.session.offset(),
            upload_url = ?self.session.upload_url().map(Url::as_str),
            "Upload reached target offset"
        );
        Ok(())
    }
}
