//! Blocking drivers
//!
//! Each driver owns a current-thread Tokio runtime and blocks on the async
//! driver it wraps. They must not be used from inside an async context.

use bytes::Bytes;
use reqwest::Url;
use tokio::runtime::{Builder, Runtime};

use super::progress::ProgressObserver;
use super::stream::StreamUploader;
use super::uploader::Uploader;
use super::{UploadError, UploadOptions};
use crate::source::ChunkSource;
use crate::transport::Transport;

fn runtime() -> Result<Runtime, UploadError> {
    Ok(Builder::new_current_thread().enable_all().build()?)
}

/// Blocking pull-mode uploader
pub struct BlockingUploader<T, S> {
    inner: Uploader<T, S>,
    runtime: Runtime,
}

impl<T: Transport, S: ChunkSource> BlockingUploader<T, S> {
    pub fn new(
        transport: T,
        endpoint: Url,
        source: S,
        options: UploadOptions,
    ) -> Result<Self, UploadError> {
        Self::from_uploader(Uploader::new(transport, endpoint, source, options)?)
    }

    /// Wrap a configured async uploader
    pub fn from_uploader(inner: Uploader<T, S>) -> Result<Self, UploadError> {
        Ok(Self {
            inner,
            runtime: runtime()?,
        })
    }

    pub fn upload(&mut self, stop_at: Option<u64>) -> Result<(), UploadError> {
        self.runtime.block_on(self.inner.upload(stop_at))
    }

    pub fn upload_with_progress<P: ProgressObserver + Send>(
        &mut self,
        stop_at: Option<u64>,
        observer: &mut P,
    ) -> Result<(), UploadError> {
        self.runtime
            .block_on(self.inner.upload_with_progress(stop_at, observer))
    }

    pub fn upload_chunk(&mut self) -> Result<u64, UploadError> {
        self.runtime.block_on(self.inner.upload_chunk())
    }

    pub fn resume_from(&mut self, url: Url) -> Result<u64, UploadError> {
        self.runtime.block_on(self.inner.resume_from(url))
    }

    pub fn offset(&self) -> u64 {
        self.inner.offset()
    }

    pub fn upload_url(&self) -> Option<&Url> {
        self.inner.upload_url()
    }

    pub fn into_inner(self) -> Uploader<T, S> {
        self.inner
    }
}

/// Blocking push-mode uploader
pub struct BlockingStreamUploader<T> {
    inner: StreamUploader<T>,
    runtime: Runtime,
}

impl<T: Transport> BlockingStreamUploader<T> {
    pub fn new(
        transport: T,
        endpoint: Url,
        upload_length: u64,
        options: UploadOptions,
    ) -> Result<Self, UploadError> {
        Self::from_uploader(StreamUploader::new(
            transport,
            endpoint,
            upload_length,
            options,
        )?)
    }

    pub fn from_uploader(inner: StreamUploader<T>) -> Result<Self, UploadError> {
        Ok(Self {
            inner,
            runtime: runtime()?,
        })
    }

    pub fn set_chunk(&mut self, chunk: impl Into<Bytes>) {
        self.inner.set_chunk(chunk);
    }

    pub fn upload_chunk(&mut self) -> Result<u64, UploadError> {
        self.runtime.block_on(self.inner.upload_chunk())
    }

    pub fn resume_from(&mut self, url: Url) -> Result<u64, UploadError> {
        self.runtime.block_on(self.inner.resume_from(url))
    }

    pub fn is_complete(&self) -> bool {
        self.inner.is_complete()
    }

    pub fn offset(&self) -> u64 {
        self.inner.offset()
    }

    pub fn upload_url(&self) -> Option<&Url> {
        self.inner.upload_url()
    }

    pub fn into_inner(self) -> StreamUploader<T> {
        self.inner
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::MemorySource;
    use crate::upload::testing::{created, offset_response, status, ScriptedTransport};
    use crate::upload::Progress;
    use reqwest::Method;
    use std::time::Duration;

    fn endpoint() -> Url {
        Url::parse("http://tus.test/files/").unwrap()
    }

    #[test]
    fn test_blocking_upload() {
        let transport = ScriptedTransport::new(vec![
            created("/files/b"),
            offset_response(204, 2),
            offset_response(204, 4),
        ]);
        let mut uploader = BlockingUploader::new(
            transport.clone(),
            endpoint(),
            MemorySource::new(&b"abcd"[..]),
            UploadOptions::default().chunk_size(2),
        )
        .unwrap();

        let mut offsets = Vec::new();
        uploader
            .upload_with_progress(None, &mut |p: Progress| offsets.push(p.offset))
            .unwrap();

        assert_eq!(offsets, vec![2, 4]);
        assert_eq!(uploader.upload_url().unwrap().as_str(), "http://tus.test/files/b");
        assert_eq!(transport.count(Method::PATCH), 2);
    }

    #[test]
    fn test_blocking_retry_exhaustion() {
        let transport = ScriptedTransport::new(vec![
            created("/files/b"),
            status(500),
            offset_response(200, 0),
            status(503),
        ]);
        let mut uploader = BlockingUploader::new(
            transport,
            endpoint(),
            MemorySource::new(&b"abcd"[..]),
            UploadOptions::default()
                .retries(1)
                .retry_delay(Duration::ZERO),
        )
        .unwrap();

        let err = uploader.upload(None).unwrap_err();
        assert_eq!(err.status(), Some(503));
        assert_eq!(uploader.offset(), 0);
    }

    #[test]
    fn test_blocking_stream() {
        let transport = ScriptedTransport::new(vec![created("/files/b"), offset_response(204, 3)]);
        let mut uploader =
            BlockingStreamUploader::new(transport, endpoint(), 3, UploadOptions::default())
                .unwrap();

        uploader.set_chunk(&b"xyz"[..]);
        assert_eq!(uploader.upload_chunk().unwrap(), 3);
        assert!(uploader.is_complete());
    }
}
