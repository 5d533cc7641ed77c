//! Upload session state machine
//!
//! ```text
//! NO_URL ──create──▶ URL_CREATED ──▶ TRANSMITTING ──204──▶ VERIFIED
//!                                        ▲    │
//!                                        │  failure
//!                          resync offset │    ▼
//!                                    RECOVERING ──budget spent──▶ ABORTED
//! ```
//!
//! One attempt counter per `upload_chunk` call covers both failed
//! transmissions and failed offset queries, so a server that keeps failing
//! the `HEAD` cannot stretch recovery past the configured retry limit.

use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::{Method, Url};
use std::io;
use std::sync::Arc;
use std::time::Instant;

use super::request::UploadRequest;
use super::{UploadError, UploadOptions};
use crate::metrics;
use crate::protocol::{self, TUS_RESUMABLE, TUS_VERSION, UPLOAD_LENGTH, UPLOAD_METADATA};
use crate::source::ChunkSource;
use crate::storage::UrlStorage;
use crate::transport::{HttpRequest, Transport};

/// Supplies the bytes for one transmission step
pub(crate) trait ChunkFeed: Send {
    /// Bytes to send starting at `offset`, or `None` when the step is done
    fn chunk_at(&mut self, offset: u64) -> Result<Option<Bytes>, UploadError>;
}

/// Pull mode: read from a source, never past `stop_at`
struct PullFeed<'a, S: ?Sized> {
    source: &'a mut S,
    chunk_size: usize,
    stop_at: u64,
}

impl<S: ChunkSource + ?Sized> ChunkFeed for PullFeed<'_, S> {
    fn chunk_at(&mut self, offset: u64) -> Result<Option<Bytes>, UploadError> {
        if offset >= self.stop_at {
            return Ok(None);
        }

        let remaining = self.stop_at - offset;
        let len = usize::try_from(remaining).map_or(self.chunk_size, |r| r.min(self.chunk_size));
        let chunk = self.source.read(offset, len)?;
        if chunk.is_empty() {
            return Err(UploadError::IoError(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("chunk source ended at offset {} before {}", offset, self.stop_at),
            )));
        }
        Ok(Some(chunk))
    }
}

/// Stream mode: a caller-supplied chunk that started at `start`
struct PushFeed {
    start: u64,
    chunk: Bytes,
}

impl ChunkFeed for PushFeed {
    fn chunk_at(&mut self, offset: u64) -> Result<Option<Bytes>, UploadError> {
        let end = self.start + self.chunk.len() as u64;
        if offset >= end {
            return Ok(None);
        }
        // After a resync only the unpersisted tail is resent
        let skip = offset.saturating_sub(self.start) as usize;
        Ok(Some(self.chunk.slice(skip..)))
    }
}

/// Resumable upload of one artifact
pub struct UploadSession<T> {
    transport: T,
    endpoint: Url,
    upload_url: Option<Url>,
    offset: u64,
    upload_length: u64,
    options: UploadOptions,
    url_storage: Option<(Arc<dyn UrlStorage>, String)>,
}

impl<T: Transport> UploadSession<T> {
    /// Create a session for an artifact of `upload_length` bytes.
    ///
    /// No request is made until the first chunk or an explicit
    /// [`ensure_url`](Self::ensure_url).
    pub fn new(
        transport: T,
        endpoint: Url,
        upload_length: u64,
        options: UploadOptions,
    ) -> Result<Self, UploadError> {
        options.validate()?;
        protocol::encode_metadata(&options.metadata)
            .map_err(|e| UploadError::InvalidConfig(e.to_string()))?;

        Ok(Self {
            transport,
            endpoint,
            upload_url: None,
            offset: 0,
            upload_length,
            options,
            url_storage: None,
        })
    }

    /// Save the upload URL under `key` as soon as it is created
    pub fn with_url_storage(mut self, storage: Arc<dyn UrlStorage>, key: impl Into<String>) -> Self {
        self.url_storage = Some((storage, key.into()));
        self
    }

    /// Bytes confirmed persisted by the server
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Upload resource URL, once created or resumed
    pub fn upload_url(&self) -> Option<&Url> {
        self.upload_url.as_ref()
    }

    /// Creation endpoint
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Declared total size of the artifact
    pub fn upload_length(&self) -> u64 {
        self.upload_length
    }

    fn base_headers(&self) -> HeaderMap {
        let mut headers = self.options.headers.clone();
        headers.insert(TUS_RESUMABLE, HeaderValue::from_static(TUS_VERSION));
        headers
    }

    /// Create the upload resource unless the session already has one.
    ///
    /// A missing `Location` header or a transport failure is a
    /// [`UploadError::CommunicationError`] and is not retried here.
    pub async fn ensure_url(&mut self) -> Result<&Url, UploadError> {
        if self.upload_url.is_none() {
            let url = self.create_url().await?;
            metrics::record_upload_created();
            tracing::info!(upload_url = %url, upload_length = self.upload_length, "Created upload resource");

            self.upload_url = Some(url.clone());
            self.offset = 0;

            if let Some((storage, key)) = &self.url_storage {
                storage.set_url(key, &url)?;
            }
        }

        self.upload_url
            .as_ref()
            .ok_or_else(|| UploadError::communication("upload URL missing after creation"))
    }

    #[tracing::instrument(
        name = "tus.create",
        skip(self),
        fields(
            tus.endpoint = %self.endpoint,
            tus.upload_length = self.upload_length,
            http.status_code = tracing::field::Empty
        ),
        err
    )]
    async fn create_url(&self) -> Result<Url, UploadError> {
        let mut headers = self.base_headers();
        headers.insert(UPLOAD_LENGTH, HeaderValue::from(self.upload_length));
        if let Some(metadata) = protocol::encode_metadata(&self.options.metadata)
            .map_err(|e| UploadError::InvalidConfig(e.to_string()))?
        {
            headers.insert(UPLOAD_METADATA, metadata);
        }

        let request = HttpRequest::new(Method::POST, self.endpoint.clone())
            .headers(headers)
            .body(Bytes::new());

        let response = self
            .transport
            .execute(request)
            .await
            .map_err(|e| UploadError::communication(e.to_string()))?;

        tracing::Span::current().record("http.status_code", response.status);

        protocol::resolve_location(&self.endpoint, &response.headers).map_err(|e| {
            UploadError::CommunicationError {
                message: format!(
                    "Attempt to retrieve create file url with status {}: {}",
                    response.status, e
                ),
                status: Some(response.status),
                body: response.body,
            }
        })
    }

    /// Ask the server how many bytes it holds for the current upload URL
    pub async fn query_offset(&self) -> Result<u64, UploadError> {
        let url = self
            .upload_url
            .as_ref()
            .ok_or_else(|| UploadError::InvalidConfig("no upload URL to query".into()))?;
        self.offset_at(url).await
    }

    #[tracing::instrument(
        name = "tus.head",
        skip(self),
        fields(http.status_code = tracing::field::Empty),
        err
    )]
    async fn offset_at(&self, url: &Url) -> Result<u64, UploadError> {
        let request = HttpRequest::new(Method::HEAD, url.clone()).headers(self.base_headers());

        let response = self
            .transport
            .execute(request)
            .await
            .map_err(|e| UploadError::communication(e.to_string()))?;

        tracing::Span::current().record("http.status_code", response.status);

        protocol::parse_offset(&response.headers).map_err(|e| UploadError::CommunicationError {
            message: format!(
                "Attempt to retrieve offset fails with status {}: {}",
                response.status, e
            ),
            status: Some(response.status),
            body: response.body,
        })
    }

    /// Attach an existing upload resource and learn its offset.
    ///
    /// A session already bound to a different URL rejects the call; the
    /// upload URL is never replaced.
    pub async fn resume_from(&mut self, url: Url) -> Result<u64, UploadError> {
        if let Some(existing) = &self.upload_url {
            if existing != &url {
                return Err(UploadError::InvalidConfig(format!(
                    "session already bound to {}, cannot resume {}",
                    existing, url
                )));
            }
        }

        let server_offset = self.offset_at(&url).await?;
        if self.upload_url.is_none() {
            if server_offset > self.upload_length {
                return Err(UploadError::communication(format!(
                    "server offset {} exceeds upload length {}",
                    server_offset, self.upload_length
                )));
            }
            self.upload_url = Some(url);
            self.offset = server_offset;
        } else {
            self.advance(server_offset, self.upload_length)?;
        }

        metrics::record_upload_resumed();
        tracing::info!(offset = self.offset, "Resumed upload");
        Ok(self.offset)
    }

    /// Transmit the next pull-mode chunk, reading from `source`.
    ///
    /// Returns the number of bytes the confirmed offset advanced by.
    pub async fn upload_chunk<S: ChunkSource + ?Sized>(
        &mut self,
        source: &mut S,
        stop_at: u64,
    ) -> Result<u64, UploadError> {
        if stop_at > self.upload_length {
            return Err(UploadError::InvalidConfig(format!(
                "stop_at {} exceeds upload length {}",
                stop_at, self.upload_length
            )));
        }

        let mut feed = PullFeed {
            source,
            chunk_size: self.options.chunk_size,
            stop_at,
        };
        self.transmit(&mut feed, stop_at).await
    }

    /// Transmit a caller-supplied chunk starting at the current offset
    pub async fn upload_stream_chunk(&mut self, chunk: Bytes) -> Result<u64, UploadError> {
        // The start is only known once the URL exists (creation resets it)
        self.ensure_url().await?;
        let start = self.offset;
        self.upload_pushed(start, chunk).await
    }

    /// Transmit the part of `chunk` (which begins at `start`) the server
    /// does not hold yet
    pub(crate) async fn upload_pushed(&mut self, start: u64, chunk: Bytes) -> Result<u64, UploadError> {
        if start > self.offset {
            return Err(UploadError::InvalidConfig(format!(
                "chunk starts at {} beyond the confirmed offset {}",
                start, self.offset
            )));
        }
        if start + chunk.len() as u64 > self.upload_length {
            return Err(UploadError::InvalidConfig(format!(
                "chunk of {} bytes at offset {} exceeds upload length {}",
                chunk.len(),
                start,
                self.upload_length
            )));
        }

        let mut feed = PushFeed { start, chunk };
        let limit = self.upload_length;
        self.transmit(&mut feed, limit).await
    }

    #[tracing::instrument(
        name = "tus.upload_chunk",
        skip_all,
        fields(tus.offset = self.offset, tus.limit = limit),
        err
    )]
    async fn transmit<F: ChunkFeed>(&mut self, feed: &mut F, limit: u64) -> Result<u64, UploadError> {
        let result = self.transmit_inner(feed, limit).await;
        if let Err(e) = &result {
            metrics::record_error(e.kind());
        }
        result
    }

    async fn transmit_inner<F: ChunkFeed>(
        &mut self,
        feed: &mut F,
        limit: u64,
    ) -> Result<u64, UploadError> {
        self.ensure_url().await?;

        let start_offset = self.offset;
        let mut attempts_used: u32 = 0;

        while let Some(chunk) = feed.chunk_at(self.offset)? {
            let started = Instant::now();
            match self.attempt(chunk).await {
                Ok(reported) => {
                    let previous = self.offset;
                    self.advance(reported, limit)?;
                    metrics::record_chunk_success(
                        self.offset - previous,
                        started.elapsed().as_secs_f64(),
                    );
                    tracing::debug!(
                        offset = self.offset,
                        advanced = self.offset - previous,
                        "Chunk verified"
                    );
                    break;
                }
                Err(failure @ UploadError::UploadFailed { .. }) => {
                    metrics::record_chunk_failure(started.elapsed().as_secs_f64());
                    self.recover(&mut attempts_used, failure, limit).await?;
                }
                Err(e) => return Err(e),
            }
        }

        Ok(self.offset - start_offset)
    }

    async fn attempt(&self, chunk: Bytes) -> Result<u64, UploadError> {
        let url = self
            .upload_url
            .as_ref()
            .ok_or_else(|| UploadError::communication("upload URL not set"))?;

        UploadRequest::new(url, self.offset, &self.options)
            .perform(&self.transport, chunk)
            .await?
            .verify()?
            .upload_offset()
    }

    /// Wait, resync the offset and hand control back for a retransmission.
    ///
    /// Returns the triggering failure once `attempts_used` reaches the limit.
    async fn recover(
        &mut self,
        attempts_used: &mut u32,
        failure: UploadError,
        limit: u64,
    ) -> Result<(), UploadError> {
        loop {
            if *attempts_used >= self.options.retries {
                tracing::warn!(
                    error = %failure,
                    retries = self.options.retries,
                    offset = self.offset,
                    "Retry budget exhausted"
                );
                return Err(failure);
            }

            tracing::warn!(
                error = %failure,
                attempt = *attempts_used + 1,
                retries = self.options.retries,
                delay_ms = self.options.retry_delay.as_millis() as u64,
                "Chunk transmission failed, recovering"
            );
            tokio::time::sleep(self.options.retry_delay).await;
            *attempts_used += 1;
            metrics::record_retry();

            match self.query_offset().await {
                Ok(server_offset) => return self.advance(server_offset, limit),
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        attempt = *attempts_used,
                        "Offset query failed during recovery"
                    );
                }
            }
        }
    }

    /// Move the offset to a server-reported value.
    ///
    /// The offset never decreases and never passes `limit`; a server that
    /// reports otherwise is violating the protocol.
    fn advance(&mut self, reported: u64, limit: u64) -> Result<(), UploadError> {
        if reported < self.offset {
            return Err(UploadError::communication(format!(
                "server offset regressed from {} to {}",
                self.offset, reported
            )));
        }
        if reported > limit {
            return Err(UploadError::communication(format!(
                "server offset {} is beyond the upload target {}",
                reported, limit
            )));
        }
        self.offset = reported;
        Ok(())
    }
}
