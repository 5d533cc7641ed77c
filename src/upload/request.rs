//! Single chunk transmission
//!
//! An [`UploadRequest`] is one `PATCH` attempt. It carries no retry logic
//! and never touches session state; the session decides what a failure means.

use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use reqwest::{Method, Url};

use super::{UploadError, UploadOptions};
use crate::protocol::{
    self, OFFSET_OCTET_STREAM, TUS_RESUMABLE, TUS_VERSION, UPLOAD_CHECKSUM, UPLOAD_OFFSET,
};
use crate::transport::{HttpRequest, Transport};

/// Status code of a verified chunk transmission
pub const SUCCESS_STATUS: u16 = 204;

/// One chunk transmission attempt
#[derive(Debug)]
pub struct UploadRequest<'a> {
    url: &'a Url,
    offset: u64,
    options: &'a UploadOptions,
}

impl<'a> UploadRequest<'a> {
    /// Prepare a transmission of a chunk that starts at `offset`
    pub fn new(url: &'a Url, offset: u64, options: &'a UploadOptions) -> Self {
        Self {
            url,
            offset,
            options,
        }
    }

    fn headers(&self, chunk: &[u8]) -> HeaderMap {
        let mut headers = self.options.headers.clone();
        headers.insert(TUS_RESUMABLE, HeaderValue::from_static(TUS_VERSION));
        headers.insert(UPLOAD_OFFSET, HeaderValue::from(self.offset));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(OFFSET_OCTET_STREAM));
        if self.options.upload_checksum {
            headers.insert(UPLOAD_CHECKSUM, protocol::checksum_header(chunk));
        }
        headers
    }

    /// Send `chunk` and return this attempt's response.
    ///
    /// A connection-level failure is reported as [`UploadError::UploadFailed`]
    /// without a status so the caller's recovery path handles it like any
    /// other failed transmission.
    #[tracing::instrument(
        name = "tus.patch",
        skip(self, transport, chunk),
        fields(
            tus.url = %self.url,
            tus.offset = self.offset,
            upload.bytes = chunk.len(),
            http.status_code = tracing::field::Empty
        )
    )]
    pub async fn perform<T: Transport + ?Sized>(
        &self,
        transport: &T,
        chunk: Bytes,
    ) -> Result<UploadResponse, UploadError> {
        let request = HttpRequest::new(Method::PATCH, self.url.clone())
            .headers(self.headers(&chunk))
            .body(chunk);

        let response = transport
            .execute(request)
            .await
            .map_err(|e| UploadError::UploadFailed {
                reason: e.to_string(),
                status: None,
                body: Bytes::new(),
            })?;

        tracing::Span::current().record("http.status_code", response.status);

        Ok(UploadResponse {
            status_code: response.status,
            headers: response.headers,
            body: response.body,
        })
    }
}

/// Outcome of one transmission attempt
#[derive(Debug, Clone)]
pub struct UploadResponse {
    pub status_code: u16,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl UploadResponse {
    /// Accept only `204 No Content`; every other status is a failed upload
    pub fn verify(self) -> Result<Self, UploadError> {
        if self.status_code == SUCCESS_STATUS {
            Ok(self)
        } else {
            Err(UploadError::UploadFailed {
                reason: format!("unexpected status {}", self.status_code),
                status: Some(self.status_code),
                body: self.body,
            })
        }
    }

    /// Offset the server reports as persisted after this attempt
    pub fn upload_offset(&self) -> Result<u64, UploadError> {
        protocol::parse_offset(&self.headers).map_err(|e| UploadError::CommunicationError {
            message: e.to_string(),
            status: Some(self.status_code),
            body: self.body.clone(),
        })
    }
}
