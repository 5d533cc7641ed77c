//! tus protocol helpers
//!
//! Header names, the `Upload-Metadata` encoding and the small parsers the
//! upload engine needs to read server responses.
//!
//! | Header | Direction | Used by |
//! |--------|-----------|---------|
//! | `Tus-Resumable` | request | every call |
//! | `Upload-Length` | request | creation |
//! | `Upload-Metadata` | request | creation |
//! | `Upload-Offset` | both | chunk transmission, offset query |
//! | `Upload-Checksum` | request | chunk transmission (checksum extension) |
//! | `Location` | response | creation |

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, LOCATION};
use reqwest::Url;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use thiserror::Error;

/// Protocol version sent in `Tus-Resumable`
pub const TUS_VERSION: &str = "1.0.0";

pub const TUS_RESUMABLE: HeaderName = HeaderName::from_static("tus-resumable");
pub const UPLOAD_OFFSET: HeaderName = HeaderName::from_static("upload-offset");
pub const UPLOAD_LENGTH: HeaderName = HeaderName::from_static("upload-length");
pub const UPLOAD_METADATA: HeaderName = HeaderName::from_static("upload-metadata");
pub const UPLOAD_CHECKSUM: HeaderName = HeaderName::from_static("upload-checksum");

/// Content type required on chunk transmission requests
pub const OFFSET_OCTET_STREAM: &str = "application/offset+octet-stream";

/// Protocol-level errors raised while building requests or reading responses
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Missing '{0}' header")]
    MissingHeader(&'static str),

    #[error("Malformed '{name}' header: {value:?}")]
    MalformedHeader { name: &'static str, value: String },

    #[error("Invalid metadata key {0:?}: keys must be non-empty without spaces or commas")]
    InvalidMetadataKey(String),

    #[error("Invalid upload location {location:?}: {reason}")]
    InvalidLocation { location: String, reason: String },
}

/// Encode metadata pairs as an `Upload-Metadata` header value.
///
/// Each pair becomes `key base64(value)`, pairs are comma separated. An empty
/// value is sent as the bare key. Returns `None` for an empty map so callers
/// can omit the header entirely.
pub fn encode_metadata(
    metadata: &BTreeMap<String, String>,
) -> Result<Option<HeaderValue>, ProtocolError> {
    if metadata.is_empty() {
        return Ok(None);
    }

    let mut pairs = Vec::with_capacity(metadata.len());
    for (key, value) in metadata {
        if key.is_empty() || key.contains(' ') || key.contains(',') || !key.is_ascii() {
            return Err(ProtocolError::InvalidMetadataKey(key.clone()));
        }
        if value.is_empty() {
            pairs.push(key.clone());
        } else {
            pairs.push(format!("{} {}", key, STANDARD.encode(value.as_bytes())));
        }
    }

    HeaderValue::from_str(&pairs.join(","))
        .map(Some)
        .map_err(|_| ProtocolError::InvalidMetadataKey(pairs.join(",")))
}

/// Read the `Upload-Offset` header as a byte offset
pub fn parse_offset(headers: &HeaderMap) -> Result<u64, ProtocolError> {
    let value = headers
        .get(&UPLOAD_OFFSET)
        .ok_or(ProtocolError::MissingHeader("upload-offset"))?;

    let malformed = || ProtocolError::MalformedHeader {
        name: "upload-offset",
        value: String::from_utf8_lossy(value.as_bytes()).into_owned(),
    };

    value
        .to_str()
        .map_err(|_| malformed())?
        .trim()
        .parse::<u64>()
        .map_err(|_| malformed())
}

/// Resolve the `Location` header of a creation response against the endpoint.
///
/// Servers may answer with an absolute URL or a path relative to the
/// creation endpoint.
pub fn resolve_location(endpoint: &Url, headers: &HeaderMap) -> Result<Url, ProtocolError> {
    let value = headers
        .get(LOCATION)
        .ok_or(ProtocolError::MissingHeader("location"))?;

    let location = value
        .to_str()
        .map_err(|_| ProtocolError::MalformedHeader {
            name: "location",
            value: String::from_utf8_lossy(value.as_bytes()).into_owned(),
        })?;

    endpoint
        .join(location)
        .map_err(|e| ProtocolError::InvalidLocation {
            location: location.to_string(),
            reason: e.to_string(),
        })
}

/// Build an `Upload-Checksum` value (`sha256 <base64 digest>`) for a chunk
pub fn checksum_header(chunk: &[u8]) -> HeaderValue {
    let digest = Sha256::digest(chunk);
    let value = format!("sha256 {}", STANDARD.encode(digest));
    // base64 output is always a valid header value
    HeaderValue::from_str(&value).unwrap_or_else(|_| HeaderValue::from_static("sha256"))
}
