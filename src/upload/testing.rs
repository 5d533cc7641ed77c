//! Scripted transport shared by the upload unit tests

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use reqwest::header::{HeaderMap, HeaderValue, LOCATION};
use reqwest::Method;
use std::collections::VecDeque;
use std::sync::Arc;

use crate::protocol::UPLOAD_OFFSET;
use crate::transport::{HttpRequest, HttpResponse, Transport, TransportError};

/// Replays canned responses in order and records every request
pub struct ScriptedTransport {
    script: Mutex<VecDeque<Result<HttpResponse, TransportError>>>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl ScriptedTransport {
    pub fn new(script: Vec<Result<HttpResponse, TransportError>>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().clone()
    }

    pub fn count(&self, method: Method) -> usize {
        self.requests
            .lock()
            .iter()
            .filter(|r| r.method == method)
            .count()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let description = format!("{} {}", request.method, request.url);
        self.requests.lock().push(request);
        self.script
            .lock()
            .pop_front()
            .unwrap_or_else(|| panic!("unexpected request: {}", description))
    }
}

pub fn status(status: u16) -> Result<HttpResponse, TransportError> {
    Ok(HttpResponse {
        status,
        headers: HeaderMap::new(),
        body: Bytes::from_static(b"scripted body"),
    })
}

pub fn created(location: &'static str) -> Result<HttpResponse, TransportError> {
    let mut headers = HeaderMap::new();
    headers.insert(LOCATION, HeaderValue::from_static(location));
    Ok(HttpResponse {
        status: 201,
        headers,
        body: Bytes::new(),
    })
}

pub fn offset_response(status: u16, offset: u64) -> Result<HttpResponse, TransportError> {
    let mut headers = HeaderMap::new();
    headers.insert(UPLOAD_OFFSET, HeaderValue::from(offset));
    Ok(HttpResponse {
        status,
        headers,
        body: Bytes::new(),
    })
}
