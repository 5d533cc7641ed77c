//! Upload Flow Integration Tests
//!
//! Drives the uploaders through the real HTTP transport against a mock tus
//! server and checks the requests that reach the wire.

#[cfg(test)]
mod tests {
    use reqwest::Url;
    use std::sync::Arc;
    use std::time::Duration;
    use tus_uploadr::source::MemorySource;
    use tus_uploadr::storage::{MemoryUrlStorage, UrlStorage};
    use tus_uploadr::transport::{HttpTransport, HttpTransportConfig};
    use tus_uploadr::upload::{
        BlockingUploader, Progress, StreamUploader, UploadError, UploadOptions, Uploader,
    };
    use wiremock::matchers::{header, header_exists, method, path};
    use wiremock::{Mock, MockServer, Request, ResponseTemplate};

    fn transport() -> HttpTransport {
        HttpTransport::new(HttpTransportConfig {
            timeout: Some(Duration::from_secs(10)),
            connect_timeout: Some(Duration::from_secs(2)),
        })
        .unwrap()
    }

    fn endpoint(server: &MockServer) -> Url {
        Url::parse(&format!("{}/files/", server.uri())).unwrap()
    }

    fn options() -> UploadOptions {
        UploadOptions::default()
            .chunk_size(1000)
            .retry_delay(Duration::ZERO)
    }

    fn created(location: &str) -> ResponseTemplate {
        ResponseTemplate::new(201).insert_header("Location", location)
    }

    fn accepted(offset: u64) -> ResponseTemplate {
        ResponseTemplate::new(204).insert_header("Upload-Offset", offset.to_string().as_str())
    }

    async fn mount_creation(server: &MockServer, expected: u64) {
        Mock::given(method("POST"))
            .and(path("/files/"))
            .and(header("tus-resumable", "1.0.0"))
            .respond_with(created("/files/abc"))
            .expect(expected)
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_three_chunk_upload() {
        let server = MockServer::start().await;
        mount_creation(&server, 1).await;

        for offset in [0u64, 1000, 2000] {
            Mock::given(method("PATCH"))
                .and(path("/files/abc"))
                .and(header("upload-offset", offset.to_string().as_str()))
                .and(header("content-type", "application/offset+octet-stream"))
                .and(header("tus-resumable", "1.0.0"))
                .and(|req: &Request| req.body.len() == 1000)
                .respond_with(accepted(offset + 1000))
                .expect(1)
                .mount(&server)
                .await;
        }

        let mut uploader = Uploader::new(
            transport(),
            endpoint(&server),
            MemorySource::new(vec![7u8; 3000]),
            options(),
        )
        .unwrap();

        let mut offsets = Vec::new();
        uploader
            .upload_with_progress(None, &mut |p: Progress| offsets.push(p.offset))
            .await
            .unwrap();

        assert_eq!(uploader.offset(), 3000);
        assert_eq!(offsets, vec![1000, 2000, 3000]);
        assert_eq!(
            uploader.upload_url().unwrap().as_str(),
            format!("{}/files/abc", server.uri())
        );
    }

    #[tokio::test]
    async fn test_creation_headers() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(header("upload-length", "4"))
            .and(|req: &Request| {
                req.headers
                    .get("upload-metadata")
                    .and_then(|v| v.to_str().ok())
                    == Some("filename ZmlsZS5iaW4=,filetype dmlkZW8vbXA0")
            })
            .and(header("authorization", "Bearer secret"))
            .respond_with(created("/files/abc"))
            .expect(1)
            .mount(&server)
            .await;

        Mock::given(method("PATCH"))
            .and(header("authorization", "Bearer secret"))
            .and(header_exists("upload-checksum"))
            .respond_with(accepted(4))
            .expect(1)
            .mount(&server)
            .await;

        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(reqwest::header::AUTHORIZATION, "Bearer secret".parse().unwrap());
        let options = options()
            .metadata("filename", "file.bin")
            .metadata("filetype", "video/mp4")
            .headers(headers)
            .upload_checksum(true);

        let mut uploader = Uploader::new(
            transport(),
            endpoint(&server),
            MemorySource::new(&b"data"[..]),
            options,
        )
        .unwrap();
        uploader.upload(None).await.unwrap();
    }

    #[tokio::test]
    async fn test_missing_location_stops_before_patch() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(201).set_body_string("no location"))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("PATCH"))
            .respond_with(accepted(1000))
            .expect(0)
            .mount(&server)
            .await;

        let mut uploader = Uploader::new(
            transport(),
            endpoint(&server),
            MemorySource::new(vec![0u8; 1000]),
            options(),
        )
        .unwrap();

        let err = uploader.upload(None).await.unwrap_err();
        match err {
            UploadError::CommunicationError { status, body, .. } => {
                assert_eq!(status, Some(201));
                assert_eq!(&body[..], b"no location");
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert!(uploader.upload_url().is_none());
    }

    #[tokio::test]
    async fn test_conflict_recovers_from_server_offset() {
        let server = MockServer::start().await;
        mount_creation(&server, 1).await;

        Mock::given(method("PATCH"))
            .and(header("upload-offset", "0"))
            .respond_with(ResponseTemplate::new(409))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("HEAD"))
            .and(path("/files/abc"))
            .and(header("tus-resumable", "1.0.0"))
            .respond_with(ResponseTemplate::new(200).insert_header("Upload-Offset", "200"))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("PATCH"))
            .and(header("upload-offset", "200"))
            .and(|req: &Request| req.body.len() == 800)
            .respond_with(accepted(1000))
            .expect(1)
            .mount(&server)
            .await;

        let mut uploader = Uploader::new(
            transport(),
            endpoint(&server),
            MemorySource::new(vec![1u8; 1000]),
            options().retries(1),
        )
        .unwrap();

        uploader.upload(None).await.unwrap();
        assert_eq!(uploader.offset(), 1000);
    }

    #[tokio::test]
    async fn test_retry_budget_is_exhausted() {
        let server = MockServer::start().await;
        mount_creation(&server, 1).await;

        Mock::given(method("PATCH"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .expect(3)
            .mount(&server)
            .await;
        Mock::given(method("HEAD"))
            .respond_with(ResponseTemplate::new(200).insert_header("Upload-Offset", "0"))
            .expect(2)
            .mount(&server)
            .await;

        let mut uploader = Uploader::new(
            transport(),
            endpoint(&server),
            MemorySource::new(vec![1u8; 1000]),
            options().retries(2),
        )
        .unwrap();

        let err = uploader.upload(None).await.unwrap_err();
        assert!(matches!(err, UploadError::UploadFailed { .. }));
        assert_eq!(err.status(), Some(500));
        assert_eq!(err.body().map(|b| &b[..]), Some(&b"boom"[..]));
        assert_eq!(uploader.offset(), 0);
    }

    #[tokio::test]
    async fn test_server_offset_is_trusted() {
        let server = MockServer::start().await;
        mount_creation(&server, 1).await;

        Mock::given(method("PATCH"))
            .and(header("upload-offset", "0"))
            .respond_with(accepted(512))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("PATCH"))
            .and(header("upload-offset", "512"))
            .and(|req: &Request| req.body.len() == 488)
            .respond_with(accepted(1000))
            .expect(1)
            .mount(&server)
            .await;

        let mut uploader = Uploader::new(
            transport(),
            endpoint(&server),
            MemorySource::new(vec![2u8; 1000]),
            options(),
        )
        .unwrap();

        uploader.upload(None).await.unwrap();
        assert_eq!(uploader.offset(), 1000);
    }

    #[tokio::test]
    async fn test_resume_from_stored_url() {
        let server = MockServer::start().await;
        mount_creation(&server, 0).await;

        Mock::given(method("HEAD"))
            .and(path("/files/abc"))
            .respond_with(ResponseTemplate::new(200).insert_header("Upload-Offset", "1500"))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("PATCH"))
            .and(header("upload-offset", "1500"))
            .respond_with(accepted(2500))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("PATCH"))
            .and(header("upload-offset", "2500"))
            .respond_with(accepted(3000))
            .expect(1)
            .mount(&server)
            .await;

        let storage = Arc::new(MemoryUrlStorage::new());
        let stored = Url::parse(&format!("{}/files/abc", server.uri())).unwrap();
        storage.set_url("fingerprint", &stored).unwrap();

        let mut uploader = Uploader::new(
            transport(),
            endpoint(&server),
            MemorySource::new(vec![3u8; 3000]),
            options(),
        )
        .unwrap();

        let url = storage.get_url("fingerprint").unwrap().unwrap();
        assert_eq!(uploader.resume_from(url).await.unwrap(), 1500);
        uploader.upload(None).await.unwrap();
        assert_eq!(uploader.offset(), 3000);
    }

    #[tokio::test]
    async fn test_created_url_is_stored() {
        let server = MockServer::start().await;
        mount_creation(&server, 1).await;
        Mock::given(method("PATCH"))
            .respond_with(accepted(10))
            .mount(&server)
            .await;

        let storage = Arc::new(MemoryUrlStorage::new());
        let mut uploader = Uploader::new(
            transport(),
            endpoint(&server),
            MemorySource::new(vec![0u8; 10]),
            options(),
        )
        .unwrap()
        .with_url_storage(storage.clone(), "key");

        uploader.upload(None).await.unwrap();
        assert_eq!(
            storage.get_url("key").unwrap().unwrap().as_str(),
            format!("{}/files/abc", server.uri())
        );
    }

    #[tokio::test]
    async fn test_stream_upload() {
        let server = MockServer::start().await;
        mount_creation(&server, 1).await;

        Mock::given(method("PATCH"))
            .and(header("upload-offset", "0"))
            .and(|req: &Request| req.body == b"hello ")
            .respond_with(accepted(6))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("PATCH"))
            .and(header("upload-offset", "6"))
            .and(|req: &Request| req.body == b"world")
            .respond_with(accepted(11))
            .expect(1)
            .mount(&server)
            .await;

        let mut uploader =
            StreamUploader::new(transport(), endpoint(&server), 11, options()).unwrap();

        uploader.set_chunk(&b"hello "[..]);
        uploader.upload_chunk().await.unwrap();
        uploader.set_chunk(&b"world"[..]);
        uploader.upload_chunk().await.unwrap();

        assert!(uploader.is_complete());
    }

    #[tokio::test]
    async fn test_blocking_uploader() {
        let server = MockServer::start().await;
        mount_creation(&server, 1).await;
        Mock::given(method("PATCH"))
            .and(header("upload-offset", "0"))
            .respond_with(accepted(1000))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("PATCH"))
            .and(header("upload-offset", "1000"))
            .respond_with(accepted(1500))
            .expect(1)
            .mount(&server)
            .await;

        let endpoint = endpoint(&server);
        let offset = tokio::task::spawn_blocking(move || {
            let mut uploader = BlockingUploader::new(
                transport(),
                endpoint,
                MemorySource::new(vec![4u8; 1500]),
                options(),
            )
            .unwrap();
            uploader.upload(None).unwrap();
            uploader.offset()
        })
        .await
        .unwrap();

        assert_eq!(offset, 1500);
    }

    #[tokio::test]
    async fn test_unreachable_endpoint() {
        let mut uploader = Uploader::new(
            transport(),
            Url::parse("http://127.0.0.1:1/files/").unwrap(),
            MemorySource::new(vec![0u8; 10]),
            options(),
        )
        .unwrap();

        let err = uploader.upload(None).await.unwrap_err();
        assert!(matches!(err, UploadError::CommunicationError { status: None, .. }));
    }
}
