//! Metrics module
//!
//! Prometheus counters for upload creation, chunk transmission and recovery.

use lazy_static::lazy_static;
use prometheus::{
    register_counter, register_counter_vec, register_histogram, Counter, CounterVec, Encoder,
    Histogram, TextEncoder,
};

lazy_static! {
    // Upload resource metrics
    pub static ref UPLOADS_CREATED: Counter = register_counter!(
        "tus_uploads_created_total",
        "Upload resources created on the server"
    ).unwrap();

    pub static ref UPLOADS_RESUMED: Counter = register_counter!(
        "tus_uploads_resumed_total",
        "Uploads resumed from a known upload URL"
    ).unwrap();

    // Chunk metrics
    pub static ref CHUNKS_TOTAL: CounterVec = register_counter_vec!(
        "tus_chunks_total",
        "Chunk transmissions by outcome",
        &["status"]
    ).unwrap();

    pub static ref UPLOAD_BYTES_TOTAL: Counter = register_counter!(
        "tus_upload_bytes_total",
        "Bytes confirmed persisted by the server"
    ).unwrap();

    pub static ref CHUNK_DURATION: Histogram = register_histogram!(
        "tus_chunk_duration_seconds",
        "Duration of one chunk transmission attempt",
        vec![0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0, 30.0]
    ).unwrap();

    // Recovery metrics
    pub static ref RETRIES_TOTAL: Counter = register_counter!(
        "tus_retries_total",
        "Recovery attempts after a failed chunk transmission"
    ).unwrap();

    // Error metrics
    pub static ref ERRORS_TOTAL: CounterVec = register_counter_vec!(
        "tus_errors_total",
        "Total errors",
        &["type"]
    ).unwrap();
}

/// Record creation of an upload resource
pub fn record_upload_created() {
    UPLOADS_CREATED.inc();
}

/// Record a resume from a stored or caller-supplied URL
pub fn record_upload_resumed() {
    UPLOADS_RESUMED.inc();
}

/// Record a verified chunk and the bytes it moved the offset by
pub fn record_chunk_success(bytes: u64, duration_secs: f64) {
    CHUNKS_TOTAL.with_label_values(&["success"]).inc();
    UPLOAD_BYTES_TOTAL.inc_by(bytes as f64);
    CHUNK_DURATION.observe(duration_secs);
}

/// Record a failed chunk transmission attempt
pub fn record_chunk_failure(duration_secs: f64) {
    CHUNKS_TOTAL.with_label_values(&["failure"]).inc();
    CHUNK_DURATION.observe(duration_secs);
}

/// Record one recovery attempt
pub fn record_retry() {
    RETRIES_TOTAL.inc();
}

/// Record an error
pub fn record_error(error_type: &str) {
    ERRORS_TOTAL.with_label_values(&[error_type]).inc();
}

/// Render all registered metrics in the Prometheus text format
pub fn render() -> String {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&prometheus::gather(), &mut buffer) {
        tracing::warn!(error = %e, "Failed to encode metrics");
        return String::new();
    }
    String::from_utf8_lossy(&buffer).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_chunk_success() {
        record_chunk_success(1024, 0.01);
        // Just verify it doesn't panic
    }

    #[test]
    fn test_record_retry_and_failure() {
        record_chunk_failure(0.5);
        record_retry();
        record_error("upload_failed");
    }

    #[test]
    fn test_render_contains_counters() {
        record_upload_created();
        let text = render();
        assert!(text.contains("tus_uploads_created_total"));
    }
}
