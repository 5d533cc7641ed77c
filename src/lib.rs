//! Tus Uploadr Library
//!
//! Client for the [tus](https://tus.io) resumable upload protocol, version 1.0.0.
//!
//! # Features
//!
//! - **Resumable**: The server's reported offset is the only source of truth
//! - **Bounded Recovery**: One retry budget covers failed chunks and failed offset queries
//! - **Pull or Push**: Read chunks from a file, or hand them over one by one
//! - **Async or Blocking**: Same engine behind both
//! - **Persistent URLs**: Interrupted uploads resume on the next run
//!
//! # Example
//!
//! ```no_run
//! use tus_uploadr::source::FileSource;
//! use tus_uploadr::transport::{HttpTransport, HttpTransportConfig};
//! use tus_uploadr::upload::{UploadOptions, Uploader};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let transport = HttpTransport::new(HttpTransportConfig::default())?;
//!     let source = FileSource::open("backup.tar")?;
//!     let endpoint = "http://localhost:1080/files/".parse()?;
//!
//!     let mut uploader = Uploader::new(transport, endpoint, source, UploadOptions::default())?;
//!     uploader.upload(None).await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod logging;
pub mod metrics;
pub mod protocol;
pub mod source;
pub mod storage;
pub mod transport;
pub mod upload;

// Re-export commonly used types
pub use config::Config;
pub use upload::{UploadError, UploadOptions, UploadSession, Uploader};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
