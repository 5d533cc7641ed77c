//! Upload URL storage
//!
//! Remembers the upload URL created for an artifact so a later process can
//! resume the transfer instead of creating a new upload resource.
//!
//! # Example
//!
//! ```no_run
//! use tus_uploadr::source::FileSource;
//! use tus_uploadr::storage::{fingerprint, FileUrlStorage, UrlStorage};
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let storage = FileUrlStorage::new("/tmp/tus-uploads.json");
//! let mut source = FileSource::open("video.mp4")?;
//! let key = fingerprint(&mut source)?;
//!
//! if let Some(url) = storage.get_url(&key)? {
//!     println!("resuming {}", url);
//! }
//! # Ok(())
//! # }
//! ```

mod fingerprint;

pub use fingerprint::{fingerprint, FINGERPRINT_BLOCK_SIZE};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// URL storage errors
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Failed to access URL storage: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Corrupt URL storage: {0}")]
    ParseError(#[from] serde_json::Error),

    #[error("Stored URL for '{key}' is invalid: {url}")]
    InvalidUrl { key: String, url: String },
}

/// Key/value store of upload URLs
pub trait UrlStorage: Send + Sync {
    fn get_url(&self, key: &str) -> Result<Option<Url>, StorageError>;

    fn set_url(&self, key: &str, url: &Url) -> Result<(), StorageError>;

    fn remove_url(&self, key: &str) -> Result<(), StorageError>;
}

/// One persisted entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredUpload {
    pub url: String,
    pub created_at: DateTime<Utc>,
}

/// JSON file storage.
///
/// The whole map is rewritten on every change; the file is small and writes
/// happen once per upload creation.
pub struct FileUrlStorage {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileUrlStorage {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_entries(&self) -> Result<BTreeMap<String, StoredUpload>, StorageError> {
        match std::fs::read(&self.path) {
            Ok(content) if content.iter().all(u8::is_ascii_whitespace) => Ok(BTreeMap::new()),
            Ok(content) => Ok(serde_json::from_slice(&content)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(e.into()),
        }
    }

    fn write_entries(&self, entries: &BTreeMap<String, StoredUpload>) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        // Write-then-rename so a crash never leaves a truncated file behind
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(entries)?)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl UrlStorage for FileUrlStorage {
    fn get_url(&self, key: &str) -> Result<Option<Url>, StorageError> {
        let _guard = self.lock.lock();
        let entries = self.read_entries()?;

        entries
            .get(key)
            .map(|entry| {
                Url::parse(&entry.url).map_err(|_| StorageError::InvalidUrl {
                    key: key.to_string(),
                    url: entry.url.clone(),
                })
            })
            .transpose()
    }

    fn set_url(&self, key: &str, url: &Url) -> Result<(), StorageError> {
        let _guard = self.lock.lock();
        let mut entries = self.read_entries()?;
        entries.insert(
            key.to_string(),
            StoredUpload {
                url: url.to_string(),
                created_at: Utc::now(),
            },
        );
        self.write_entries(&entries)?;

        tracing::debug!(key = %key, url = %url, path = %self.path.display(), "Stored upload URL");
        Ok(())
    }

    fn remove_url(&self, key: &str) -> Result<(), StorageError> {
        let _guard = self.lock.lock();
        let mut entries = self.read_entries()?;
        if entries.remove(key).is_some() {
            self.write_entries(&entries)?;
        }
        Ok(())
    }
}

/// In-process storage
#[derive(Default)]
pub struct MemoryUrlStorage {
    entries: Mutex<HashMap<String, Url>>,
}

impl MemoryUrlStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl UrlStorage for MemoryUrlStorage {
    fn get_url(&self, key: &str) -> Result<Option<Url>, StorageError> {
        Ok(self.entries.lock().get(key).cloned())
    }

    fn set_url(&self, key: &str, url: &Url) -> Result<(), StorageError> {
        self.entries.lock().insert(key.to_string(), url.clone());
        Ok(())
    }

    fn remove_url(&self, key: &str) -> Result<(), StorageError> {
        self.entries.lock().remove(key);
        Ok(())
    }
}
