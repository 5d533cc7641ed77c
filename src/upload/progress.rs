//! Progress observers
//!
//! Drivers call an observer after every verified chunk. The observer only
//! sees offsets; it cannot influence the upload.

/// One progress notification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    /// Confirmed offset after the chunk
    pub offset: u64,
    /// Bytes the offset moved by since the previous notification
    pub delta: u64,
    /// Offset at which the current `upload` call stops
    pub stop_at: u64,
}

impl Progress {
    /// Completion of the current `upload` call, 0.0 to 100.0
    pub fn percent(&self) -> f64 {
        if self.stop_at == 0 {
            return 100.0;
        }
        self.offset as f64 * 100.0 / self.stop_at as f64
    }
}

/// Receives a notification after each verified chunk
pub trait ProgressObserver {
    fn on_progress(&mut self, progress: Progress);
}

impl<F: FnMut(Progress)> ProgressObserver for F {
    fn on_progress(&mut self, progress: Progress) {
        (*self)(progress)
    }
}

/// Observer that logs progress through `tracing`
#[derive(Debug, Default)]
pub struct LogProgress {
    label: String,
}

impl LogProgress {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
        }
    }
}

impl ProgressObserver for LogProgress {
    fn on_progress(&mut self, progress: Progress) {
        tracing::info!(
            upload = %self.label,
            offset = progress.offset,
            stop_at = progress.stop_at,
            delta = progress.delta,
            "Upload progress {:.1}%",
            progress.percent()
        );
    }
}
