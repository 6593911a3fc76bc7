use std::sync::Arc;

/// Events emitted during a sync pass for progress reporting
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    /// Setup is being fetched from the backend
    FetchingSetup { url: String },

    /// The pass has decided what to change
    SyncPlanReady {
        /// Number of playlists in the remote setup (0 when unassigned)
        playlists: usize,
        to_download: usize,
        to_delete: usize,
    },

    /// A download is starting
    DownloadStarting {
        file_name: String,
        /// Index of this asset in the download queue
        index: usize,
        /// Total number of assets to download
        total: usize,
    },

    /// A download completed successfully
    DownloadCompleted { file_name: String, bytes: u64 },

    /// A download failed
    DownloadFailed { file_name: String, error: String },

    /// A stale asset was removed from the cache
    AssetDeleted { file_name: String },

    /// Partial files from interrupted downloads were cleaned up
    PartialFilesCleanedUp { count: usize },

    /// Sync pass completed
    SyncCompleted {
        downloaded_count: usize,
        deleted_count: usize,
        failed_count: usize,
    },

    /// Sync pass gave up before touching local state
    SyncAborted { error: String },
}

/// Trait for reporting progress events during synchronization.
///
/// Implementations can use this to display progress bars, log messages,
/// or collect statistics.
pub trait ProgressReporter: Send + Sync {
    /// Report a progress event
    fn report(&self, event: ProgressEvent);
}

/// A shared reference to a progress reporter
pub type SharedProgressReporter = Arc<dyn ProgressReporter>;

/// A no-op progress reporter that silently ignores all events.
/// Useful for tests or the daemon, which logs instead.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopReporter;

impl ProgressReporter for NoopReporter {
    fn report(&self, _event: ProgressEvent) {
        // Intentionally empty
    }
}

impl NoopReporter {
    /// Create a new NoopReporter wrapped in an Arc
    pub fn shared() -> SharedProgressReporter {
        Arc::new(Self)
    }
}
