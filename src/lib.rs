pub mod asset;
pub mod config;
pub mod diff;
pub mod error;
pub mod http;
pub mod inputs;
pub mod manifest;
pub mod progress;
pub mod remote;
pub mod schedule;
pub mod state;
pub mod sync;

#[cfg(test)]
mod test_support;

// Re-export main types for convenience
pub use asset::{AssetPresence, AssetStore};
pub use config::Config;
pub use diff::{AssetDiff, FileRef, all_assets_present, diff, extract_file_refs, manifests_equivalent};
pub use error::{ConfigError, DownloadError, FailureKind, FetchError, ManifestError, StoreError, SyncError};
pub use http::{HttpClient, HttpResponse, ReqwestClient};
pub use inputs::{Credential, InputHandles, SyncInputs};
pub use manifest::{Manifest, MediaKind, MediaRef, Playlist, TimeOfDay, WeekdayMask, derive_file_name};
pub use progress::{NoopReporter, ProgressEvent, ProgressReporter, SharedProgressReporter};
pub use remote::{fetch_remote_setup, parse_device_response};
pub use schedule::{
    ActivePlaylist, Clock, LocalClock, PlaybackItem, SchedulePoller, ScheduleResolver,
    is_active_at, resolve_active,
};
pub use state::{StatePublisher, SyncState};
pub use sync::{
    MIN_REFRESH_PERIOD, PassOutcome, PassReport, RefreshOutcome, SyncCoordinator, SyncOptions,
};
