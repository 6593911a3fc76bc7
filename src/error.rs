use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while turning wire records into a typed manifest
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ManifestError {
    #[error("Invalid time of day '{value}': expected HH:MM")]
    InvalidTime { value: String },

    #[error("Invalid media URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("Image {url} has no display duration")]
    MissingImageDuration { url: String },
}

/// Errors that can occur when fetching the remote setup
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("Failed to fetch setup from {url}: {source}")]
    RequestFailed {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("HTTP error {status} for {url}")]
    HttpStatus { url: String, status: u16 },

    #[error("Timed out fetching setup from {url}")]
    TimedOut { url: String },

    #[error("Failed to parse device response: {0}")]
    ParseFailed(#[from] serde_json::Error),

    #[error("Device response has no 'setup' field")]
    MissingSetup,
}

/// Errors that can occur while downloading a single asset
#[derive(Error, Debug)]
pub enum DownloadError {
    #[error("HTTP request failed for {url}: {source}")]
    HttpFailed {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("HTTP error {status} for {url}")]
    HttpStatus { url: String, status: u16 },

    #[error("Timed out downloading {url}")]
    TimedOut { url: String },

    #[error("Failed to create file {path}: {source}")]
    FileCreateFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write to file {path}: {source}")]
    FileWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Stream error while downloading {url}: {source}")]
    StreamFailed {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Failed to move {path} into place: {source}")]
    FinalizeFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Refusing to store {url} as {file_name}: the name is reserved by the cache")]
    ReservedName { url: String, file_name: String },
}

impl DownloadError {
    /// Whether the failure happened on the network side rather than on local disk
    pub fn is_network(&self) -> bool {
        matches!(
            self,
            Self::HttpFailed { .. }
                | Self::HttpStatus { .. }
                | Self::TimedOut { .. }
                | Self::StreamFailed { .. }
        )
    }
}

/// Errors that can occur when touching the local cache directory
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Failed to create directory {path}: {source}")]
    CreateDirectoryFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read directory {path}: {source}")]
    ReadDirectoryFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to delete {path}: {source}")]
    DeleteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read manifest {path}: {source}")]
    ManifestReadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write manifest {path}: {source}")]
    ManifestWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse manifest JSON in {path}: {source}")]
    ManifestCorrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to serialize manifest: {0}")]
    ManifestSerializeFailed(#[from] serde_json::Error),
}

/// Errors that can occur when loading the configuration file
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    ReadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    ParseFailed {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Broad failure classes used when reporting why a pass did not converge
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Manifest fetch or a download failed; retried on the next pass
    Network,
    /// Local read, write or delete failed
    Io,
    /// The backend sent something that is not a valid setup
    Parse,
}

/// Top-level errors for a sync pass
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Download error: {0}")]
    Download(#[from] DownloadError),
}

impl SyncError {
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Fetch(FetchError::ParseFailed(_) | FetchError::MissingSetup) => {
                FailureKind::Parse
            }
            Self::Fetch(_) => FailureKind::Network,
            Self::Store(StoreError::ManifestCorrupt { .. }) => FailureKind::Parse,
            Self::Store(_) => FailureKind::Io,
            Self::Download(e) if e.is_network() => FailureKind::Network,
            Self::Download(_) => FailureKind::Io,
        }
    }
}
