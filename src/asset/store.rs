// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::collections::BTreeSet;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use futures::StreamExt;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::error::{DownloadError, StoreError};
use crate::http::HttpClient;
use crate::manifest::Manifest;

/// Suffix for downloads that have not finished yet
pub const PARTIAL_SUFFIX: &str = ".partial";

/// Suffix for a manifest write that has not been renamed into place yet
pub const MANIFEST_TMP_SUFFIX: &str = ".tmp";

/// Default manifest file name inside the cache directory
pub const DEFAULT_MANIFEST_FILE: &str = "setup.json";

/// Default bound on a single asset download
pub const DEFAULT_DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(20);

/// Anything that can answer "is this cache file present?"
pub trait AssetPresence {
    fn contains(&self, file_name: &str) -> bool;
}

impl AssetPresence for BTreeSet<String> {
    fn contains(&self, file_name: &str) -> bool {
        BTreeSet::contains(self, file_name)
    }
}

impl AssetPresence for std::collections::HashSet<String> {
    fn contains(&self, file_name: &str) -> bool {
        std::collections::HashSet::contains(self, file_name)
    }
}

/// Filesystem-backed cache of media assets plus the persisted manifest
#[derive(Debug, Clone)]
pub struct AssetStore {
    cache_dir: PathBuf,
    manifest_path: PathBuf,
    download_timeout: Duration,
}

impl AssetStore {
    /// Open (creating if needed) a cache directory with the manifest stored inside it
    pub fn open(cache_dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let cache_dir = cache_dir.into();
        let manifest_path = cache_dir.join(DEFAULT_MANIFEST_FILE);
        Self::open_with_manifest(cache_dir, manifest_path)
    }

    /// Open a cache directory with the manifest at an explicit path
    pub fn open_with_manifest(
        cache_dir: impl Into<PathBuf>,
        manifest_path: impl Into<PathBuf>,
    ) -> Result<Self, StoreError> {
        let cache_dir = cache_dir.into();
        let manifest_path = manifest_path.into();

        create_dir(&cache_dir)?;
        if let Some(parent) = manifest_path.parent() {
            create_dir(parent)?;
        }

        Ok(Self {
            cache_dir,
            manifest_path,
            download_timeout: DEFAULT_DOWNLOAD_TIMEOUT,
        })
    }

    /// Bound every download by `timeout`
    pub fn with_download_timeout(mut self, timeout: Duration) -> Self {
        self.download_timeout = timeout;
        self
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    pub fn manifest_path(&self) -> &Path {
        &self.manifest_path
    }

    /// Local path a cached asset lives at
    pub fn asset_path(&self, file_name: &str) -> PathBuf {
        self.cache_dir.join(file_name)
    }

    pub async fn exists(&self, file_name: &str) -> bool {
        is_file(&self.asset_path(file_name)).await
    }

    /// Whether `file_name` would clash with the manifest or an unfinished download
    pub fn is_reserved(&self, file_name: &str) -> bool {
        file_name.ends_with(PARTIAL_SUFFIX) || self.is_manifest_file(file_name)
    }

    /// Download `url` into the cache as `file_name`
    ///
    /// The body is streamed into a `.partial` file that is renamed into place
    /// only once complete. On any failure, including the timeout, the partial
    /// file is removed before the error is returned.
    pub async fn download<C: HttpClient>(
        &self,
        client: &C,
        url: &str,
        file_name: &str,
    ) -> Result<u64, DownloadError> {
        if self.is_reserved(file_name) {
            return Err(DownloadError::ReservedName {
                url: url.to_string(),
                file_name: file_name.to_string(),
            });
        }

        let target = self.asset_path(file_name);
        let partial = self
            .cache_dir
            .join(format!("{file_name}{PARTIAL_SUFFIX}"));

        let result = tokio::time::timeout(
            self.download_timeout,
            stream_to_file(client, url, &partial),
        )
        .await
        .unwrap_or_else(|_| {
            Err(DownloadError::TimedOut {
                url: url.to_string(),
            })
        });

        let bytes = match result {
            Ok(bytes) => bytes,
            Err(e) => {
                remove_if_present(&partial).await;
                return Err(e);
            }
        };

        if let Err(e) = tokio::fs::rename(&partial, &target).await {
            remove_if_present(&partial).await;
            return Err(DownloadError::FinalizeFailed {
                path: target,
                source: e,
            });
        }

        debug!(file_name = %file_name, bytes, "asset stored");
        Ok(bytes)
    }

    /// Delete a cached asset; returns whether a file was actually removed
    pub async fn delete(&self, file_name: &str) -> Result<bool, StoreError> {
        remove_file(&self.asset_path(file_name)).await
    }

    /// Load the persisted manifest, `None` if none has been written yet
    pub async fn read_manifest(&self) -> Result<Option<Manifest>, StoreError> {
        let bytes = match tokio::fs::read(&self.manifest_path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(StoreError::ManifestReadFailed {
                    path: self.manifest_path.clone(),
                    source: e,
                });
            }
        };

        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| StoreError::ManifestCorrupt {
                path: self.manifest_path.clone(),
                source: e,
            })
    }

    /// Persist the manifest by writing a temp file and renaming it over the target
    pub async fn write_manifest(&self, manifest: &Manifest) -> Result<(), StoreError> {
        let json = serde_json::to_vec_pretty(manifest)?;
        let tmp = self.manifest_tmp_path();

        let write = async {
            let mut file = File::create(&tmp).await?;
            file.write_all(&json).await?;
            file.sync_all().await?;
            tokio::fs::rename(&tmp, &self.manifest_path).await
        };

        if let Err(e) = write.await {
            remove_if_present(&tmp).await;
            return Err(StoreError::ManifestWriteFailed {
                path: self.manifest_path.clone(),
                source: e,
            });
        }

        Ok(())
    }

    /// Remove the persisted manifest; missing is fine
    pub async fn delete_manifest(&self) -> Result<bool, StoreError> {
        remove_file(&self.manifest_path).await
    }

    /// File names of every cached asset
    ///
    /// Excludes the manifest, its temp file and unfinished downloads.
    pub async fn list_assets(&self) -> Result<BTreeSet<String>, StoreError> {
        let mut assets = BTreeSet::new();

        for filename in self.read_dir_names().await? {
            if self.is_reserved(&filename) {
                continue;
            }
            if is_file(&self.asset_path(&filename)).await {
                assets.insert(filename);
            }
        }

        Ok(assets)
    }

    /// Remove `.partial` files left behind by interrupted downloads
    pub async fn clean_partial_files(&self) -> Result<usize, StoreError> {
        let mut cleaned = 0;

        for filename in self.read_dir_names().await? {
            if !filename.ends_with(PARTIAL_SUFFIX) {
                continue;
            }
            match remove_file(&self.cache_dir.join(&filename)).await {
                Ok(true) => cleaned += 1,
                Ok(false) => {}
                Err(e) => warn!(file_name = %filename, error = %e, "could not remove partial file"),
            }
        }

        Ok(cleaned)
    }

    async fn read_dir_names(&self) -> Result<Vec<String>, StoreError> {
        let read_failed = |e| StoreError::ReadDirectoryFailed {
            path: self.cache_dir.clone(),
            source: e,
        };

        let mut entries = tokio::fs::read_dir(&self.cache_dir)
            .await
            .map_err(read_failed)?;

        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(read_failed)? {
            if let Some(name) = entry.file_name().to_str() {
                names.push(name.to_string());
            }
        }

        Ok(names)
    }

    fn manifest_tmp_path(&self) -> PathBuf {
        let mut name = self
            .manifest_path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| DEFAULT_MANIFEST_FILE.into());
        name.push(MANIFEST_TMP_SUFFIX);
        self.manifest_path.with_file_name(name)
    }

    fn is_manifest_file(&self, filename: &str) -> bool {
        let path = self.cache_dir.join(filename);
        path == self.manifest_path || path == self.manifest_tmp_path()
    }
}

async fn stream_to_file<C: HttpClient>(
    client: &C,
    url: &str,
    path: &Path,
) -> Result<u64, DownloadError> {
    let response = client
        .get_stream(url)
        .await
        .map_err(|e| DownloadError::HttpFailed {
            url: url.to_string(),
            source: e,
        })?;

    if !(200..300).contains(&response.status) {
        return Err(DownloadError::HttpStatus {
            url: url.to_string(),
            status: response.status,
        });
    }

    let mut file = File::create(path)
        .await
        .map_err(|e| DownloadError::FileCreateFailed {
            path: path.to_path_buf(),
            source: e,
        })?;

    let mut bytes_downloaded: u64 = 0;
    let mut stream = response.body;

    while let Some(chunk_result) = stream.next().await {
        let chunk = chunk_result.map_err(|e| DownloadError::StreamFailed {
            url: url.to_string(),
            source: e,
        })?;

        file.write_all(&chunk)
            .await
            .map_err(|e| DownloadError::FileWriteFailed {
                path: path.to_path_buf(),
                source: e,
            })?;

        bytes_downloaded += chunk.len() as u64;
    }

    file.flush()
        .await
        .map_err(|e| DownloadError::FileWriteFailed {
            path: path.to_path_buf(),
            source: e,
        })?;

    Ok(bytes_downloaded)
}

fn create_dir(path: &Path) -> Result<(), StoreError> {
    std::fs::create_dir_all(path).map_err(|e| StoreError::CreateDirectoryFailed {
        path: path.to_path_buf(),
        source: e,
    })
}

async fn is_file(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .is_ok_and(|metadata| metadata.is_file())
}

async fn remove_file(path: &Path) -> Result<bool, StoreError> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(StoreError::DeleteFailed {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}

async fn remove_if_present(path: &Path) {
    if let Err(e) = remove_file(path).await {
        warn!(path = %path.display(), error = %e, "could not remove incomplete file");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::http::{ByteStream, BytesResponse, HttpResponse};
    use crate::manifest::{MediaRef, Playlist, TimeOfDay, WeekdayMask};
    use async_trait::async_trait;
    use bytes::Bytes;
    use tempfile::tempdir;

    struct MockHttpClient {
        response_data: Vec<u8>,
        status: u16,
        delay: Option<Duration>,
    }

    impl MockHttpClient {
        fn ok(data: &[u8]) -> Self {
            Self {
                response_data: data.to_vec(),
                status: 200,
                delay: None,
            }
        }
    }

    #[async_trait]
    impl HttpClient for MockHttpClient {
        async fn get_bytes(
            &self,
            _url: &str,
            _api_key: Option<&str>,
        ) -> Result<BytesResponse, reqwest::Error> {
            unreachable!("assets are always streamed")
        }

        async fn get_stream(&self, _url: &str) -> Result<HttpResponse, reqwest::Error> {
            let data = self.response_data.clone();
            let len = data.len() as u64;
            let delay = self.delay;

            let stream: ByteStream = Box::pin(futures::stream::once(async move {
                if let Some(delay) = delay {
                    tokio::time::sleep(delay).await;
                }
                Ok(Bytes::from(data))
            }));

            Ok(HttpResponse {
                status: self.status,
                content_length: Some(len),
                body: stream,
            })
        }
    }

    fn sample_manifest() -> Manifest {
        Manifest::new(vec![Playlist {
            days: WeekdayMask::every_day(),
            start: TimeOfDay::from_hm(9, 0).unwrap(),
            end: TimeOfDay::from_hm(17, 0).unwrap(),
            images: vec![MediaRef::parse("https://cdn.example.com/a.jpg", Some(5)).unwrap()],
            videos: vec![],
        }])
    }

    #[tokio::test]
    async fn download_writes_file() {
        let dir = tempdir().unwrap();
        let store = AssetStore::open(dir.path()).unwrap();
        let client = MockHttpClient::ok(b"test image content");

        let bytes = store
            .download(&client, "https://cdn.example.com/a.jpg", "a.jpg")
            .await
            .unwrap();

        assert_eq!(bytes, 18);
        assert!(store.exists("a.jpg").await);
        assert!(!dir.path().join("a.jpg.partial").exists());
        assert_eq!(
            std::fs::read(dir.path().join("a.jpg")).unwrap(),
            b"test image content"
        );
    }

    #[tokio::test]
    async fn download_fails_on_http_error_without_leaving_files() {
        let dir = tempdir().unwrap();
        let store = AssetStore::open(dir.path()).unwrap();
        let client = MockHttpClient {
            response_data: b"Not Found".to_vec(),
            status: 404,
            delay: None,
        };

        let result = store
            .download(&client, "https://cdn.example.com/a.jpg", "a.jpg")
            .await;

        match result.unwrap_err() {
            DownloadError::HttpStatus { status, url } => {
                assert_eq!(status, 404);
                assert_eq!(url, "https://cdn.example.com/a.jpg");
            }
            _ => panic!("Expected HttpStatus error"),
        }
        assert!(!store.exists("a.jpg").await);
        assert!(!dir.path().join("a.jpg.partial").exists());
    }

    #[tokio::test]
    async fn download_timeout_removes_partial_file() {
        let dir = tempdir().unwrap();
        let store = AssetStore::open(dir.path())
            .unwrap()
            .with_download_timeout(Duration::from_millis(50));
        let client = MockHttpClient {
            response_data: b"slow".to_vec(),
            status: 200,
            delay: Some(Duration::from_secs(5)),
        };

        let result = store
            .download(&client, "https://cdn.example.com/slow.mp4", "slow.mp4")
            .await;

        assert!(matches!(result, Err(DownloadError::TimedOut { .. })));
        assert!(!store.exists("slow.mp4").await);
        assert!(!dir.path().join("slow.mp4.partial").exists());
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let dir = tempdir().unwrap();
        let store = AssetStore::open(dir.path()).unwrap();
        std::fs::write(dir.path().join("old.jpg"), b"x").unwrap();

        assert!(store.delete("old.jpg").await.unwrap());
        assert!(!store.delete("old.jpg").await.unwrap());
        assert!(!store.exists("old.jpg").await);
    }

    #[tokio::test]
    async fn missing_manifest_reads_as_none() {
        let dir = tempdir().unwrap();
        let store = AssetStore::open(dir.path()).unwrap();
        assert!(store.read_manifest().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn manifest_write_replaces_atomically() {
        let dir = tempdir().unwrap();
        let store = AssetStore::open(dir.path()).unwrap();
        let manifest = sample_manifest();

        store.write_manifest(&manifest).await.unwrap();
        store.write_manifest(&manifest).await.unwrap();

        assert!(!dir.path().join("setup.json.tmp").exists());
        assert_eq!(store.read_manifest().await.unwrap(), Some(manifest));

        assert!(store.delete_manifest().await.unwrap());
        assert!(store.read_manifest().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn corrupt_manifest_is_reported() {
        let dir = tempdir().unwrap();
        let store = AssetStore::open(dir.path()).unwrap();
        std::fs::write(store.manifest_path(), b"{ not json").unwrap();

        assert!(matches!(
            store.read_manifest().await,
            Err(StoreError::ManifestCorrupt { .. })
        ));
    }

    #[test]
    fn open_creates_cache_dir() {
        let dir = tempdir().unwrap();
        let cache_dir = dir.path().join("nested").join("cache");

        let store = AssetStore::open(&cache_dir).unwrap();

        assert!(cache_dir.is_dir());
        assert_eq!(store.manifest_path(), cache_dir.join("setup.json"));
    }

    #[tokio::test]
    async fn list_assets_skips_manifest_and_partials() {
        let dir = tempdir().unwrap();
        let store = AssetStore::open(dir.path()).unwrap();
        std::fs::write(dir.path().join("a.jpg"), b"a").unwrap();
        std::fs::write(dir.path().join("b.mp4"), b"b").unwrap();
        std::fs::write(dir.path().join("c.mp4.partial"), b"c").unwrap();
        std::fs::write(dir.path().join("setup.json"), b"{}").unwrap();
        std::fs::create_dir(dir.path().join("subdir")).unwrap();

        let assets = store.list_assets().await.unwrap();

        assert_eq!(
            assets.into_iter().collect::<Vec<_>>(),
            vec!["a.jpg".to_string(), "b.mp4".to_string()]
        );
    }

    #[tokio::test]
    async fn clean_partial_files_removes_only_partials() {
        let dir = tempdir().unwrap();
        let store = AssetStore::open(dir.path()).unwrap();
        std::fs::write(dir.path().join("clip1.mp4.partial"), b"partial 1").unwrap();
        std::fs::write(dir.path().join("clip2.mp4.partial"), b"partial 2").unwrap();
        std::fs::write(dir.path().join("clip3.mp4"), b"complete").unwrap();

        let cleaned = store.clean_partial_files().await.unwrap();

        assert_eq!(cleaned, 2);
        assert!(!dir.path().join("clip1.mp4.partial").exists());
        assert!(!dir.path().join("clip2.mp4.partial").exists());
        assert!(dir.path().join("clip3.mp4").exists());
    }

    #[tokio::test]
    async fn exists_ignores_directories() {
        let dir = tempdir().unwrap();
        let store = AssetStore::open(dir.path()).unwrap();
        std::fs::write(dir.path().join("a.jpg"), b"a").unwrap();
        std::fs::create_dir(dir.path().join("b.jpg")).unwrap();

        assert!(store.exists("a.jpg").await);
        assert!(!store.exists("b.jpg").await);
        assert!(!store.exists("c.jpg").await);
    }

    #[tokio::test]
    async fn download_refuses_reserved_names() {
        let dir = tempdir().unwrap();
        let store = AssetStore::open(dir.path()).unwrap();
        store.write_manifest(&sample_manifest()).await.unwrap();
        let client = MockHttpClient::ok(b"not a manifest");

        for name in ["setup.json", "setup.json.tmp", "promo.partial"] {
            let result = store
                .download(&client, "https://cdn.example.com/x", name)
                .await;
            assert!(
                matches!(result, Err(DownloadError::ReservedName { .. })),
                "{name} was accepted"
            );
        }

        assert_eq!(
            store.read_manifest().await.unwrap(),
            Some(sample_manifest())
        );
    }
}
