//! In-memory backend used by coordinator tests

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::{Value, json};
use tokio::sync::{Notify, Semaphore};
use url::Url;

use crate::http::{ByteStream, BytesResponse, HttpClient, HttpResponse};
use crate::manifest::derive_file_name;

/// Playlist JSON running 08:00 to 18:00 every day
pub fn playlist_json(images: &[&str], videos: &[&str]) -> Value {
    json!({
        "monday": true,
        "tuesday": true,
        "wednesday": true,
        "thursday": true,
        "friday": true,
        "saturday": true,
        "sunday": true,
        "start_time": "08:00",
        "end_time": "18:00",
        "images": images.iter().map(|url| json!({"url": url, "duration": 10})).collect::<Vec<_>>(),
        "videos": videos.iter().map(|url| json!({"url": url})).collect::<Vec<_>>(),
    })
}

/// Device endpoint body wrapping the given playlists
pub fn device_json(playlists: &[Value]) -> String {
    json!({
        "id": 7,
        "name": "Lobby screen",
        "setup": { "data": playlists },
    })
    .to_string()
}

/// Lets a test stop requests mid-flight and let them through one at a time
///
/// Releasing is final: later requests are never held again.
struct Gate {
    held: AtomicBool,
    permits: Semaphore,
    started: Notify,
}

impl Gate {
    fn new() -> Self {
        Self {
            held: AtomicBool::new(false),
            permits: Semaphore::new(0),
            started: Notify::new(),
        }
    }

    fn hold(&self) {
        self.held.store(true, Ordering::SeqCst);
    }

    fn allow(&self, requests: usize) {
        self.permits.add_permits(requests);
    }

    fn release(&self) {
        self.held.store(false, Ordering::SeqCst);
        self.permits.close();
    }

    async fn wait_for_request(&self) {
        self.started.notified().await;
    }

    async fn pass(&self) {
        self.started.notify_one();
        if self.held.load(Ordering::SeqCst) {
            // Closed means released
            if let Ok(permit) = self.permits.acquire().await {
                permit.forget();
            }
        }
    }
}

/// Serves a configurable setup and fake asset bodies
pub struct MockBackend {
    setup: Mutex<(u16, String)>,
    failing: Mutex<HashMap<String, u16>>,
    downloads: Mutex<Vec<String>>,
    fetches: AtomicUsize,
    setup_gate: Gate,
    download_gate: Gate,
}

impl MockBackend {
    pub fn new(setup: String) -> Self {
        Self {
            setup: Mutex::new((200, setup)),
            failing: Mutex::new(HashMap::new()),
            downloads: Mutex::new(Vec::new()),
            fetches: AtomicUsize::new(0),
            setup_gate: Gate::new(),
            download_gate: Gate::new(),
        }
    }

    pub fn set_setup(&self, body: String) {
        *self.setup.lock().unwrap() = (200, body);
    }

    pub fn set_setup_status(&self, status: u16) {
        self.setup.lock().unwrap().0 = status;
    }

    /// Answer downloads of `file_name` with `status`
    pub fn fail_asset(&self, file_name: &str, status: u16) {
        self.failing
            .lock()
            .unwrap()
            .insert(file_name.to_string(), status);
    }

    pub fn heal_asset(&self, file_name: &str) {
        self.failing.lock().unwrap().remove(file_name);
    }

    /// URLs requested through `get_stream`, in request order
    pub fn downloads(&self) -> Vec<String> {
        self.downloads.lock().unwrap().clone()
    }

    pub fn clear_downloads(&self) {
        self.downloads.lock().unwrap().clear();
    }

    pub fn setup_fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    /// Block setup fetches until [`release_setup_fetches`](Self::release_setup_fetches)
    pub fn hold_setup_fetches(&self) {
        self.setup_gate.hold();
    }

    /// Let `count` held setup fetches through while keeping the rest blocked
    pub fn allow_setup_fetches(&self, count: usize) {
        self.setup_gate.allow(count);
    }

    pub fn release_setup_fetches(&self) {
        self.setup_gate.release();
    }

    pub async fn wait_for_setup_fetch(&self) {
        self.setup_gate.wait_for_request().await;
    }

    /// Block asset downloads until [`release_downloads`](Self::release_downloads)
    pub fn hold_downloads(&self) {
        self.download_gate.hold();
    }

    pub fn release_downloads(&self) {
        self.download_gate.release();
    }

    pub async fn wait_for_download(&self) {
        self.download_gate.wait_for_request().await;
    }
}

#[async_trait]
impl HttpClient for MockBackend {
    async fn get_bytes(
        &self,
        _url: &str,
        api_key: Option<&str>,
    ) -> Result<BytesResponse, reqwest::Error> {
        assert!(api_key.is_some(), "setup fetched without a credential");
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.setup_gate.pass().await;

        let (status, body) = self.setup.lock().unwrap().clone();
        Ok(BytesResponse {
            status,
            body: Bytes::from(body),
        })
    }

    async fn get_stream(&self, url: &str) -> Result<HttpResponse, reqwest::Error> {
        self.downloads.lock().unwrap().push(url.to_string());
        self.download_gate.pass().await;

        let file_name = Url::parse(url)
            .map(|u| derive_file_name(&u))
            .unwrap_or_default();
        let status = self
            .failing
            .lock()
            .unwrap()
            .get(&file_name)
            .copied()
            .unwrap_or(200);

        let data = Bytes::from(format!("contents of {file_name}"));
        let len = data.len() as u64;
        let body: ByteStream = Box::pin(futures::stream::once(async move { Ok(data) }));

        Ok(HttpResponse {
            status,
            content_length: Some(len),
            body,
        })
    }
}
