// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use url::Url;

use crate::asset::AssetStore;
use crate::diff::{
    FileRef, RefSet, all_assets_present, diff, extract_file_refs, manifests_equivalent,
    missing_assets,
};
use crate::error::{FailureKind, StoreError, SyncError};
use crate::http::HttpClient;
use crate::inputs::{Credential, SyncInputs};
use crate::manifest::Manifest;
use crate::progress::{NoopReporter, ProgressEvent, SharedProgressReporter};
use crate::remote::fetch_remote_setup;
use crate::state::{StatePublisher, SyncState};

/// Shortest period [`SyncCoordinator::refresh_every`] will tick at
pub const MIN_REFRESH_PERIOD: Duration = Duration::from_secs(1);

/// Options for setup synchronization
#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Maximum number of concurrent downloads or deletes within a pass
    pub max_concurrent: usize,
    /// Bound on the setup fetch
    pub request_timeout: Duration,
    /// Remove cache files the persisted manifest does not reference
    pub prune_orphans: bool,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            max_concurrent: 3,
            request_timeout: Duration::from_secs(20),
            prune_orphans: true,
        }
    }
}

/// How a single sync pass ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PassOutcome {
    /// Remote and local setups are equivalent and every asset was present
    Unchanged,
    /// Setups are equivalent but missing assets had to be fetched
    Repaired,
    /// The remote setup differed and was applied
    Updated,
    /// The backend has no setup for this device; the cache was emptied
    Cleared,
    /// The pass gave up before mutating local state
    Aborted { kind: FailureKind, error: String },
}

/// Result of a sync pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PassReport {
    pub outcome: PassOutcome,
    /// Number of assets downloaded
    pub downloaded: usize,
    /// Number of assets that were already on disk
    pub skipped: usize,
    /// Number of files removed from the cache
    pub deleted: usize,
    /// Items that failed (file name, error message)
    pub failed: Vec<(String, String)>,
}

impl PassReport {
    fn new(outcome: PassOutcome) -> Self {
        Self {
            outcome,
            downloaded: 0,
            skipped: 0,
            deleted: 0,
            failed: Vec::new(),
        }
    }

    fn aborted(error: &SyncError) -> Self {
        Self::new(PassOutcome::Aborted {
            kind: error.kind(),
            error: error.to_string(),
        })
    }
}

/// What a call to [`SyncCoordinator::refresh`] did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// No credential or no connectivity; nothing was attempted
    Skipped,
    /// A pass was already running; one follow-up pass will run after it
    Coalesced,
    /// This call ran one or more passes; `report` is from the last one
    Completed { passes: usize, report: PassReport },
}

#[derive(Debug, Default)]
struct Flight {
    running: bool,
    pending: usize,
}

/// Reconciles the local asset cache against the backend's setup
///
/// At most one pass runs at a time. Refreshes arriving while a pass is in
/// flight are coalesced into a single follow-up pass.
pub struct SyncCoordinator<C> {
    client: C,
    store: AssetStore,
    endpoint: Url,
    inputs: SyncInputs,
    options: SyncOptions,
    reporter: SharedProgressReporter,
    publisher: StatePublisher,
    flight: Mutex<Flight>,
}

impl<C: HttpClient + 'static> SyncCoordinator<C> {
    pub fn new(
        client: C,
        store: AssetStore,
        endpoint: Url,
        inputs: SyncInputs,
        options: SyncOptions,
    ) -> Self {
        Self {
            client,
            store,
            endpoint,
            inputs,
            options,
            reporter: NoopReporter::shared(),
            publisher: StatePublisher::new(),
            flight: Mutex::new(Flight::default()),
        }
    }

    pub fn with_reporter(mut self, reporter: SharedProgressReporter) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn store(&self) -> &AssetStore {
        &self.store
    }

    pub fn subscribe(&self) -> watch::Receiver<SyncState> {
        self.publisher.subscribe()
    }

    pub fn state(&self) -> SyncState {
        self.publisher.snapshot()
    }

    /// Publish whatever manifest is already on disk
    ///
    /// Meant for startup, before any network is available. Returns `false`
    /// when the load was skipped because a pass is running or already published.
    pub async fn load_local(&self) -> bool {
        if self.lock_flight().running {
            debug!("pass in flight, skipping local load");
            return false;
        }

        let manifest = match self.store.read_manifest().await {
            Ok(manifest) => manifest,
            Err(e) => {
                warn!(error = %e, "could not load local manifest");
                None
            }
        };
        let cached = self.cached_assets().await;
        let complete = all_assets_present(manifest.as_ref(), &cached);
        let loaded = self.publisher.publish_initial(manifest, complete);

        if loaded {
            info!(assets_complete = complete, "local setup loaded");
        }
        loaded
    }

    /// Run a sync pass now, or coalesce into the one already running
    pub async fn refresh(&self) -> RefreshOutcome {
        let Some(mut credential) = self.inputs.ready() else {
            debug!("refresh skipped: offline or no credential");
            return RefreshOutcome::Skipped;
        };

        if !self.try_begin() {
            return RefreshOutcome::Coalesced;
        }

        let mut passes = 0;
        loop {
            let report = self.run_pass(&credential).await;
            passes += 1;

            let follow_up = self.take_pending(false);
            self.publish_current(follow_up.is_some()).await;

            // Requests can land while the state is being published
            match follow_up.or_else(|| self.take_pending(true)) {
                Some(next) => {
                    debug!("running coalesced follow-up pass");
                    credential = next;
                }
                None => return RefreshOutcome::Completed { passes, report },
            }
        }
    }

    /// Call [`refresh`](Self::refresh) whenever credential or connectivity change
    pub fn watch_triggers(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut credential = self.inputs.credential.clone();
            let mut online = self.inputs.online.clone();
            credential.borrow_and_update();
            online.borrow_and_update();

            self.spawn_refresh();

            loop {
                tokio::select! {
                    changed = credential.changed() => if changed.is_err() { break },
                    changed = online.changed() => if changed.is_err() { break },
                }
                self.spawn_refresh();
            }
            debug!("input providers dropped, trigger watcher stopped");
        })
    }

    /// Call [`refresh`](Self::refresh) on a fixed interval
    ///
    /// Periods shorter than a second are raised to one second.
    pub fn refresh_every(self: Arc<Self>, period: Duration) -> JoinHandle<()> {
        let period = period.max(MIN_REFRESH_PERIOD);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.tick().await;
            loop {
                interval.tick().await;
                self.refresh().await;
            }
        })
    }

    fn spawn_refresh(self: &Arc<Self>) {
        if self.inputs.ready().is_none() {
            return;
        }
        let this = Arc::clone(self);
        tokio::spawn(async move {
            this.refresh().await;
        });
    }

    fn lock_flight(&self) -> MutexGuard<'_, Flight> {
        self.flight.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn try_begin(&self) -> bool {
        let mut flight = self.lock_flight();
        if flight.running {
            flight.pending += 1;
            debug!(pending = flight.pending, "pass in flight, refresh coalesced");
            return false;
        }
        flight.running = true;
        true
    }

    /// Consume any pending requests, returning the credential for a follow-up pass
    ///
    /// With `release`, the flight is ended when no follow-up is due.
    fn take_pending(&self, release: bool) -> Option<Credential> {
        let mut flight = self.lock_flight();
        if flight.pending > 0 {
            flight.pending = 0;
            if let Some(credential) = self.inputs.ready() {
                return Some(credential);
            }
        }
        if release {
            flight.running = false;
        }
        None
    }

    async fn run_pass(&self, credential: &Credential) -> PassReport {
        match self.store.clean_partial_files().await {
            Ok(0) => {}
            Ok(count) => {
                info!(count, "removed partial downloads");
                self.reporter
                    .report(ProgressEvent::PartialFilesCleanedUp { count });
            }
            Err(e) => warn!(error = %e, "could not scan cache for partial files"),
        }

        self.reporter.report(ProgressEvent::FetchingSetup {
            url: self.endpoint.to_string(),
        });

        let remote = match fetch_remote_setup(
            &self.client,
            &self.endpoint,
            credential,
            self.options.request_timeout,
        )
        .await
        {
            Ok(remote) => remote,
            Err(e) => return self.abort(e.into()),
        };

        let local = match self.store.read_manifest().await {
            Ok(local) => local,
            Err(e @ StoreError::ManifestCorrupt { .. }) => {
                warn!(error = %e, "local manifest unreadable, replacing it");
                None
            }
            Err(e) => return self.abort(e.into()),
        };

        let (mut report, authoritative) =
            if manifests_equivalent(remote.as_ref(), local.as_ref()) {
                self.repair(remote.as_ref()).await
            } else {
                self.publisher.begin_update();
                self.apply(remote, local.as_ref()).await
            };

        if self.options.prune_orphans
            && let Some(referenced) = authoritative
        {
            self.prune_orphans(&referenced, &mut report).await;
        }

        info!(
            outcome = ?report.outcome,
            downloaded = report.downloaded,
            deleted = report.deleted,
            failed = report.failed.len(),
            "sync pass finished"
        );
        self.reporter.report(ProgressEvent::SyncCompleted {
            downloaded_count: report.downloaded,
            deleted_count: report.deleted,
            failed_count: report.failed.len(),
        });

        report
    }

    fn abort(&self, error: SyncError) -> PassReport {
        warn!(error = %error, "sync pass aborted, local state left untouched");
        self.reporter.report(ProgressEvent::SyncAborted {
            error: error.to_string(),
        });
        PassReport::aborted(&error)
    }

    /// Equivalent setups: only fetch whatever is missing, using the fresh URLs
    async fn repair(&self, remote: Option<&Manifest>) -> (PassReport, Option<RefSet>) {
        let missing = match remote {
            Some(manifest) => missing_assets(manifest, &self.cached_assets().await),
            None => Vec::new(),
        };
        let referenced = remote.map(extract_file_refs).unwrap_or_default();

        if missing.is_empty() {
            debug!("setup unchanged and complete");
            return (PassReport::new(PassOutcome::Unchanged), Some(referenced));
        }

        info!(missing = missing.len(), "setup unchanged, fetching missing assets");
        self.publisher.begin_update();
        self.reporter.report(ProgressEvent::SyncPlanReady {
            playlists: remote.map_or(0, |m| m.playlists.len()),
            to_download: missing.len(),
            to_delete: 0,
        });

        let mut report = PassReport::new(PassOutcome::Repaired);
        self.download_all(missing, &mut report).await;
        (report, Some(referenced))
    }

    /// Move the cache from `local` to `remote`: delete, download, then persist
    ///
    /// Returns the refs of the manifest now on disk, or `None` when persisting
    /// failed and the disk no longer says what should exist.
    async fn apply(
        &self,
        remote: Option<Manifest>,
        local: Option<&Manifest>,
    ) -> (PassReport, Option<RefSet>) {
        let local_refs = local.map(extract_file_refs).unwrap_or_default();

        let Some(remote) = remote else {
            info!(assets = local_refs.len(), "no setup assigned, clearing cache");
            self.reporter.report(ProgressEvent::SyncPlanReady {
                playlists: 0,
                to_download: 0,
                to_delete: local_refs.len(),
            });

            let mut report = PassReport::new(PassOutcome::Cleared);
            self.delete_all(local_refs.into_keys().collect(), &mut report)
                .await;

            return match self.store.delete_manifest().await {
                Ok(_) => (report, Some(RefSet::new())),
                Err(e) => {
                    warn!(error = %e, "could not remove local manifest");
                    report.failed.push(("manifest".to_string(), e.to_string()));
                    (report, None)
                }
            };
        };

        let remote_refs = extract_file_refs(&remote);
        let plan = diff(&remote_refs, &local_refs);

        info!(
            playlists = remote.playlists.len(),
            to_download = plan.to_download.len(),
            to_delete = plan.to_delete.len(),
            "applying new setup"
        );
        self.reporter.report(ProgressEvent::SyncPlanReady {
            playlists: remote.playlists.len(),
            to_download: plan.to_download.len(),
            to_delete: plan.to_delete.len(),
        });

        let mut report = PassReport::new(PassOutcome::Updated);
        self.delete_all(plan.to_delete, &mut report).await;
        self.download_all(plan.to_download, &mut report).await;

        match self.store.write_manifest(&remote).await {
            Ok(()) => (report, Some(remote_refs)),
            Err(e) => {
                warn!(error = %e, "could not persist new setup, previous one stays in effect");
                report.failed.push(("manifest".to_string(), e.to_string()));
                (report, None)
            }
        }
    }

    async fn download_all(&self, refs: Vec<FileRef>, report: &mut PassReport) {
        let total = refs.len();

        let results: Vec<DownloadOutcome> = futures::stream::iter(refs.into_iter().enumerate())
            .map(|(index, file_ref)| self.download_one(file_ref, index, total))
            .buffer_unordered(self.options.max_concurrent.max(1))
            .collect()
            .await;

        for result in results {
            match result {
                DownloadOutcome::Downloaded => report.downloaded += 1,
                DownloadOutcome::AlreadyPresent => report.skipped += 1,
                DownloadOutcome::Failed(file_name, error) => report.failed.push((file_name, error)),
            }
        }
    }

    async fn download_one(&self, file_ref: FileRef, index: usize, total: usize) -> DownloadOutcome {
        let FileRef { file_name, url } = file_ref;

        // Left behind by an earlier pass that never persisted its manifest
        if self.store.exists(&file_name).await {
            debug!(file_name = %file_name, "asset already present");
            return DownloadOutcome::AlreadyPresent;
        }

        self.reporter.report(ProgressEvent::DownloadStarting {
            file_name: file_name.clone(),
            index,
            total,
        });

        match self.store.download(&self.client, url.as_str(), &file_name).await {
            Ok(bytes) => {
                self.reporter.report(ProgressEvent::DownloadCompleted {
                    file_name,
                    bytes,
                });
                DownloadOutcome::Downloaded
            }
            Err(e) => {
                warn!(file_name = %file_name, url = %url, error = %e, "asset download failed");
                self.reporter.report(ProgressEvent::DownloadFailed {
                    file_name: file_name.clone(),
                    error: e.to_string(),
                });
                DownloadOutcome::Failed(file_name, e.to_string())
            }
        }
    }

    async fn delete_all(&self, file_names: Vec<String>, report: &mut PassReport) {
        let results: Vec<(String, Result<bool, StoreError>)> = futures::stream::iter(file_names)
            .map(|file_name| async move {
                let result = self.store.delete(&file_name).await;
                (file_name, result)
            })
            .buffer_unordered(self.options.max_concurrent.max(1))
            .collect()
            .await;

        for (file_name, result) in results {
            match result {
                Ok(removed) => {
                    if removed {
                        report.deleted += 1;
                    }
                    debug!(file_name = %file_name, removed, "stale asset deleted");
                    self.reporter
                        .report(ProgressEvent::AssetDeleted { file_name });
                }
                Err(e) => {
                    warn!(file_name = %file_name, error = %e, "could not delete stale asset");
                    report.failed.push((file_name, e.to_string()));
                }
            }
        }
    }

    async fn prune_orphans(&self, referenced: &RefSet, report: &mut PassReport) {
        let assets = match self.store.list_assets().await {
            Ok(assets) => assets,
            Err(e) => {
                warn!(error = %e, "could not list cache for orphans");
                return;
            }
        };

        let orphans: Vec<String> = assets
            .into_iter()
            .filter(|name| !referenced.contains_key(name))
            .collect();

        if orphans.is_empty() {
            return;
        }

        info!(count = orphans.len(), "removing unreferenced cache files");
        self.delete_all(orphans, report).await;
    }

    /// Reload the manifest from disk and publish it with fresh flags
    async fn publish_current(&self, updating: bool) {
        let manifest = match self.store.read_manifest().await {
            Ok(manifest) => manifest,
            Err(e) => {
                warn!(error = %e, "could not reload local manifest");
                None
            }
        };
        let cached = self.cached_assets().await;
        let complete = all_assets_present(manifest.as_ref(), &cached);
        self.publisher.publish(manifest, complete, updating);
    }

    /// Snapshot of the cache; an unreadable directory counts as empty
    async fn cached_assets(&self) -> BTreeSet<String> {
        self.store.list_assets().await.unwrap_or_else(|e| {
            warn!(error = %e, "could not list cached assets");
            BTreeSet::new()
        })
    }
}

enum DownloadOutcome {
    Downloaded,
    AlreadyPresent,
    Failed(String, String),
}
