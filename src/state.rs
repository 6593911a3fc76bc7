use std::sync::Arc;

use tokio::sync::watch;

use crate::manifest::Manifest;

/// Snapshot of the cache as last published by the sync coordinator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncState {
    /// The initial local load has not completed yet
    pub loading: bool,
    /// A sync pass is currently reconciling the cache
    pub updating: bool,
    /// Every file the manifest references is present on disk
    pub assets_complete: bool,
    /// Last fully persisted manifest; `None` means no setup is stored
    pub manifest: Option<Arc<Manifest>>,
}

impl Default for SyncState {
    fn default() -> Self {
        Self {
            loading: true,
            updating: false,
            assets_complete: false,
            manifest: None,
        }
    }
}

impl SyncState {
    /// Ready for playback: loaded, not mid-update and nothing missing
    pub fn is_ready(&self) -> bool {
        !self.loading && !self.updating && self.assets_complete && self.manifest.is_some()
    }
}

/// Single-writer publisher for [`SyncState`]
///
/// Only the sync coordinator holds one; everyone else gets a
/// `watch::Receiver` and reads snapshots.
#[derive(Debug)]
pub struct StatePublisher {
    tx: watch::Sender<SyncState>,
}

impl StatePublisher {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(SyncState::default());
        Self { tx }
    }

    pub fn subscribe(&self) -> watch::Receiver<SyncState> {
        self.tx.subscribe()
    }

    pub fn snapshot(&self) -> SyncState {
        self.tx.borrow().clone()
    }

    /// Flag that a pass has started changing the cache
    pub(crate) fn begin_update(&self) {
        self.tx.send_if_modified(|state| {
            if state.updating {
                false
            } else {
                state.updating = true;
                true
            }
        });
    }

    /// Publish the manifest found on disk at startup
    ///
    /// Ignored once anything else has been published, so a slow local load
    /// never overwrites the result of a pass. Leaves `updating` alone.
    pub(crate) fn publish_initial(&self, manifest: Option<Manifest>, assets_complete: bool) -> bool {
        let mut manifest = manifest.map(Arc::new);
        self.tx.send_if_modified(|state| {
            if !state.loading {
                return false;
            }
            state.loading = false;
            state.assets_complete = assets_complete;
            state.manifest = manifest.take();
            true
        })
    }

    /// Publish the result of a finished pass
    pub(crate) fn publish(
        &self,
        manifest: Option<Manifest>,
        assets_complete: bool,
        updating: bool,
    ) {
        let manifest = manifest.map(Arc::new);
        self.tx.send_modify(|state| {
            state.loading = false;
            state.updating = updating;
            state.assets_complete = assets_complete;
            state.manifest = manifest;
        });
    }
}

impl Default for StatePublisher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_loading_with_no_manifest() {
        let publisher = StatePublisher::new();
        let state = publisher.snapshot();

        assert!(state.loading);
        assert!(!state.updating);
        assert!(state.manifest.is_none());
        assert!(!state.is_ready());
    }

    #[test]
    fn publish_clears_loading_and_notifies() {
        let publisher = StatePublisher::new();
        let mut rx = publisher.subscribe();

        publisher.publish(Some(Manifest::default()), true, false);

        assert!(rx.has_changed().unwrap());
        let state = rx.borrow_and_update().clone();
        assert!(!state.loading);
        assert!(state.assets_complete);
        assert!(state.is_ready());
    }

    #[test]
    fn begin_update_only_notifies_once() {
        let publisher = StatePublisher::new();
        let mut rx = publisher.subscribe();

        publisher.begin_update();
        assert!(rx.has_changed().unwrap());
        rx.borrow_and_update();

        publisher.begin_update();
        assert!(!rx.has_changed().unwrap());
        assert!(publisher.snapshot().updating);
    }

    #[test]
    fn initial_publish_is_ignored_after_a_pass() {
        let publisher = StatePublisher::new();
        publisher.publish(None, true, false);

        assert!(!publisher.publish_initial(Some(Manifest::default()), true));
        assert!(publisher.snapshot().manifest.is_none());
    }

    #[test]
    fn initial_publish_keeps_update_flag() {
        let publisher = StatePublisher::new();
        publisher.begin_update();

        assert!(publisher.publish_initial(None, true));
        let state = publisher.snapshot();
        assert!(!state.loading);
        assert!(state.updating);
    }

    #[test]
    fn missing_assets_block_readiness() {
        let publisher = StatePublisher::new();
        publisher.publish(Some(Manifest::default()), false, false);
        assert!(!publisher.snapshot().is_ready());
    }
}
