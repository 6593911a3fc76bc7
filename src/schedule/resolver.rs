// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::path::{Path, PathBuf};

use chrono::{Datelike, NaiveDateTime};
use tokio::sync::watch;

use crate::diff::playlists_equivalent;
use crate::manifest::{Manifest, MediaKind, Playlist, TimeOfDay};
use crate::state::SyncState;

/// Whether `playlist` is scheduled at the given local time
///
/// Windows are half-open: the start minute is inside, the end minute is not.
/// For a window crossing midnight, the part after midnight belongs to the day
/// the window started on.
pub fn is_active_at(playlist: &Playlist, now: NaiveDateTime) -> bool {
    let minute = TimeOfDay::from_time(now.time()).minutes();
    let start = playlist.start.minutes();
    let end = playlist.end.minutes();
    let today = now.weekday();

    if playlist.crosses_midnight() {
        (minute >= start && playlist.days.contains(today))
            || (minute < end && playlist.days.contains(today.pred()))
    } else {
        playlist.days.contains(today) && start <= minute && minute < end
    }
}

/// First playlist in manifest order whose window covers `now`
pub fn resolve_active(manifest: &Manifest, now: NaiveDateTime) -> Option<&Playlist> {
    find_active(manifest, now).map(|(_, playlist)| playlist)
}

fn find_active(manifest: &Manifest, now: NaiveDateTime) -> Option<(usize, &Playlist)> {
    manifest
        .playlists
        .iter()
        .enumerate()
        .find(|(_, playlist)| is_active_at(playlist, now))
}

/// One file the player should show
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaybackItem {
    pub path: PathBuf,
    pub kind: MediaKind,
    /// Seconds on screen; `None` plays a video to its end
    pub duration: Option<u32>,
}

/// The playlist currently scheduled, resolved to local files
#[derive(Debug, Clone)]
pub struct ActivePlaylist {
    /// Position of the playlist in the manifest
    pub index: usize,
    pub playlist: Playlist,
    /// Images first, then videos
    pub items: Vec<PlaybackItem>,
}

impl ActivePlaylist {
    fn new(index: usize, playlist: &Playlist, cache_dir: &Path) -> Self {
        let items = playlist
            .media()
            .map(|(kind, media)| PlaybackItem {
                path: cache_dir.join(media.file_name()),
                kind,
                duration: media.screen_time(kind),
            })
            .collect();

        Self {
            index,
            playlist: playlist.clone(),
            items,
        }
    }
}

// Signed URL tokens rotate; comparing them would report changes nobody can see
impl PartialEq for ActivePlaylist {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index
            && self.items == other.items
            && playlists_equivalent(&self.playlist, &other.playlist)
    }
}

impl Eq for ActivePlaylist {}

/// Resolves the active playlist against the last published sync state
#[derive(Debug, Clone)]
pub struct ScheduleResolver {
    state: watch::Receiver<SyncState>,
    cache_dir: PathBuf,
}

impl ScheduleResolver {
    pub fn new(state: watch::Receiver<SyncState>, cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            state,
            cache_dir: cache_dir.into(),
        }
    }

    pub fn active_playlist(&self, now: NaiveDateTime) -> Option<ActivePlaylist> {
        let manifest = self.state.borrow().manifest.clone()?;
        let (index, playlist) = find_active(&manifest, now)?;
        Some(ActivePlaylist::new(index, playlist, &self.cache_dir))
    }
}
