// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Pure comparison of desired-state manifests.
//!
//! Every comparison keys assets by their derived file name, never by full URL,
//! so rotating a signed URL's query token is invisible here.

use std::collections::BTreeMap;

use url::Url;

use crate::asset::AssetPresence;
use crate::manifest::{Manifest, MediaRef, Playlist};

/// An asset the manifest needs: its cache key and where to fetch it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRef {
    pub file_name: String,
    pub url: Url,
}

/// Every asset referenced by a manifest, keyed by file name
pub type RefSet = BTreeMap<String, Url>;

/// What a pass has to do to move the cache from one manifest to another
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AssetDiff {
    /// Remote assets with no local counterpart
    pub to_download: Vec<FileRef>,
    /// File names of local assets with no remote counterpart
    pub to_delete: Vec<String>,
}

impl AssetDiff {
    pub fn is_empty(&self) -> bool {
        self.to_download.is_empty() && self.to_delete.is_empty()
    }
}

/// Flatten every playlist's images and videos into a set of file refs
///
/// When several refs share a file name the first URL in manifest order wins.
pub fn extract_file_refs(manifest: &Manifest) -> RefSet {
    let mut refs = RefSet::new();
    for playlist in &manifest.playlists {
        for (_, media) in playlist.media() {
            refs.entry(media.file_name().to_string())
                .or_insert_with(|| media.url().clone());
        }
    }
    refs
}

/// Compare remote and local ref sets by file name
pub fn diff(remote: &RefSet, local: &RefSet) -> AssetDiff {
    let to_download = remote
        .iter()
        .filter(|(name, _)| !local.contains_key(*name))
        .map(|(name, url)| FileRef {
            file_name: name.clone(),
            url: url.clone(),
        })
        .collect();

    let to_delete = local
        .keys()
        .filter(|name| !remote.contains_key(*name))
        .cloned()
        .collect();

    AssetDiff {
        to_download,
        to_delete,
    }
}

/// Assets referenced by the manifest that are not present in the cache
pub fn missing_assets<P: AssetPresence + ?Sized>(
    manifest: &Manifest,
    presence: &P,
) -> Vec<FileRef> {
    extract_file_refs(manifest)
        .into_iter()
        .filter(|(name, _)| !presence.contains(name))
        .map(|(file_name, url)| FileRef { file_name, url })
        .collect()
}

/// Whether every asset the manifest references is present
///
/// An absent manifest has nothing to verify and yields `true`; callers keep
/// "no manifest" distinct through the `Option` itself.
pub fn all_assets_present<P: AssetPresence + ?Sized>(
    manifest: Option<&Manifest>,
    presence: &P,
) -> bool {
    let Some(manifest) = manifest else {
        return true;
    };

    manifest
        .playlists
        .iter()
        .flat_map(Playlist::media)
        .all(|(_, media)| presence.contains(media.file_name()))
}

/// Structural equality with file names substituted for URLs
///
/// Two manifests that differ only in signed-URL tokens are equivalent.
pub fn manifests_equivalent(a: Option<&Manifest>, b: Option<&Manifest>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => {
            a.playlists.len() == b.playlists.len()
                && a
                    .playlists
                    .iter()
                    .zip(&b.playlists)
                    .all(|(x, y)| playlists_equivalent(x, y))
        }
        _ => false,
    }
}

pub(crate) fn playlists_equivalent(a: &Playlist, b: &Playlist) -> bool {
    a.days == b.days
        && a.start == b.start
        && a.end == b.end
        && media_equivalent(&a.images, &b.images)
        && media_equivalent(&a.videos, &b.videos)
}

fn media_equivalent(a: &[MediaRef], b: &[MediaRef]) -> bool {
    a.len() == b.len()
        && a.iter().zip(b).all(|(x, y)| {
            x.file_name() == y.file_name() && x.duration() == y.duration()
        })
}
