// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::fmt;

use chrono::{NaiveTime, Timelike, Weekday};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::ManifestError;

use super::filename::derive_file_name;

const MINUTES_PER_DAY: u16 = 24 * 60;

/// Wall-clock time of day with minute precision
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimeOfDay(u16);

impl TimeOfDay {
    /// Build a time of day from hours and minutes, `None` if out of range
    pub fn from_hm(hour: u32, minute: u32) -> Option<Self> {
        if hour < 24 && minute < 60 {
            Some(Self((hour * 60 + minute) as u16))
        } else {
            None
        }
    }

    /// Truncate a `NaiveTime` to minute precision
    pub fn from_time(time: NaiveTime) -> Self {
        Self((time.hour() * 60 + time.minute()) as u16)
    }

    /// Parse `HH:MM`, also accepting `HH:MM:SS` (seconds are dropped)
    pub fn parse(value: &str) -> Result<Self, ManifestError> {
        let trimmed = value.trim();
        NaiveTime::parse_from_str(trimmed, "%H:%M")
            .or_else(|_| NaiveTime::parse_from_str(trimmed, "%H:%M:%S"))
            .map(Self::from_time)
            .map_err(|_| ManifestError::InvalidTime {
                value: value.to_string(),
            })
    }

    /// Minutes since midnight, in `0..1440`
    pub fn minutes(self) -> u16 {
        self.0
    }
}

impl fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.0 / 60, self.0 % 60)
    }
}

impl TryFrom<u16> for TimeOfDay {
    type Error = ManifestError;

    fn try_from(minutes: u16) -> Result<Self, Self::Error> {
        if minutes < MINUTES_PER_DAY {
            Ok(Self(minutes))
        } else {
            Err(ManifestError::InvalidTime {
                value: minutes.to_string(),
            })
        }
    }
}

/// Which weekdays a playlist is enabled on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct WeekdayMask([bool; 7]);

impl WeekdayMask {
    /// Build a mask from flags ordered Monday through Sunday
    pub const fn from_days(days: [bool; 7]) -> Self {
        Self(days)
    }

    /// A mask with every day enabled
    pub const fn every_day() -> Self {
        Self([true; 7])
    }

    pub fn only(day: Weekday) -> Self {
        let mut mask = Self::default();
        mask.set(day, true);
        mask
    }

    pub fn contains(&self, day: Weekday) -> bool {
        self.0[day.num_days_from_monday() as usize]
    }

    pub fn set(&mut self, day: Weekday, enabled: bool) {
        self.0[day.num_days_from_monday() as usize] = enabled;
    }

    /// Flags ordered Monday through Sunday
    pub fn days(&self) -> [bool; 7] {
        self.0
    }
}

/// Whether a media item is a still image or a video clip
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Video,
}

/// A reference to a remote media file and how long to show it
///
/// The derived file name is the cache key; two refs with the same file name
/// are the same cached asset regardless of their full URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaRef {
    url: Url,
    duration: Option<u32>,
    file_name: String,
}

impl MediaRef {
    pub fn new(url: Url, duration: Option<u32>) -> Self {
        let file_name = derive_file_name(&url);
        Self {
            url,
            duration,
            file_name,
        }
    }

    /// Parse a URL string into a media ref
    pub fn parse(url: &str, duration: Option<u32>) -> Result<Self, ManifestError> {
        let parsed = Url::parse(url).map_err(|e| ManifestError::InvalidUrl {
            url: url.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self::new(parsed, duration))
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Display duration in seconds, if any
    pub fn duration(&self) -> Option<u32> {
        self.duration
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    /// True when the item should play until its natural end (videos without a duration)
    pub fn plays_until_end(&self) -> bool {
        self.duration.is_none_or(|secs| secs == 0)
    }

    /// Seconds on screen when shown as `kind`; `None` lets a video run to its end
    pub fn screen_time(&self, kind: MediaKind) -> Option<u32> {
        match kind {
            MediaKind::Video if self.plays_until_end() => None,
            _ => self.duration,
        }
    }
}

/// A timed playlist within a setup
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "PlaylistRecord", into = "PlaylistRecord")]
pub struct Playlist {
    pub days: WeekdayMask,
    pub start: TimeOfDay,
    /// When earlier than `start`, the window crosses midnight
    pub end: TimeOfDay,
    pub images: Vec<MediaRef>,
    pub videos: Vec<MediaRef>,
}

impl Playlist {
    /// True when the daily window wraps past midnight
    pub fn crosses_midnight(&self) -> bool {
        self.end < self.start
    }

    /// Every media ref, images first then videos
    pub fn media(&self) -> impl Iterator<Item = (MediaKind, &MediaRef)> {
        self.images
            .iter()
            .map(|m| (MediaKind::Image, m))
            .chain(self.videos.iter().map(|m| (MediaKind::Video, m)))
    }
}

/// The desired state snapshot: an ordered list of playlists
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Manifest {
    #[serde(rename = "data", default)]
    pub playlists: Vec<Playlist>,
}

impl Manifest {
    pub fn new(playlists: Vec<Playlist>) -> Self {
        Self { playlists }
    }

    pub fn is_empty(&self) -> bool {
        self.playlists.is_empty()
    }
}

/// Media entry as it appears on the wire; videos may be a bare URL string
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum MediaRecord {
    Full {
        url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        duration: Option<u32>,
    },
    Bare(String),
}

impl MediaRecord {
    fn into_parts(self) -> (String, Option<u32>) {
        match self {
            Self::Full { url, duration } => (url, duration),
            Self::Bare(url) => (url, None),
        }
    }
}

impl From<&MediaRef> for MediaRecord {
    fn from(media: &MediaRef) -> Self {
        Self::Full {
            url: media.url.to_string(),
            duration: media.duration,
        }
    }
}

/// Playlist as it appears on the wire and in the persisted manifest
#[derive(Debug, Clone, Serialize, Deserialize)]
struct PlaylistRecord {
    #[serde(default)]
    monday: bool,
    #[serde(default)]
    tuesday: bool,
    #[serde(default)]
    wednesday: bool,
    #[serde(default)]
    thursday: bool,
    #[serde(default)]
    friday: bool,
    #[serde(default)]
    saturday: bool,
    #[serde(default)]
    sunday: bool,
    start_time: String,
    end_time: String,
    #[serde(default)]
    images: Option<Vec<MediaRecord>>,
    #[serde(default)]
    videos: Option<Vec<MediaRecord>>,
}

impl TryFrom<PlaylistRecord> for Playlist {
    type Error = ManifestError;

    fn try_from(record: PlaylistRecord) -> Result<Self, Self::Error> {
        let days = WeekdayMask::from_days([
            record.monday,
            record.tuesday,
            record.wednesday,
            record.thursday,
            record.friday,
            record.saturday,
            record.sunday,
        ]);

        let images = record
            .images
            .unwrap_or_default()
            .into_iter()
            .map(|entry| {
                let (url, duration) = entry.into_parts();
                if duration.is_none() {
                    return Err(ManifestError::MissingImageDuration { url });
                }
                MediaRef::parse(&url, duration)
            })
            .collect::<Result<Vec<_>, _>>()?;

        let videos = record
            .videos
            .unwrap_or_default()
            .into_iter()
            .map(|entry| {
                let (url, duration) = entry.into_parts();
                MediaRef::parse(&url, duration)
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            days,
            start: TimeOfDay::parse(&record.start_time)?,
            end: TimeOfDay::parse(&record.end_time)?,
            images,
            videos,
        })
    }
}

impl From<Playlist> for PlaylistRecord {
    fn from(playlist: Playlist) -> Self {
        let [monday, tuesday, wednesday, thursday, friday, saturday, sunday] =
            playlist.days.days();

        Self {
            monday,
            tuesday,
            wednesday,
            thursday,
            friday,
            saturday,
            sunday,
            start_time: playlist.start.to_string(),
            end_time: playlist.end.to_string(),
            images: Some(playlist.images.iter().map(MediaRecord::from).collect()),
            videos: Some(playlist.videos.iter().map(MediaRecord::from).collect()),
        }
    }
}
