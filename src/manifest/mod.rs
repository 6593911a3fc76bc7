mod filename;
mod model;

pub use filename::derive_file_name;
pub use model::{Manifest, MediaKind, MediaRef, Playlist, TimeOfDay, WeekdayMask};
