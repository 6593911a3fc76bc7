mod poller;
mod resolver;

pub use poller::{Clock, LocalClock, SchedulePoller};
pub use resolver::{ActivePlaylist, PlaybackItem, ScheduleResolver, is_active_at, resolve_active};
