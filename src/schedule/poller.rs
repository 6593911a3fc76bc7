use std::time::Duration;

use chrono::NaiveDateTime;
use tokio::sync::watch;
use tracing::{debug, info};

use super::resolver::{ActivePlaylist, ScheduleResolver};

/// Source of the current local wall-clock time
pub trait Clock: Send + Sync {
    fn now(&self) -> NaiveDateTime;
}

/// The device's local time zone
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalClock;

impl Clock for LocalClock {
    fn now(&self) -> NaiveDateTime {
        chrono::Local::now().naive_local()
    }
}

/// Re-resolves the active playlist on a fixed cadence
pub struct SchedulePoller<K> {
    resolver: ScheduleResolver,
    clock: K,
    interval: Duration,
    current: Option<ActivePlaylist>,
}

impl<K: Clock> SchedulePoller<K> {
    pub fn new(resolver: ScheduleResolver, clock: K, interval: Duration) -> Self {
        Self {
            resolver,
            clock,
            interval,
            current: None,
        }
    }

    pub fn current(&self) -> Option<&ActivePlaylist> {
        self.current.as_ref()
    }

    /// Resolve once, returning the new value only if it changed
    pub fn poll(&mut self) -> Option<Option<ActivePlaylist>> {
        let active = self.resolver.active_playlist(self.clock.now());
        if active == self.current {
            return None;
        }

        match &active {
            Some(playlist) => info!(
                index = playlist.index,
                start = %playlist.playlist.start,
                end = %playlist.playlist.end,
                items = playlist.items.len(),
                "active playlist changed"
            ),
            None => info!("no playlist scheduled"),
        }
        self.current = active.clone();
        Some(active)
    }

    /// Poll until every receiver of `tx` is gone
    pub async fn run(mut self, tx: watch::Sender<Option<ActivePlaylist>>) {
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Some(active) = self.poll() {
                        tx.send_replace(active);
                    }
                }
                _ = tx.closed() => break,
            }
        }
        debug!("schedule poller stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::{Arc, Mutex};

    use chrono::NaiveDate;

    use crate::manifest::{Manifest, MediaRef, Playlist, TimeOfDay, WeekdayMask};
    use crate::state::StatePublisher;

    #[derive(Clone)]
    struct FixedClock(Arc<Mutex<NaiveDateTime>>);

    impl FixedClock {
        fn at(hour: u32, minute: u32) -> Self {
            Self(Arc::new(Mutex::new(time(hour, minute))))
        }

        fn set(&self, hour: u32, minute: u32) {
            *self.0.lock().unwrap() = time(hour, minute);
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> NaiveDateTime {
            *self.0.lock().unwrap()
        }
    }

    fn time(hour: u32, minute: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, 1)
            .unwrap()
            .and_hms_opt(hour, minute, 0)
            .unwrap()
    }

    fn manifest(image_url: &str) -> Manifest {
        Manifest::new(vec![Playlist {
            days: WeekdayMask::every_day(),
            start: TimeOfDay::from_hm(8, 0).unwrap(),
            end: TimeOfDay::from_hm(18, 0).unwrap(),
            images: vec![MediaRef::parse(image_url, Some(5)).unwrap()],
            videos: Vec::new(),
        }])
    }

    fn poller(publisher: &StatePublisher, clock: FixedClock) -> SchedulePoller<FixedClock> {
        let resolver = ScheduleResolver::new(publisher.subscribe(), "/cache");
        SchedulePoller::new(resolver, clock, Duration::from_millis(10))
    }

    #[test]
    fn reports_only_changes() {
        let publisher = StatePublisher::new();
        publisher.publish(Some(manifest("https://cdn.example.com/a.jpg")), true, false);
        let clock = FixedClock::at(9, 0);
        let mut poller = poller(&publisher, clock.clone());

        let first = poller.poll().expect("first resolution is a change");
        assert_eq!(first.unwrap().index, 0);
        assert!(poller.poll().is_none());

        clock.set(19, 0);
        assert_eq!(poller.poll(), Some(None));
        assert!(poller.current().is_none());
        assert!(poller.poll().is_none());
    }

    #[test]
    fn rotated_url_tokens_are_not_a_change() {
        let publisher = StatePublisher::new();
        publisher.publish(Some(manifest("https://cdn.example.com/a.jpg?t=1")), true, false);
        let mut poller = poller(&publisher, FixedClock::at(9, 0));
        poller.poll();

        publisher.publish(Some(manifest("https://cdn.example.com/a.jpg?t=2")), true, false);
        assert!(poller.poll().is_none());

        publisher.publish(Some(manifest("https://cdn.example.com/b.jpg")), true, false);
        assert!(poller.poll().is_some());
    }

    #[test]
    fn nothing_published_means_nothing_active() {
        let publisher = StatePublisher::new();
        let mut poller = poller(&publisher, FixedClock::at(9, 0));

        assert!(poller.poll().is_none());
    }

    #[tokio::test]
    async fn run_publishes_and_stops_when_receivers_drop() {
        let publisher = StatePublisher::new();
        publisher.publish(Some(manifest("https://cdn.example.com/a.jpg")), true, false);
        let poller = poller(&publisher, FixedClock::at(9, 0));

        let (tx, mut rx) = watch::channel(None);
        let task = tokio::spawn(poller.run(tx));

        rx.changed().await.unwrap();
        assert!(rx.borrow().is_some());

        drop(rx);
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();
    }
}
