//! Purpose: Shared wake-up channel for event-driven waits.
//! Exports: `Broadcaster`, `Subscription`, `Wake`, `GLOBAL_HEARTBEAT`.
//! Role: Any producer posts "something changed"; every parked subscriber wakes and re-checks.
//! Invariants: Posts are counted by a generation number, so a post that lands between a
//! subscriber's predicate check and its park is never lost.
//! Invariants: Parking is always bounded by a timeout; delivery is best-effort.
//! Invariants: Wakes are not targeted; every subscriber of a broadcaster sees every post.
use std::sync::{Arc, Condvar, Mutex, MutexGuard, OnceLock, Weak};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::core::error::{Error, ErrorKind};

/// Interval of the periodic nudge posted on `Broadcaster::global()`.
pub const GLOBAL_HEARTBEAT: Duration = Duration::from_millis(500);

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Wake {
    Notified,
    TimedOut,
}

struct Channel {
    generation: Mutex<u64>,
    ready: Condvar,
}

impl Channel {
    fn lock(&self) -> Result<MutexGuard<'_, u64>, Error> {
        self.generation
            .lock()
            .map_err(|_| Error::poisoned("broadcaster"))
    }

    fn post(&self) {
        // A poisoned counter is still a valid counter.
        let mut generation = match self.generation.lock() {
            Ok(generation) => generation,
            Err(poisoned) => poisoned.into_inner(),
        };
        *generation = generation.wrapping_add(1);
        self.ready.notify_all();
    }
}

/// Cheap to clone; clones share one channel.
#[derive(Clone)]
pub struct Broadcaster {
    channel: Arc<Channel>,
}

impl Default for Broadcaster {
    fn default() -> Self {
        Self::new()
    }
}

impl Broadcaster {
    /// A private notification domain.
    pub fn new() -> Self {
        Self {
            channel: Arc::new(Channel {
                generation: Mutex::new(0),
                ready: Condvar::new(),
            }),
        }
    }

    /// The process-wide broadcaster engines use unless given another one.
    ///
    /// First use starts its dispatcher, which nudges every subscriber each `GLOBAL_HEARTBEAT`.
    pub fn global() -> Broadcaster {
        static GLOBAL: OnceLock<Broadcaster> = OnceLock::new();
        GLOBAL
            .get_or_init(|| {
                let broadcaster = Broadcaster::new();
                if let Err(err) = broadcaster.start_heartbeat(GLOBAL_HEARTBEAT) {
                    warn!(error = %err, "global heartbeat unavailable; relying on park timeouts");
                }
                broadcaster
            })
            .clone()
    }

    /// Wake every parked subscriber. A no-op when nobody is parked.
    pub fn notify(&self) {
        self.channel.post();
    }

    pub fn subscribe(&self) -> Result<Subscription, Error> {
        let seen = *self.channel.lock()?;
        Ok(Subscription {
            channel: self.channel.clone(),
            seen,
        })
    }

    pub fn same_channel(&self, other: &Broadcaster) -> bool {
        Arc::ptr_eq(&self.channel, &other.channel)
    }

    /// Spawn a background dispatcher that posts a nudge every `interval`.
    ///
    /// The thread exits once every handle to this broadcaster has been dropped.
    pub fn start_heartbeat(&self, interval: Duration) -> Result<(), Error> {
        let channel: Weak<Channel> = Arc::downgrade(&self.channel);
        thread::Builder::new()
            .name("condwait-heartbeat".to_string())
            .spawn(move || {
                loop {
                    thread::sleep(interval);
                    match channel.upgrade() {
                        Some(channel) => channel.post(),
                        None => break,
                    }
                }
                debug!("heartbeat stopped");
            })
            .map_err(|err| {
                Error::new(ErrorKind::Internal)
                    .with_message("failed to spawn heartbeat thread")
                    .with_source(err)
            })?;
        Ok(())
    }
}

/// One party's view of the channel: the last post it has observed.
pub struct Subscription {
    channel: Arc<Channel>,
    seen: u64,
}

impl Subscription {
    /// Block until a post newer than the last one observed arrives, or `timeout` elapses.
    pub fn park(&mut self, timeout: Duration) -> Result<Wake, Error> {
        let deadline = Instant::now().checked_add(timeout);
        let mut generation = self.channel.lock()?;
        loop {
            if *generation != self.seen {
                self.seen = *generation;
                return Ok(Wake::Notified);
            }
            let remaining = match deadline {
                Some(deadline) => deadline.saturating_duration_since(Instant::now()),
                None => timeout,
            };
            if remaining.is_zero() {
                return Ok(Wake::TimedOut);
            }
            let (next, _) = self
                .channel
                .ready
                .wait_timeout(generation, remaining)
                .map_err(|_| Error::poisoned("broadcaster"))?;
            generation = next;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Barrier;

    #[test]
    fn notify_without_subscribers_is_noop() {
        let broadcaster = Broadcaster::new();
        broadcaster.notify();
        broadcaster.notify();
    }

    #[test]
    fn park_times_out_without_posts() {
        let broadcaster = Broadcaster::new();
        let mut sub = broadcaster.subscribe().expect("subscribe");
        let start = Instant::now();
        assert_eq!(
            sub.park(Duration::from_millis(30)).expect("park"),
            Wake::TimedOut
        );
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn post_before_park_is_not_lost() {
        let broadcaster = Broadcaster::new();
        let mut sub = broadcaster.subscribe().expect("subscribe");
        broadcaster.notify();
        let start = Instant::now();
        assert_eq!(
            sub.park(Duration::from_secs(5)).expect("park"),
            Wake::Notified
        );
        assert!(start.elapsed() < Duration::from_secs(1));
        assert_eq!(
            sub.park(Duration::from_millis(10)).expect("park"),
            Wake::TimedOut
        );
    }

    #[test]
    fn notify_wakes_every_parked_subscriber() {
        let broadcaster = Broadcaster::new();
        let parties = 4;
        let barrier = Arc::new(Barrier::new(parties + 1));
        let handles: Vec<_> = (0..parties)
            .map(|_| {
                let mut sub = broadcaster.subscribe().expect("subscribe");
                let barrier = barrier.clone();
                thread::spawn(move || {
                    barrier.wait();
                    sub.park(Duration::from_secs(10))
                })
            })
            .collect();
        barrier.wait();
        let start = Instant::now();
        broadcaster.notify();
        for handle in handles {
            assert_eq!(handle.join().expect("join").expect("park"), Wake::Notified);
        }
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn clones_share_one_channel() {
        let broadcaster = Broadcaster::new();
        let clone = broadcaster.clone();
        assert!(broadcaster.same_channel(&clone));
        assert!(!broadcaster.same_channel(&Broadcaster::new()));
        assert!(Broadcaster::global().same_channel(&Broadcaster::global()));

        let mut sub = broadcaster.subscribe().expect("subscribe");
        clone.notify();
        assert_eq!(
            sub.park(Duration::from_secs(1)).expect("park"),
            Wake::Notified
        );
    }

    #[test]
    fn global_broadcaster_runs_its_heartbeat() {
        let mut sub = Broadcaster::global().subscribe().expect("subscribe");
        let start = Instant::now();
        for _ in 0..2 {
            assert_eq!(
                sub.park(GLOBAL_HEARTBEAT * 4).expect("park"),
                Wake::Notified
            );
        }
        assert!(start.elapsed() < GLOBAL_HEARTBEAT * 8);
    }

    #[test]
    fn heartbeat_posts_periodically() {
        let broadcaster = Broadcaster::new();
        let mut sub = broadcaster.subscribe().expect("subscribe");
        broadcaster
            .start_heartbeat(Duration::from_millis(10))
            .expect("heartbeat");
        for _ in 0..3 {
            assert_eq!(
                sub.park(Duration::from_secs(2)).expect("park"),
                Wake::Notified
            );
        }
    }
}
