//! Purpose: Event-driven wait engine: park on a broadcaster, re-check on every wake.
//! Exports: `EventWait`, `DEFAULT_RECHECK`.
//! Role: Low-latency engine when an external notification source is available.
//! Invariants: Every park is bounded (plan `max_sleep`, else `DEFAULT_RECHECK`), so a broken
//! or silent notification source can only add latency, never block forever.
//! Invariants: The source is enabled by the first waiter and disabled by the last one, and
//! only when this engine was the one that enabled it.
//! Invariants: Checks are spaced at least `min_sleep` apart (capped by `max_sleep`), however
//! often the broadcaster posts.
//! Invariants: `cancel_one` also posts to the broadcaster so parked waiters wake at once.
use std::sync::{Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::core::broadcast::{Broadcaster, Wake};
use crate::core::error::Error;
use crate::core::notify::NotificationSource;
use crate::core::plan::{self, TimePlan};
use crate::core::state::{Check, Predicate, WaitCore, WaitOutcome};
use crate::core::timer::Stopwatch;

/// Park timeout used when the plan leaves `max_sleep` unbounded.
pub const DEFAULT_RECHECK: Duration = Duration::from_millis(500);

struct SourceSlot {
    source: Option<Box<dyn NotificationSource>>,
    active: usize,
    enabled_here: bool,
}

/// Blocks callers until a predicate holds, waking on broadcaster posts.
///
/// Wakes are shared: a post caused by an unrelated watch also wakes this engine's waiters,
/// which simply re-check their predicate and park again.
pub struct EventWait {
    core: WaitCore,
    broadcaster: Broadcaster,
    slot: Mutex<SourceSlot>,
}

impl Default for EventWait {
    fn default() -> Self {
        Self::new()
    }
}

impl EventWait {
    pub fn new() -> Self {
        Self {
            core: WaitCore::new(TimePlan::default(), None),
            broadcaster: Broadcaster::global(),
            slot: Mutex::new(SourceSlot {
                source: None,
                active: 0,
                enabled_here: false,
            }),
        }
    }

    pub fn with_predicate(mut self, predicate: impl Predicate + 'static) -> Self {
        self.core.put_predicate(Box::new(predicate));
        self
    }

    pub fn with_plan(mut self, plan: TimePlan) -> Self {
        self.core.put_plan(plan);
        self
    }

    pub fn with_broadcaster(mut self, broadcaster: Broadcaster) -> Self {
        self.broadcaster = broadcaster;
        self
    }

    pub fn with_source(mut self, source: impl NotificationSource + 'static) -> Self {
        self.slot_mut().source = Some(Box::new(source));
        self
    }

    fn slot_mut(&mut self) -> &mut SourceSlot {
        match self.slot.get_mut() {
            Ok(slot) => slot,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn lock_slot(&self) -> Result<MutexGuard<'_, SourceSlot>, Error> {
        self.slot.lock().map_err(|_| Error::poisoned("notification source"))
    }

    pub fn broadcaster(&self) -> &Broadcaster {
        &self.broadcaster
    }

    /// Block until the predicate holds or the wait is cancelled.
    pub fn wait(&self) -> Result<(), Error> {
        self.wait_outcome().map(|_| ())
    }

    /// Like `wait`, but report which of the two exits was taken.
    pub fn wait_outcome(&self) -> Result<WaitOutcome, Error> {
        let _guard = self.core.enter()?;
        // Subscribe before the first check so no post can slip between check and park.
        let mut subscription = self.broadcaster.subscribe()?;
        let _source = self.activate_source()?;
        let mut watch = Stopwatch::new();
        watch.start();

        let mut wakes: u64 = 0;
        if let Some(first) = plan::first_sleep(&self.core.plan()?) {
            if subscription.park(first)? == Wake::Notified {
                wakes += 1;
            }
        }
        loop {
            let checked_at = Instant::now();
            match self.core.check()? {
                Check::Done(outcome) => {
                    debug!(?outcome, wakes, elapsed = ?watch.elapsed(), "event wait done");
                    return Ok(outcome);
                }
                Check::Pending(plan) => {
                    let timeout = plan.max_sleep().unwrap_or(DEFAULT_RECHECK);
                    if timeout.is_zero() {
                        continue;
                    }
                    if subscription.park(timeout)? == Wake::Notified {
                        wakes += 1;
                    }
                    // Posts that arrive during the gap are kept by the subscription.
                    if let Some(gap) = plan::min_check_gap(&plan) {
                        let since = checked_at.elapsed();
                        if since < gap {
                            thread::sleep(gap - since);
                        }
                    }
                }
            }
        }
    }

    fn activate_source(&self) -> Result<SourceGuard<'_>, Error> {
        let mut guard = self.lock_slot()?;
        let slot = &mut *guard;
        slot.active += 1;
        if slot.active == 1 {
            if let Some(source) = slot.source.as_mut().filter(|source| !source.is_enabled()) {
                match source.enable(&self.broadcaster) {
                    Ok(()) => {
                        slot.enabled_here = true;
                        debug!("notification source enabled");
                    }
                    Err(err) => {
                        let err = Error::from(err);
                        warn!(error = %err, "notification source failed; relying on timeouts");
                    }
                }
            }
        }
        Ok(SourceGuard { wait: self })
    }

    /// Ask one waiter to return now.
    pub fn cancel_one(&self) -> Result<(), Error> {
        self.core.cancel_one()?;
        self.broadcaster.notify();
        Ok(())
    }

    /// Keep cancelling until no thread is waiting on this instance.
    pub fn cancel_all(&self) -> Result<(), Error> {
        while self.core.cancel_if_waiting()? > 0 {
            self.broadcaster.notify();
            thread::yield_now();
        }
        Ok(())
    }

    /// Number of threads currently inside `wait`.
    pub fn waiting(&self) -> Result<usize, Error> {
        self.core.waiting()
    }

    /// Whether a notification source is attached and currently delivering.
    pub fn source_enabled(&self) -> Result<bool, Error> {
        let slot = self.lock_slot()?;
        Ok(slot.source.as_ref().is_some_and(|source| source.is_enabled()))
    }

    pub fn plan(&self) -> Result<TimePlan, Error> {
        self.core.plan()
    }

    pub fn set_plan(&self, plan: TimePlan) -> Result<(), Error> {
        self.core.set_plan(plan)
    }

    pub fn set_min_sleep(&self, min_sleep: Option<Duration>) -> Result<(), Error> {
        self.core.set_min_sleep(min_sleep)
    }

    pub fn set_max_sleep(&self, max_sleep: Option<Duration>) -> Result<(), Error> {
        self.core.set_max_sleep(max_sleep)
    }

    pub fn set_max_relative_latency(&self, max_relative_latency: f64) -> Result<(), Error> {
        self.core.set_max_relative_latency(max_relative_latency)
    }

    pub fn set_sleep_first(&self, sleep_first: bool) -> Result<(), Error> {
        self.core.set_sleep_first(sleep_first)
    }

    pub fn set_predicate(&self, predicate: impl Predicate + 'static) -> Result<(), Error> {
        self.core.set_predicate(Box::new(predicate))
    }

    pub fn has_predicate(&self) -> Result<bool, Error> {
        self.core.has_predicate()
    }
}

struct SourceGuard<'a> {
    wait: &'a EventWait,
}

impl Drop for SourceGuard<'_> {
    fn drop(&mut self) {
        let mut guard = match self.wait.slot.lock() {
            Ok(slot) => slot,
            Err(poisoned) => poisoned.into_inner(),
        };
        let slot = &mut *guard;
        slot.active -= 1;
        if slot.active == 0 && slot.enabled_here {
            slot.enabled_here = false;
            if let Some(source) = slot.source.as_mut() {
                source.disable();
                debug!("notification source disabled");
            }
        }
    }
}
