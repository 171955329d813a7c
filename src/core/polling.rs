//! Purpose: Adaptive-poll wait engine: re-check a predicate with plan-computed sleeps.
//! Exports: `PollingWait`.
//! Role: Baseline engine; cancellation is discovered at the next scheduled check.
//! Invariants: Sleeps are computed from a plan snapshot before sleeping; later plan
//! changes never shorten or lengthen a sleep already in progress.
//! Invariants: `wait` never reports cancel vs. satisfied; `wait_outcome` does.
use std::thread;
use std::time::Duration;

use tracing::debug;

use crate::core::error::Error;
use crate::core::plan::{self, TimePlan};
use crate::core::state::{Check, Predicate, WaitCore, WaitOutcome};
use crate::core::timer::Stopwatch;

/// Blocks callers until a predicate holds, sleeping adaptively between checks.
///
/// One instance may be waited on by several threads at once. `cancel_one` releases one of them
/// (which one is unspecified); `cancel_all` releases every current waiter.
pub struct PollingWait {
    core: WaitCore,
}

impl Default for PollingWait {
    fn default() -> Self {
        Self::new()
    }
}

impl PollingWait {
    pub fn new() -> Self {
        Self {
            core: WaitCore::new(TimePlan::default(), None),
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

    /// Block until the predicate holds or the wait is cancelled.
    pub fn wait(&self) -> Result<(), Error> {
        self.wait_outcome().map(|_| ())
    }

    /// Like `wait`, but report which of the two exits was taken.
    pub fn wait_outcome(&self) -> Result<WaitOutcome, Error> {
        let _guard = self.core.enter()?;
        let mut watch = Stopwatch::new();
        watch.start();

        if let Some(first) = plan::first_sleep(&self.core.plan()?) {
            thread::sleep(first);
        }

        let mut checks: u64 = 0;
        loop {
            checks += 1;
            match self.core.check()? {
                Check::Done(outcome) => {
                    debug!(?outcome, checks, elapsed = ?watch.elapsed(), "polling wait done");
                    return Ok(outcome);
                }
                Check::Pending(plan) => {
                    let sleep = plan::plan_sleep(&plan, watch.elapsed());
                    if !sleep.is_zero() {
                        thread::sleep(sleep);
                    }
                }
            }
        }
    }

    /// Ask one waiter to return at its next scheduled check.
    pub fn cancel_one(&self) -> Result<(), Error> {
        self.core.cancel_one()
    }

    /// Keep cancelling until no thread is waiting on this instance.
    pub fn cancel_all(&self) -> Result<(), Error> {
        while self.core.cancel_if_waiting()? > 0 {
            thread::yield_now();
        }
        Ok(())
    }

    /// Number of threads currently inside `wait`.
    pub fn waiting(&self) -> Result<usize, Error> {
        self.core.waiting()
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
