//! Purpose: Per-engine shared wait state: waiting counter, cancel flag, plan, predicate.
//! Exports: `Predicate`, `infallible`, `WaitOutcome`, `WaitCore`, `WaitGuard`, `Check`.
//! Role: Bookkeeping shared by the polling and event-driven engines.
//! Invariants: Counter, cancel flag, plan, and predicate are only touched under one mutex.
//! Invariants: The predicate is evaluated under that mutex, never alongside a cancel.
//! Invariants: Leaving a wait (any path, including errors) decrements and clears the flag.
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use tracing::debug;

use crate::core::error::{Error, ErrorKind};
use crate::core::plan::TimePlan;

/// Caller-supplied condition a wait blocks on.
///
/// Returning `Err` aborts the wait and hands the error to the caller of `wait`.
pub trait Predicate: Send {
    fn check(&mut self) -> Result<bool, Error>;
}

impl<F> Predicate for F
where
    F: FnMut() -> Result<bool, Error> + Send,
{
    fn check(&mut self) -> Result<bool, Error> {
        self()
    }
}

/// Adapt a predicate that cannot fail.
pub fn infallible<F>(mut predicate: F) -> impl Predicate
where
    F: FnMut() -> bool + Send,
{
    move || -> Result<bool, Error> { Ok(predicate()) }
}

/// Why a wait returned.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum WaitOutcome {
    Satisfied,
    Cancelled,
}

pub(crate) enum Check {
    Done(WaitOutcome),
    Pending(TimePlan),
}

struct WaitState {
    waiting: usize,
    cancel_requested: bool,
    plan: TimePlan,
    predicate: Option<Box<dyn Predicate>>,
}

pub(crate) struct WaitCore {
    state: Mutex<WaitState>,
}

impl WaitCore {
    pub(crate) fn new(plan: TimePlan, predicate: Option<Box<dyn Predicate>>) -> Self {
        Self {
            state: Mutex::new(WaitState {
                waiting: 0,
                cancel_requested: false,
                plan,
                predicate,
            }),
        }
    }

    fn state_mut(&mut self) -> &mut WaitState {
        match self.state.get_mut() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Builder-time plan replacement; no other thread can see the core yet.
    pub(crate) fn put_plan(&mut self, plan: TimePlan) {
        self.state_mut().plan = plan;
    }

    pub(crate) fn put_predicate(&mut self, predicate: Box<dyn Predicate>) {
        self.state_mut().predicate = Some(predicate);
    }

    fn lock(&self) -> Result<MutexGuard<'_, WaitState>, Error> {
        self.state.lock().map_err(|_| Error::poisoned("wait state"))
    }

    /// Register the calling thread as a waiter until the guard drops.
    pub(crate) fn enter(&self) -> Result<WaitGuard<'_>, Error> {
        let mut state = self.lock()?;
        state.waiting += 1;
        debug!(waiting = state.waiting, "wait entered");
        Ok(WaitGuard { core: self })
    }

    /// One loop iteration: consume a pending cancel, otherwise evaluate the predicate.
    pub(crate) fn check(&self) -> Result<Check, Error> {
        let mut state = self.lock()?;
        if state.cancel_requested {
            state.cancel_requested = false;
            return Ok(Check::Done(WaitOutcome::Cancelled));
        }
        let plan = state.plan;
        let predicate = state.predicate.as_mut().ok_or_else(|| {
            Error::new(ErrorKind::Usage)
                .with_message("wait called without a predicate")
                .with_hint("Configure one with `with_predicate` or `set_predicate` first.")
        })?;
        if predicate.check()? {
            return Ok(Check::Done(WaitOutcome::Satisfied));
        }
        Ok(Check::Pending(plan))
    }

    pub(crate) fn cancel_one(&self) -> Result<(), Error> {
        let mut state = self.lock()?;
        state.cancel_requested = true;
        debug!(waiting = state.waiting, "cancel requested");
        Ok(())
    }

    /// Raise the cancel flag only while someone is waiting; returns the waiter count seen.
    pub(crate) fn cancel_if_waiting(&self) -> Result<usize, Error> {
        let mut state = self.lock()?;
        if state.waiting > 0 {
            state.cancel_requested = true;
        }
        Ok(state.waiting)
    }

    pub(crate) fn waiting(&self) -> Result<usize, Error> {
        Ok(self.lock()?.waiting)
    }

    pub(crate) fn plan(&self) -> Result<TimePlan, Error> {
        Ok(self.lock()?.plan)
    }

    pub(crate) fn set_plan(&self, plan: TimePlan) -> Result<(), Error> {
        self.update_plan(|_| Ok(plan))
    }

    fn update_plan(
        &self,
        update: impl FnOnce(TimePlan) -> Result<TimePlan, Error>,
    ) -> Result<(), Error> {
        let mut state = self.lock()?;
        let next = update(state.plan)?;
        if next.is_contradictory() {
            debug!(plan = ?next, "min_sleep exceeds max_sleep; max_sleep takes priority");
        }
        state.plan = next;
        Ok(())
    }

    pub(crate) fn set_max_relative_latency(&self, max_relative_latency: f64) -> Result<(), Error> {
        self.update_plan(|plan| plan.with_max_relative_latency(max_relative_latency))
    }

    pub(crate) fn set_min_sleep(&self, min_sleep: Option<Duration>) -> Result<(), Error> {
        self.update_plan(|plan| Ok(plan.with_min_sleep(min_sleep)))
    }

    pub(crate) fn set_max_sleep(&self, max_sleep: Option<Duration>) -> Result<(), Error> {
        self.update_plan(|plan| Ok(plan.with_max_sleep(max_sleep)))
    }

    pub(crate) fn set_sleep_first(&self, sleep_first: bool) -> Result<(), Error> {
        self.update_plan(|plan| Ok(plan.with_sleep_first(sleep_first)))
    }

    pub(crate) fn set_predicate(&self, predicate: Box<dyn Predicate>) -> Result<(), Error> {
        self.lock()?.predicate = Some(predicate);
        Ok(())
    }

    pub(crate) fn has_predicate(&self) -> Result<bool, Error> {
        Ok(self.lock()?.predicate.is_some())
    }
}

/// Held for the lifetime of one `wait` call.
pub(crate) struct WaitGuard<'a> {
    core: &'a WaitCore,
}

impl Drop for WaitGuard<'_> {
    fn drop(&mut self) {
        // Bookkeeping must finish even if a panicking predicate poisoned the lock.
        let mut state = match self.core.state.lock() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        };
        // A guard only exists after a matching increment in `enter`.
        state.waiting -= 1;
        state.cancel_requested = false;
        debug!(waiting = state.waiting, "wait left");
    }
}
