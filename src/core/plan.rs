//! Purpose: Time plan for predicate re-checks and the adaptive sleep computation.
//! Exports: `TimePlan`, `plan_sleep`, `first_sleep`, `min_check_gap`, default constants.
//! Role: Pure planning layer; engines snapshot a plan and ask it how long to sleep.
//! Invariants: No side effects; output depends only on the plan and the elapsed time.
//! Invariants: `max_sleep` caps every computed sleep, even when it contradicts `min_sleep`.
use std::time::Duration;

use crate::core::error::{Error, ErrorKind};

pub const DEFAULT_MIN_SLEEP: Duration = Duration::from_millis(1);
pub const DEFAULT_MAX_SLEEP: Duration = Duration::from_millis(500);
pub const DEFAULT_MAX_RELATIVE_LATENCY: f64 = 0.05;

/// Millisecond value meaning "no bound" in `TimePlan::from_millis`.
pub const UNBOUNDED_MS: i64 = -1;

/// Tunables governing how often a waiting thread re-checks its predicate.
///
/// `None` bounds are unbounded. A plan is validated when it is built, so every value an engine
/// holds is usable as-is.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TimePlan {
    min_sleep: Option<Duration>,
    max_sleep: Option<Duration>,
    max_relative_latency: f64,
    sleep_first: bool,
}

impl Default for TimePlan {
    fn default() -> Self {
        Self {
            min_sleep: Some(DEFAULT_MIN_SLEEP),
            max_sleep: Some(DEFAULT_MAX_SLEEP),
            max_relative_latency: DEFAULT_MAX_RELATIVE_LATENCY,
            sleep_first: false,
        }
    }
}

impl TimePlan {
    /// Plan with no bounds, no relative latency and no initial sleep: a busy poll.
    pub fn unbounded() -> Self {
        Self {
            min_sleep: None,
            max_sleep: None,
            max_relative_latency: 0.0,
            sleep_first: false,
        }
    }

    /// Build a plan from integer milliseconds, where `-1` means unbounded.
    pub fn from_millis(
        min_sleep_ms: i64,
        max_sleep_ms: i64,
        max_relative_latency: f64,
        sleep_first: bool,
    ) -> Result<Self, Error> {
        Self::unbounded()
            .with_min_sleep(millis_bound("min_sleep", min_sleep_ms)?)
            .with_max_sleep(millis_bound("max_sleep", max_sleep_ms)?)
            .with_sleep_first(sleep_first)
            .with_max_relative_latency(max_relative_latency)
    }

    pub fn min_sleep(&self) -> Option<Duration> {
        self.min_sleep
    }

    pub fn max_sleep(&self) -> Option<Duration> {
        self.max_sleep
    }

    pub fn max_relative_latency(&self) -> f64 {
        self.max_relative_latency
    }

    pub fn sleep_first(&self) -> bool {
        self.sleep_first
    }

    pub fn with_min_sleep(mut self, min_sleep: Option<Duration>) -> Self {
        self.min_sleep = min_sleep;
        self
    }

    pub fn with_max_sleep(mut self, max_sleep: Option<Duration>) -> Self {
        self.max_sleep = max_sleep;
        self
    }

    pub fn with_max_relative_latency(mut self, max_relative_latency: f64) -> Result<Self, Error> {
        validate_latency(max_relative_latency)?;
        self.max_relative_latency = max_relative_latency;
        Ok(self)
    }

    pub fn with_sleep_first(mut self, sleep_first: bool) -> Self {
        self.sleep_first = sleep_first;
        self
    }

    /// True when both bounds are set and the minimum exceeds the maximum.
    pub fn is_contradictory(&self) -> bool {
        matches!((self.min_sleep, self.max_sleep), (Some(min), Some(max)) if min > max)
    }
}

pub(crate) fn validate_latency(max_relative_latency: f64) -> Result<(), Error> {
    if !max_relative_latency.is_finite() || max_relative_latency < 0.0 {
        return Err(Error::new(ErrorKind::Config)
            .with_message(format!(
                "max_relative_latency must be a finite value >= 0 (got {max_relative_latency})"
            ))
            .with_hint("Use 0 to disable latency scaling."));
    }
    Ok(())
}

fn millis_bound(label: &str, value: i64) -> Result<Option<Duration>, Error> {
    match value {
        UNBOUNDED_MS => Ok(None),
        ms if ms < 0 => Err(Error::new(ErrorKind::Config)
            .with_message(format!("{label} must be >= 0 milliseconds (got {ms})"))
            .with_hint("Use -1 for an unbounded value.")),
        ms => Ok(Some(Duration::from_millis(ms as u64))),
    }
}

/// Sleep to take before the next predicate check, given how long the caller has waited.
pub fn plan_sleep(plan: &TimePlan, elapsed: Duration) -> Duration {
    let mut sleep = Duration::ZERO;
    if plan.max_relative_latency > 0.0 {
        let millis = (1000.0 * elapsed.as_secs_f64() * plan.max_relative_latency).floor();
        // Float to int casts saturate.
        sleep = Duration::from_millis(millis as u64);
    }
    if let Some(min_sleep) = plan.min_sleep {
        sleep = sleep.max(min_sleep);
    }
    if let Some(max_sleep) = plan.max_sleep {
        sleep = sleep.min(max_sleep);
    }
    sleep
}

/// Sleep to take before the very first check, if the plan asks for one.
pub fn first_sleep(plan: &TimePlan) -> Option<Duration> {
    if !plan.sleep_first {
        return None;
    }
    min_check_gap(plan)
}

/// Shortest spacing allowed between two predicate checks: `min_sleep`, capped by `max_sleep`.
pub fn min_check_gap(plan: &TimePlan) -> Option<Duration> {
    let min_sleep = plan.min_sleep?;
    Some(match plan.max_sleep {
        Some(max_sleep) => min_sleep.min(max_sleep),
        None => min_sleep,
    })
}
