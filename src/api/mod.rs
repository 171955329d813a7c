//! Purpose: Define the stable public Rust API boundary for condwait.
//! Exports: Engines, plan/predicate types, broadcaster, notification sources, path helpers.
//! Role: Public, additive-only surface; hides internal state modules.
//! Invariants: This module is the only public path to engine primitives.
//! Invariants: Internal bookkeeping (`WaitCore`, guards) is never exposed.

mod path;

pub use crate::core::broadcast::{Broadcaster, GLOBAL_HEARTBEAT, Subscription, Wake};
#[doc(hidden)]
pub use crate::core::error::to_exit_code;
pub use crate::core::error::{Error, ErrorKind};
pub use crate::core::event::{DEFAULT_RECHECK, EventWait};
pub use crate::core::notify::{DirWatch, NotificationSource, NotifyError};
pub use crate::core::plan::{
    DEFAULT_MAX_RELATIVE_LATENCY, DEFAULT_MAX_SLEEP, DEFAULT_MIN_SLEEP, TimePlan, UNBOUNDED_MS,
    first_sleep, min_check_gap, plan_sleep,
};
pub use crate::core::polling::PollingWait;
pub use crate::core::state::{Predicate, WaitOutcome, infallible};
pub use crate::core::timer::Stopwatch;
pub use path::{PathCondition, PathWait, path_predicate, wait_for_path, watch_dir_for};
