//! Purpose: Condition-wait library backing the `condwait` CLI and embedding callers.
//! Exports: `api` (engines, time plans, broadcaster, notification sources, path waits).
//! Role: Blocks threads until a predicate holds, bounding both CPU cost and wake latency.
//! Invariants: `api` is the only public path; `core` stays private.
//! Invariants: Engines never busy-loop unless the caller's plan asks for it (`max_sleep = 0`).
pub mod api;
mod core;
