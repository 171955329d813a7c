// Core modules implementing the wait engines, their shared state, and error modeling.
pub mod broadcast;
pub mod error;
pub mod event;
pub mod notify;
pub mod plan;
pub mod polling;
pub mod state;
pub mod timer;
