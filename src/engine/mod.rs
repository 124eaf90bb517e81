//! Engine context: everything the protocol layers need to run together.
//!
//! [`stack::Stack`] owns the claim machine, transport sessions, timers and
//! router, and advances them from one synchronous `tick`. [`runner`] wraps
//! that tick in a single async task for hosts using `embassy`/`tokio`.
pub mod config;
pub mod persist;
pub mod platform;
pub mod runner;
pub mod stack;
