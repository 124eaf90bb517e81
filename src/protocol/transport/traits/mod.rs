//! Abstractions the transport layer is driven through: the synchronous frame
//! port polled by `tick`, and the async bus and timer used by the runner.
pub mod can_bus;
pub mod frame_port;
pub mod korri_timer;
