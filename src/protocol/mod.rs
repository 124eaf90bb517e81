//! Protocol layers of the stack: the message catalogue, cooperative timers,
//! CAN/fast-packet/segmented transport, network management and the receive
//! router.
pub mod catalog;
pub mod managment;
pub mod router;
pub mod timers;
pub mod transport;
