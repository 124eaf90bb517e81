//! `korri-stack`: a `no_std` application-layer protocol engine for
//! J1939 / NMEA 2000 / RV-C style CAN networks. It claims a node address,
//! encodes and decodes table-described Parameter Groups, reassembles
//! multi-frame messages, and schedules periodic transmissions, all inside a
//! bounded arena.
#![no_std]
extern crate alloc;
#[cfg(test)]
extern crate std;
//==================================================================================
/// Message descriptors, field kinds and sentinel values shared by the codec
/// and the catalogue.
pub mod core;
/// Engine context: configuration, platform hooks, persistence, the tick step
/// function and the async runner.
pub mod engine;
/// Error enums for every layer (heap, codec, transport, claim, platform).
pub mod error;
/// Arena allocator, bounded tables, bit codec and statistics.
pub mod infra;
/// Protocol logic: catalogue, timers, transport, network management and the
/// receive router.
pub mod protocol;
//==================================================================================
