//! Transport layer: CAN frame and 29-bit identifier types, fast-packet and
//! segmented (TP.CM / TP.DT) framing, the outbound frame queue, and the
//! traits the stack is driven through.
//!
//! ## Timing
//!
//! Every timeout below is expressed in milliseconds and converted to ticks by
//! [`StackConfig`](crate::engine::config::StackConfig).

pub mod can_frame;
pub mod can_id;
pub mod fast_packet;
pub mod outbox;
pub mod segmented;
pub mod traits;

/// Largest payload a classic single frame carries.
pub const SINGLE_FRAME_PAYLOAD: usize = 8;

/// Inactivity timeout for a fast-packet stream (ms).
pub const FAST_PACKET_TIMEOUT_MS: u64 = 750;

/// Maximum gap between two TP.DT frames of one transfer (ms), `T1`.
pub const TP_T1_MS: u64 = 750;
/// Wait for data after sending a CTS (ms), `T2`.
pub const TP_T2_MS: u64 = 1250;
/// Wait for a CTS or EOM after sending RTS or data (ms), `T3`.
pub const TP_T3_MS: u64 = 1250;
/// Hold time granted by a CTS with a zero count (ms), `T4`.
pub const TP_T4_MS: u64 = 1050;

/// Pace between two BAM data frames (ms).
///
/// The protocol allows 50 to 200 ms; 50 keeps a 1785-byte broadcast under
/// fourteen seconds.
pub const BAM_INTERVAL_MS: u64 = 50;
