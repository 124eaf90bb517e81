//! Fast-packet transport: payloads of up to 223 bytes carried by a burst of
//! frames sharing a 3-bit sequence counter.
//!
//! ```text
//! frame 0 : [seq << 5 | 0, total_len, 6 payload bytes]
//! frame k : [seq << 5 | k, 7 payload bytes]
//! ```
pub mod assembler;
pub mod builder;

/// Maximum payload a fast-packet message can carry once reassembled.
pub const MAX_FAST_PACKET_PAYLOAD: usize = 223;
/// Default number of streams reassembled at once.
pub const FP_SESSIONS: usize = 4;
/// Number of fast-packet sequence classes a catalogue may declare.
pub const FAST_PACKET_CLASSES: usize = 64;

/// Frames needed for a payload of `len` bytes.
pub const fn frame_count(len: usize) -> usize {
    if len <= 6 {
        1
    } else {
        1 + (len - 6).div_ceil(7)
    }
}

/// Rolling 3-bit transmit counters, one per sequence class.
#[derive(Debug, Clone)]
pub struct SequenceCounters {
    counters: [u8; FAST_PACKET_CLASSES],
}

impl Default for SequenceCounters {
    fn default() -> Self {
        Self::new()
    }
}

impl SequenceCounters {
    pub const fn new() -> Self {
        Self {
            counters: [0; FAST_PACKET_CLASSES],
        }
    }

    /// Sequence number to use for the next message of `class`.
    pub fn next(&mut self, class: u8) -> u8 {
        let slot = &mut self.counters[class as usize % FAST_PACKET_CLASSES];
        let current = *slot;
        *slot = (current + 1) & 0x07;
        current
    }
}

#[cfg(test)]
mod tests;
