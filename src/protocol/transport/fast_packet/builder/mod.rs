//! Frame generator for fast-packet messages. The caller supplies the sequence
//! number (see [`SequenceCounters`](super::SequenceCounters)); no counter is
//! kept in global state.
use crate::error::SendError;
use crate::protocol::transport::can_frame::CanFrame;
use crate::protocol::transport::can_id::CanId;
use crate::protocol::transport::fast_packet::{frame_count, MAX_FAST_PACKET_PAYLOAD};

#[derive(Debug)]
/// Parameters shared by every frame of one fast-packet message.
pub struct FastPacketBuilder<'a> {
    id: CanId,
    payload: &'a [u8],
    sequence_id: u8,
}

/// Lazy iterator yielding the frames of one message. Every frame is eight
/// bytes long, unused bytes are `0xFF`.
pub struct FrameIterator<'a> {
    builder: FastPacketBuilder<'a>,
    frame_index: u8,
    bytes_sent: usize,
}

impl Iterator for FrameIterator<'_> {
    type Item = CanFrame;

    fn next(&mut self) -> Option<Self::Item> {
        let payload = self.builder.payload;
        if self.bytes_sent >= payload.len() && self.frame_index > 0 {
            return None;
        }

        let mut data = [0xFF; 8];
        data[0] = (self.builder.sequence_id << 5) | (self.frame_index & 0x1F);
        let chunk = if self.frame_index == 0 {
            data[1] = payload.len() as u8;
            let chunk = payload.len().min(6);
            data[2..2 + chunk].copy_from_slice(&payload[..chunk]);
            chunk
        } else {
            let chunk = (payload.len() - self.bytes_sent).min(7);
            data[1..1 + chunk].copy_from_slice(&payload[self.bytes_sent..self.bytes_sent + chunk]);
            chunk
        };

        self.bytes_sent += chunk;
        self.frame_index = self.frame_index.wrapping_add(1);
        Some(CanFrame {
            id: self.builder.id,
            data,
            len: 8,
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = frame_count(self.builder.payload.len()).saturating_sub(self.frame_index as usize);
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for FrameIterator<'_> {}

impl<'a> FastPacketBuilder<'a> {
    /// Prepare the frames for `payload` (1..=223 bytes) under `id`.
    pub fn new(id: CanId, payload: &'a [u8], sequence_id: u8) -> Result<Self, SendError> {
        if payload.is_empty() || payload.len() > MAX_FAST_PACKET_PAYLOAD {
            return Err(SendError::TooLarge {
                len: payload.len(),
            });
        }
        Ok(Self {
            id,
            payload,
            sequence_id: sequence_id & 0x07,
        })
    }

    /// Start the iteration.
    pub fn build(self) -> FrameIterator<'a> {
        FrameIterator {
            builder: self,
            frame_index: 0,
            bytes_sent: 0,
        }
    }
}

#[cfg(test)]
#[path = "tests.rs"]
mod tests;
