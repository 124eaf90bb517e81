//! Segmented transport for payloads of 9 to 1785 bytes: connection
//! management on TP.CM (60416), seven data bytes per TP.DT (60160) frame.
//!
//! ```text
//! RTS   [0x10, size LE16, packets, max_per_cts, pgn LE24]
//! CTS   [0x11, count, next_seq, 0xFF, 0xFF, pgn LE24]
//! EOM   [0x13, size LE16, packets, 0xFF, pgn LE24]
//! BAM   [0x20, size LE16, packets, 0xFF, pgn LE24]
//! Abort [0xFF, reason, 0xFF, 0xFF, 0xFF, pgn LE24]
//! DT    [seq, 7 bytes]
//! ```
pub mod rx;
pub mod tx;

use crate::error::CanIdBuildError;
use crate::infra::stats::{CommStats, Counter};
use crate::protocol::catalog::pgn;
use crate::protocol::transport::can_frame::CanFrame;
use crate::protocol::transport::can_id::CanId;
use crate::protocol::transport::traits::frame_port::FrameSink;

/// Largest payload a segmented transfer carries (255 packets of 7 bytes).
pub const MAX_SEGMENTED_PAYLOAD: usize = 1785;
/// Payload bytes per TP.DT frame.
pub const BYTES_PER_PACKET: usize = 7;
/// Priority of every TP.CM and TP.DT frame.
pub const TP_PRIORITY: u8 = 7;
/// "No limit" value of the RTS `max_per_cts` byte.
pub const NO_CTS_LIMIT: u8 = 0xFF;

const RTS: u8 = 0x10;
const CTS: u8 = 0x11;
const EOM: u8 = 0x13;
const BAM: u8 = 0x20;
const ABORT: u8 = 0xFF;

/// Packets needed for `len` bytes.
pub const fn packet_count(len: usize) -> usize {
    len.div_ceil(BYTES_PER_PACKET)
}

/// Connection abort reasons.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AbortReason {
    AlreadyInSession,
    Resources,
    Timeout,
    CtsWhileReceiving,
    RetransmitLimit,
    UnexpectedTransfer,
    BadSequence,
    DuplicateSequence,
    TooLarge,
    Other(u8),
}

impl AbortReason {
    pub const fn code(self) -> u8 {
        match self {
            AbortReason::AlreadyInSession => 1,
            AbortReason::Resources => 2,
            AbortReason::Timeout => 3,
            AbortReason::CtsWhileReceiving => 4,
            AbortReason::RetransmitLimit => 5,
            AbortReason::UnexpectedTransfer => 6,
            AbortReason::BadSequence => 7,
            AbortReason::DuplicateSequence => 8,
            AbortReason::TooLarge => 9,
            AbortReason::Other(code) => code,
        }
    }

    pub const fn from_code(code: u8) -> Self {
        match code {
            1 => AbortReason::AlreadyInSession,
            2 => AbortReason::Resources,
            3 => AbortReason::Timeout,
            4 => AbortReason::CtsWhileReceiving,
            5 => AbortReason::RetransmitLimit,
            6 => AbortReason::UnexpectedTransfer,
            7 => AbortReason::BadSequence,
            8 => AbortReason::DuplicateSequence,
            9 => AbortReason::TooLarge,
            other => AbortReason::Other(other),
        }
    }
}

/// Decoded TP.CM payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ControlMessage {
    Rts {
        size: u16,
        packets: u8,
        max_per_cts: u8,
        pgn: u32,
    },
    Cts {
        count: u8,
        next_sequence: u8,
        pgn: u32,
    },
    Eom {
        size: u16,
        packets: u8,
        pgn: u32,
    },
    Bam {
        size: u16,
        packets: u8,
        pgn: u32,
    },
    Abort {
        reason: AbortReason,
        pgn: u32,
    },
}

impl ControlMessage {
    /// Decode a TP.CM payload. Unknown control bytes and short frames give `None`.
    pub fn parse(data: &[u8]) -> Option<Self> {
        if data.len() < 8 {
            return None;
        }
        let size = u16::from_le_bytes([data[1], data[2]]);
        let pgn = u32::from_le_bytes([data[5], data[6], data[7], 0]);
        let message = match data[0] {
            RTS => ControlMessage::Rts {
                size,
                packets: data[3],
                max_per_cts: data[4],
                pgn,
            },
            CTS => ControlMessage::Cts {
                count: data[1],
                next_sequence: data[2],
                pgn,
            },
            EOM => ControlMessage::Eom {
                size,
                packets: data[3],
                pgn,
            },
            BAM => ControlMessage::Bam {
                size,
                packets: data[3],
                pgn,
            },
            ABORT => ControlMessage::Abort {
                reason: AbortReason::from_code(data[1]),
                pgn,
            },
            _ => return None,
        };
        Some(message)
    }

    pub fn encode(&self) -> [u8; 8] {
        let mut data = [0xFF; 8];
        let pgn = match *self {
            ControlMessage::Rts {
                size,
                packets,
                max_per_cts,
                pgn,
            } => {
                data[0] = RTS;
                data[1..3].copy_from_slice(&size.to_le_bytes());
                data[3] = packets;
                data[4] = max_per_cts;
                pgn
            }
            ControlMessage::Cts {
                count,
                next_sequence,
                pgn,
            } => {
                data[0] = CTS;
                data[1] = count;
                data[2] = next_sequence;
                pgn
            }
            ControlMessage::Eom { size, packets, pgn } => {
                data[0] = EOM;
                data[1..3].copy_from_slice(&size.to_le_bytes());
                data[3] = packets;
                pgn
            }
            ControlMessage::Bam { size, packets, pgn } => {
                data[0] = BAM;
                data[1..3].copy_from_slice(&size.to_le_bytes());
                data[3] = packets;
                pgn
            }
            ControlMessage::Abort { reason, pgn } => {
                data[0] = ABORT;
                data[1] = reason.code();
                pgn
            }
        };
        data[5..8].copy_from_slice(&pgn.to_le_bytes()[..3]);
        data
    }

    /// PGN of the transfer the message belongs to.
    pub fn pgn(&self) -> u32 {
        match *self {
            ControlMessage::Rts { pgn, .. }
            | ControlMessage::Cts { pgn, .. }
            | ControlMessage::Eom { pgn, .. }
            | ControlMessage::Bam { pgn, .. }
            | ControlMessage::Abort { pgn, .. } => pgn,
        }
    }
}

/// Segmented-transfer timing, in ticks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SegmentedTiming {
    /// Gap allowed between two data frames.
    pub t1: u32,
    /// Wait for data after a CTS.
    pub t2: u32,
    /// Wait for a CTS or EOM.
    pub t3: u32,
    /// Hold granted by a CTS with a zero count.
    pub t4: u32,
    /// Pace of BAM data frames.
    pub bam_interval: u32,
    /// Most packets granted by one CTS.
    pub cts_window: u8,
}

/// What a transport call needs from the stack for one step.
pub struct TpLink<'a, S: FrameSink> {
    /// Our claimed address.
    pub local: u8,
    /// Current tick.
    pub now: u32,
    pub timing: &'a SegmentedTiming,
    pub out: &'a mut S,
    pub stats: &'a mut CommStats,
}

impl<S: FrameSink> TpLink<'_, S> {
    /// Queue a TP.CM frame. Returns `false` when the outbox is full.
    pub fn send_control(&mut self, destination: u8, message: ControlMessage) -> bool {
        match control_frame(self.local, destination, &message) {
            Ok(frame) => self.push(frame),
            Err(_) => false,
        }
    }

    fn push(&mut self, frame: CanFrame) -> bool {
        if self.out.push(frame).is_err() {
            self.stats.bump(Counter::TxQueueFull);
            return false;
        }
        true
    }

    fn abort(&mut self, destination: u8, reason: AbortReason, pgn: u32) {
        #[cfg(feature = "defmt")]
        defmt::warn!("TP abort to {} for PGN {}: {}", destination, pgn, reason);
        self.send_control(destination, ControlMessage::Abort { reason, pgn });
    }

    fn deadline(&self, ticks: u32) -> u32 {
        self.now.wrapping_add(ticks)
    }
}

/// TP.CM frame from `source` to `destination`.
pub fn control_frame(
    source: u8,
    destination: u8,
    message: &ControlMessage,
) -> Result<CanFrame, CanIdBuildError> {
    let id = CanId::for_message(pgn::TP_CM, TP_PRIORITY, source, destination)?;
    Ok(CanFrame::with_data(id, &message.encode()))
}

/// TP.DT frame carrying packet `sequence` (1-based) of `payload`.
pub fn data_frame(
    source: u8,
    destination: u8,
    sequence: u8,
    payload: &[u8],
) -> Result<CanFrame, CanIdBuildError> {
    let id = CanId::for_message(pgn::TP_DT, TP_PRIORITY, source, destination)?;
    let mut data = [0xFF; 8];
    data[0] = sequence;
    let start = (sequence as usize).saturating_sub(1) * BYTES_PER_PACKET;
    if start < payload.len() {
        let end = (start + BYTES_PER_PACKET).min(payload.len());
        data[1..1 + end - start].copy_from_slice(&payload[start..end]);
    }
    Ok(CanFrame::with_data(id, &data))
}
