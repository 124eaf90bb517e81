//! Fast-packet reassembly. Sessions are keyed by `(source, class)`, hold a
//! heap buffer sized to the declared length and are dropped on the first
//! gap, mismatch or timeout. Dropped streams are never retried.
use embassy_sync::blocking_mutex::raw::RawMutex;

use super::MAX_FAST_PACKET_PAYLOAD;
use crate::error::HeapError;
use crate::infra::heap::{HeapBox, SharedHeap};
use crate::infra::slots::SlotTable;
use crate::protocol::timers::deadline_reached;
use crate::protocol::transport::can_frame::CanFrame;

/// Why a fast-packet stream was abandoned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DropReason {
    /// Declared length is zero or above 223 bytes.
    BadLength,
    /// Frame index or sequence counter did not follow.
    Gap,
    /// The payload buffer could not be allocated.
    OutOfMemory,
    /// Every session slot is busy.
    SessionsFull,
}

pub enum ProcessResult<M: RawMutex> {
    /// Frame not part of any stream we track.
    Ignored,
    /// Frame stored; more fragments are expected.
    FragmentConsumed,
    /// Last fragment received.
    MessageComplete(CompletedMessage<M>),
    /// The stream was abandoned.
    Dropped(DropReason),
    /// The arena refused access to a session buffer.
    Fault(HeapError),
}

/// Reassembled payload, still in the arena.
pub struct CompletedMessage<M: RawMutex> {
    pub payload: HeapBox<M>,
    pub len: usize,
    pub pgn: u32,
    pub source: u8,
    pub destination: u8,
    pub priority: u8,
}

/// Stream being reassembled.
pub struct FastPacketSession<M: RawMutex> {
    source: u8,
    class: u8,
    pgn: u32,
    destination: u8,
    priority: u8,
    sequence: u8,
    next_frame: u8,
    expected: usize,
    received: usize,
    buffer: HeapBox<M>,
    /// Tick of the last accepted frame.
    last_activity: u32,
}

/// Bounded pool of fast-packet sessions.
pub struct FastPacketAssembler<M: RawMutex, const N: usize> {
    sessions: SlotTable<FastPacketSession<M>, N>,
}

impl<M: RawMutex, const N: usize> Default for FastPacketAssembler<M, N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M: RawMutex, const N: usize> FastPacketAssembler<M, N> {
    pub fn new() -> Self {
        Self {
            sessions: SlotTable::new(),
        }
    }

    /// Number of streams in progress.
    pub fn active(&self) -> usize {
        self.sessions.len()
    }

    /// Feed one frame of a fast-packet PGN whose catalogue entry declares
    /// sequence class `class`.
    pub fn process_frame(
        &mut self,
        heap: &SharedHeap<M>,
        frame: &CanFrame,
        class: u8,
        now: u32,
    ) -> ProcessResult<M> {
        let data = frame.payload();
        if data.is_empty() {
            return ProcessResult::Ignored;
        }
        let source = frame.id.source_address();
        let frame_index = data[0] & 0x1F;
        let sequence = data[0] >> 5;
        let slot = self
            .sessions
            .position(|session| session.source == source && session.class == class);

        if frame_index == 0 {
            // A new first frame restarts whatever was in progress for the key.
            if let Some(index) = slot {
                self.sessions.remove(index);
            }
            self.start(heap, frame, class, sequence, now)
        } else {
            let Some(index) = slot else {
                return ProcessResult::Ignored;
            };
            self.resume(index, data, frame_index, sequence, now)
        }
    }

    /// Drop sessions idle for more than `timeout` ticks. Returns the count.
    pub fn expire(&mut self, now: u32, timeout: u32) -> usize {
        let before = self.sessions.len();
        self.sessions.retain(|session| {
            !deadline_reached(now, session.last_activity.wrapping_add(timeout))
        });
        let dropped = before - self.sessions.len();
        #[cfg(feature = "defmt")]
        if dropped > 0 {
            defmt::debug!("fast packet: {} sessions timed out", dropped);
        }
        dropped
    }

    /// Drop every session.
    pub fn clear(&mut self) {
        self.sessions.clear();
    }

    fn start(
        &mut self,
        heap: &SharedHeap<M>,
        frame: &CanFrame,
        class: u8,
        sequence: u8,
        now: u32,
    ) -> ProcessResult<M> {
        let data = frame.payload();
        if data.len() < 2 {
            return ProcessResult::Dropped(DropReason::BadLength);
        }
        let expected = data[1] as usize;
        if expected == 0 || expected > MAX_FAST_PACKET_PAYLOAD {
            return ProcessResult::Dropped(DropReason::BadLength);
        }
        if self.sessions.is_full() {
            return ProcessResult::Dropped(DropReason::SessionsFull);
        }
        let Some(mut buffer) = HeapBox::new(heap, expected) else {
            return ProcessResult::Dropped(DropReason::OutOfMemory);
        };

        let chunk = expected.min(6).min(data.len() - 2);
        if let Err(error) =
            buffer.with_mut(|bytes| bytes[..chunk].copy_from_slice(&data[2..2 + chunk]))
        {
            return ProcessResult::Fault(error);
        }

        let session = FastPacketSession {
            source: frame.id.source_address(),
            class,
            pgn: frame.id.pgn(),
            destination: frame.id.destination_or_global(),
            priority: frame.id.priority(),
            sequence,
            next_frame: 1,
            expected,
            received: chunk,
            buffer,
            last_activity: now,
        };
        if session.received >= session.expected {
            return ProcessResult::MessageComplete(session.complete());
        }
        match self.sessions.insert(session) {
            Ok(_) => ProcessResult::FragmentConsumed,
            Err(_) => ProcessResult::Dropped(DropReason::SessionsFull),
        }
    }

    fn resume(
        &mut self,
        index: usize,
        data: &[u8],
        frame_index: u8,
        sequence: u8,
        now: u32,
    ) -> ProcessResult<M> {
        let Some(session) = self.sessions.get_mut(index) else {
            return ProcessResult::Ignored;
        };
        if sequence != session.sequence || frame_index != session.next_frame {
            self.sessions.remove(index);
            return ProcessResult::Dropped(DropReason::Gap);
        }

        let offset = session.received;
        let chunk = (session.expected - offset).min(7).min(data.len() - 1);
        if let Err(error) = session
            .buffer
            .with_mut(|bytes| bytes[offset..offset + chunk].copy_from_slice(&data[1..1 + chunk]))
        {
            self.sessions.remove(index);
            return ProcessResult::Fault(error);
        }
        session.received += chunk;
        session.next_frame += 1;
        session.last_activity = now;

        if session.received < session.expected {
            return ProcessResult::FragmentConsumed;
        }
        match self.sessions.remove(index) {
            Some(session) => ProcessResult::MessageComplete(session.complete()),
            None => ProcessResult::Ignored,
        }
    }
}

impl<M: RawMutex> FastPacketSession<M> {
    fn complete(self) -> CompletedMessage<M> {
        CompletedMessage {
            payload: self.buffer,
            len: self.expected,
            pgn: self.pgn,
            source: self.source,
            destination: self.destination,
            priority: self.priority,
        }
    }
}

// Manual impls: `M` itself carries no `Debug`.
impl<M: RawMutex> core::fmt::Debug for CompletedMessage<M> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("CompletedMessage")
            .field("pgn", &self.pgn)
            .field("source", &self.source)
            .field("len", &self.len)
            .finish()
    }
}

impl<M: RawMutex> core::fmt::Debug for ProcessResult<M> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Ignored => f.write_str("Ignored"),
            Self::FragmentConsumed => f.write_str("FragmentConsumed"),
            Self::MessageComplete(message) => write!(f, "MessageComplete({:?})", message),
            Self::Dropped(reason) => write!(f, "Dropped({:?})", reason),
            Self::Fault(error) => write!(f, "Fault({:?})", error),
        }
    }
}
