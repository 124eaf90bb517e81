//! Sending side of segmented transfers: BAM broadcasts paced by the tick and
//! RTS/CTS transfers driven by the receiver's flow control.
use embassy_sync::blocking_mutex::raw::RawMutex;

use super::{
    data_frame, packet_count, AbortReason, ControlMessage, TpLink, MAX_SEGMENTED_PAYLOAD,
    NO_CTS_LIMIT,
};
use crate::error::{HeapError, SendError};
use crate::infra::heap::{HeapBox, SharedHeap};
use crate::infra::slots::SlotTable;
use crate::infra::stats::Counter;
use crate::protocol::timers::deadline_reached;
use crate::protocol::transport::can_id::GLOBAL_ADDRESS;
use crate::protocol::transport::traits::frame_port::FrameSink;

/// Default number of concurrent outbound transfers.
pub const TX_SESSIONS: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TxState {
    /// Broadcast, one data frame per BAM interval.
    Broadcasting,
    /// RTS or a window sent; waiting for the next CTS.
    WaitCts,
    /// Sending the granted window.
    Sending,
    /// Every packet sent; waiting for the EOM.
    WaitEom,
}

/// Outbound transfer in progress.
pub struct TxSession<M: RawMutex> {
    destination: u8,
    pgn: u32,
    state: TxState,
    packets: u8,
    next_sequence: u8,
    window_end: u8,
    payload: HeapBox<M>,
    deadline: u32,
}

impl<M: RawMutex> TxSession<M> {
    pub fn destination(&self) -> u8 {
        self.destination
    }

    pub fn pgn(&self) -> u32 {
        self.pgn
    }

    pub fn state(&self) -> TxState {
        self.state
    }
}

pub struct SegmentedSender<M: RawMutex, const N: usize = TX_SESSIONS> {
    sessions: SlotTable<TxSession<M>, N>,
}

impl<M: RawMutex, const N: usize> Default for SegmentedSender<M, N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M: RawMutex, const N: usize> SegmentedSender<M, N> {
    pub fn new() -> Self {
        Self {
            sessions: SlotTable::new(),
        }
    }

    pub fn active(&self) -> usize {
        self.sessions.len()
    }

    pub fn sessions(&self) -> impl Iterator<Item = &TxSession<M>> {
        self.sessions.iter().map(|(_, session)| session)
    }

    /// Open a transfer of `payload` to `destination`: a BAM for the global
    /// address, an RTS otherwise. The payload is copied into the arena.
    pub fn start<S: FrameSink>(
        &mut self,
        heap: &SharedHeap<M>,
        link: &mut TpLink<'_, S>,
        destination: u8,
        pgn: u32,
        payload: &[u8],
    ) -> Result<(), SendError> {
        let size = payload.len();
        if size > MAX_SEGMENTED_PAYLOAD {
            return Err(SendError::TooLarge { len: size });
        }
        self.check_room(destination)?;
        let mut buffer = HeapBox::new(heap, size).ok_or(SendError::OutOfMemory)?;
        buffer
            .with_mut(|bytes| bytes.copy_from_slice(payload))
            .map_err(|_| SendError::OutOfMemory)?;
        self.start_with(link, destination, pgn, buffer)
    }

    /// Same as [`start`](Self::start) for a payload already packed in the
    /// arena; the whole block is sent.
    pub fn start_with<S: FrameSink>(
        &mut self,
        link: &mut TpLink<'_, S>,
        destination: u8,
        pgn: u32,
        buffer: HeapBox<M>,
    ) -> Result<(), SendError> {
        let size = buffer.len();
        if size > MAX_SEGMENTED_PAYLOAD {
            return Err(SendError::TooLarge { len: size });
        }
        self.check_room(destination)?;

        let packets = packet_count(size) as u8;
        let broadcast = destination == GLOBAL_ADDRESS;
        let (message, state, deadline) = if broadcast {
            (
                ControlMessage::Bam {
                    size: size as u16,
                    packets,
                    pgn,
                },
                TxState::Broadcasting,
                link.deadline(link.timing.bam_interval),
            )
        } else {
            (
                ControlMessage::Rts {
                    size: size as u16,
                    packets,
                    max_per_cts: NO_CTS_LIMIT,
                    pgn,
                },
                TxState::WaitCts,
                link.deadline(link.timing.t3),
            )
        };
        if !link.send_control(destination, message) {
            return Err(SendError::QueueFull);
        }

        let session = TxSession {
            destination,
            pgn,
            state,
            packets,
            next_sequence: 1,
            window_end: if broadcast { packets } else { 0 },
            payload: buffer,
            deadline,
        };
        self.sessions
            .insert(session)
            .map(|_| ())
            .map_err(|_| SendError::SessionBusy)
    }

    /// One transfer per destination, and a free slot.
    fn check_room(&self, destination: u8) -> Result<(), SendError> {
        if self.sessions.is_full()
            || self
                .sessions
                .find(|session| session.destination == destination)
                .is_some()
        {
            return Err(SendError::SessionBusy);
        }
        Ok(())
    }

    /// Flow control from the receiver of one of our transfers.
    pub fn on_cts<S: FrameSink>(
        &mut self,
        link: &mut TpLink<'_, S>,
        source: u8,
        message: ControlMessage,
    ) {
        let ControlMessage::Cts {
            count,
            next_sequence,
            pgn,
        } = message
        else {
            return;
        };
        let Some(index) = self.sessions.position(|session| {
            session.destination == source && session.pgn == pgn && session.state != TxState::Broadcasting
        }) else {
            link.stats.bump(Counter::LateCts);
            return;
        };
        let Some(session) = self.sessions.get_mut(index) else {
            return;
        };

        if count == 0 {
            session.state = TxState::WaitCts;
            session.deadline = link.deadline(link.timing.t4);
            return;
        }
        if next_sequence == 0 || next_sequence > session.packets {
            self.sessions.remove(index);
            link.abort(source, AbortReason::BadSequence, pgn);
            return;
        }
        session.next_sequence = next_sequence;
        session.window_end = next_sequence
            .saturating_add(count - 1)
            .min(session.packets);
        session.state = TxState::Sending;
    }

    /// The receiver acknowledged the whole transfer. Returns the PGN sent.
    pub fn on_eom<S: FrameSink>(&mut self, link: &mut TpLink<'_, S>, source: u8, pgn: u32) -> Option<u32> {
        let Some(index) = self.sessions.position(|session| {
            session.destination == source && session.pgn == pgn && session.state != TxState::Broadcasting
        }) else {
            link.stats.bump(Counter::LateEom);
            return None;
        };
        self.sessions.remove(index).map(|session| session.pgn)
    }

    /// The receiver gave up on `pgn`. Returns whether a session was dropped.
    pub fn on_abort(&mut self, source: u8, pgn: u32) -> bool {
        match self
            .sessions
            .position(|session| session.destination == source && session.pgn == pgn)
        {
            Some(index) => self.sessions.remove(index).is_some(),
            None => false,
        }
    }

    /// Emit due data frames and time out silent receivers.
    pub fn poll<S: FrameSink>(&mut self, link: &mut TpLink<'_, S>) -> Result<(), HeapError> {
        let now = link.now;
        let mut fault = None;
        self.sessions.retain(|session| {
            if fault.is_some() {
                return true;
            }
            match session.state {
                TxState::Broadcasting => {
                    if !deadline_reached(now, session.deadline) {
                        return true;
                    }
                    let sent = session.next_sequence;
                    match send_packet(session, link) {
                        Ok(true) => {}
                        Ok(false) => return true,
                        Err(error) => {
                            fault = Some(error);
                            return false;
                        }
                    }
                    session.next_sequence = sent.wrapping_add(1);
                    session.deadline = link.deadline(link.timing.bam_interval);
                    sent < session.packets
                }
                TxState::Sending => {
                    loop {
                        let sent = session.next_sequence;
                        match send_packet(session, link) {
                            Ok(true) => {}
                            Ok(false) => return true,
                            Err(error) => {
                                fault = Some(error);
                                return false;
                            }
                        }
                        if sent >= session.window_end {
                            break;
                        }
                        session.next_sequence = sent + 1;
                    }
                    session.state = if session.window_end >= session.packets {
                        TxState::WaitEom
                    } else {
                        TxState::WaitCts
                    };
                    session.deadline = link.deadline(link.timing.t3);
                    true
                }
                TxState::WaitCts | TxState::WaitEom => {
                    if !deadline_reached(now, session.deadline) {
                        return true;
                    }
                    link.stats.bump(Counter::MpTxTimeout);
                    link.abort(session.destination, AbortReason::Timeout, session.pgn);
                    false
                }
            }
        });
        fault.map_or(Ok(()), Err)
    }

    pub fn clear(&mut self) {
        self.sessions.clear();
    }
}

/// Push packet `next_sequence` of `session`. `Ok(false)` when the outbox is full.
fn send_packet<M: RawMutex, S: FrameSink>(
    session: &TxSession<M>,
    link: &mut TpLink<'_, S>,
) -> Result<bool, HeapError> {
    if link.out.free() == 0 {
        return Ok(false);
    }
    let frame = session
        .payload
        .with(|bytes| data_frame(link.local, session.destination, session.next_sequence, bytes))?;
    match frame {
        Ok(frame) => Ok(link.push(frame)),
        Err(_) => Ok(false),
    }
}
