//! Receiving side of segmented transfers: RTS/CTS sessions addressed to us
//! and BAM broadcasts.
use embassy_sync::blocking_mutex::raw::RawMutex;

use super::{
    packet_count, AbortReason, ControlMessage, TpLink, BYTES_PER_PACKET, MAX_SEGMENTED_PAYLOAD,
    NO_CTS_LIMIT,
};
use crate::error::HeapError;
use crate::infra::heap::{HeapBox, SharedHeap};
use crate::infra::slots::SlotTable;
use crate::infra::stats::Counter;
use crate::protocol::timers::deadline_reached;
use crate::protocol::transport::can_id::GLOBAL_ADDRESS;
use crate::protocol::transport::fast_packet::assembler::CompletedMessage;
use crate::protocol::transport::traits::frame_port::FrameSink;

/// Default number of concurrent inbound transfers.
pub const RX_SESSIONS: usize = 4;

/// Inbound transfer in progress.
pub struct RxSession<M: RawMutex> {
    source: u8,
    destination: u8,
    pgn: u32,
    priority: u8,
    broadcast: bool,
    size: usize,
    packets: u8,
    max_per_cts: u8,
    next_sequence: u8,
    /// Last sequence number granted by the current CTS.
    window_end: u8,
    received: usize,
    buffer: HeapBox<M>,
    deadline: u32,
}

impl<M: RawMutex> RxSession<M> {
    pub fn source(&self) -> u8 {
        self.source
    }

    pub fn pgn(&self) -> u32 {
        self.pgn
    }

    pub fn is_broadcast(&self) -> bool {
        self.broadcast
    }

    pub fn received(&self) -> usize {
        self.received
    }

    fn complete(self) -> CompletedMessage<M> {
        CompletedMessage {
            payload: self.buffer,
            len: self.size,
            pgn: self.pgn,
            source: self.source,
            destination: self.destination,
            priority: self.priority,
        }
    }
}

pub struct SegmentedReceiver<M: RawMutex, const N: usize = RX_SESSIONS> {
    sessions: SlotTable<RxSession<M>, N>,
}

impl<M: RawMutex, const N: usize> Default for SegmentedReceiver<M, N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M: RawMutex, const N: usize> SegmentedReceiver<M, N> {
    pub fn new() -> Self {
        Self {
            sessions: SlotTable::new(),
        }
    }

    pub fn active(&self) -> usize {
        self.sessions.len()
    }

    pub fn sessions(&self) -> impl Iterator<Item = &RxSession<M>> {
        self.sessions.iter().map(|(_, session)| session)
    }

    /// A peer asks to send us `size` bytes of `pgn`.
    pub fn on_rts<S: FrameSink>(
        &mut self,
        heap: &SharedHeap<M>,
        link: &mut TpLink<'_, S>,
        source: u8,
        priority: u8,
        message: ControlMessage,
    ) {
        let ControlMessage::Rts {
            size,
            packets,
            max_per_cts,
            pgn,
        } = message
        else {
            return;
        };

        if let Some(index) = self
            .sessions
            .position(|session| !session.broadcast && session.source == source)
        {
            if let Some(old) = self.sessions.remove(index) {
                link.abort(source, AbortReason::AlreadyInSession, old.pgn);
            }
            return;
        }

        let size = size as usize;
        if size > MAX_SEGMENTED_PAYLOAD || size > packets as usize * BYTES_PER_PACKET || size == 0 {
            link.abort(source, AbortReason::TooLarge, pgn);
            return;
        }
        if self.sessions.is_full() {
            refuse(link, source, pgn);
            return;
        }
        let Some(buffer) = HeapBox::new(heap, size) else {
            link.abort(source, AbortReason::Resources, pgn);
            return;
        };

        let session = RxSession {
            source,
            destination: link.local,
            pgn,
            priority,
            broadcast: false,
            size,
            packets: packet_count(size) as u8,
            max_per_cts,
            next_sequence: 1,
            window_end: 0,
            received: 0,
            buffer,
            deadline: link.deadline(link.timing.t2),
        };
        match self.sessions.insert(session) {
            Ok(index) => {
                #[cfg(feature = "defmt")]
                defmt::debug!("TP rx: RTS from {} for PGN {} ({} bytes)", source, pgn, size);
                if let Some(session) = self.sessions.get_mut(index) {
                    grant_window(session, link);
                }
            }
            Err(_) => refuse(link, source, pgn),
        }
    }

    /// A peer announces a broadcast of `size` bytes of `pgn`.
    pub fn on_bam<S: FrameSink>(
        &mut self,
        heap: &SharedHeap<M>,
        link: &mut TpLink<'_, S>,
        source: u8,
        priority: u8,
        message: ControlMessage,
    ) {
        let ControlMessage::Bam { size, pgn, .. } = message else {
            return;
        };
        if let Some(index) = self
            .sessions
            .position(|session| session.broadcast && session.source == source)
        {
            self.sessions.remove(index);
        }

        let size = size as usize;
        if size == 0 || size > MAX_SEGMENTED_PAYLOAD {
            return;
        }
        if self.sessions.is_full() {
            link.stats.bump(Counter::SessionTableFull);
            return;
        }
        let Some(buffer) = HeapBox::new(heap, size) else {
            return;
        };
        let session = RxSession {
            source,
            destination: GLOBAL_ADDRESS,
            pgn,
            priority,
            broadcast: true,
            size,
            packets: packet_count(size) as u8,
            max_per_cts: NO_CTS_LIMIT,
            next_sequence: 1,
            window_end: packet_count(size) as u8,
            received: 0,
            buffer,
            deadline: link.deadline(link.timing.t1),
        };
        if self.sessions.insert(session).is_err() {
            link.stats.bump(Counter::SessionTableFull);
        }
    }

    /// One TP.DT frame. Returns the payload once the last packet arrives.
    pub fn on_data<S: FrameSink>(
        &mut self,
        link: &mut TpLink<'_, S>,
        source: u8,
        destination: u8,
        data: &[u8],
    ) -> Result<Option<CompletedMessage<M>>, HeapError> {
        let broadcast = destination == GLOBAL_ADDRESS;
        if data.is_empty() || (!broadcast && destination != link.local) {
            return Ok(None);
        }
        let Some(index) = self
            .sessions
            .position(|session| session.broadcast == broadcast && session.source == source)
        else {
            link.stats.bump(Counter::LateTransfer);
            return Ok(None);
        };
        let Some(session) = self.sessions.get_mut(index) else {
            return Ok(None);
        };

        let sequence = data[0];
        if sequence != session.next_sequence || sequence > session.window_end {
            let reason = if sequence.wrapping_add(1) == session.next_sequence {
                AbortReason::DuplicateSequence
            } else {
                AbortReason::BadSequence
            };
            let pgn = session.pgn;
            self.sessions.remove(index);
            if !broadcast {
                link.abort(source, reason, pgn);
            }
            return Ok(None);
        }

        let offset = session.received;
        let chunk = (session.size - offset)
            .min(BYTES_PER_PACKET)
            .min(data.len() - 1);
        if let Err(error) = session
            .buffer
            .with_mut(|bytes| bytes[offset..offset + chunk].copy_from_slice(&data[1..1 + chunk]))
        {
            self.sessions.remove(index);
            return Err(error);
        }
        session.received += chunk;
        session.next_sequence = session.next_sequence.wrapping_add(1);

        if session.received >= session.size {
            let Some(session) = self.sessions.remove(index) else {
                return Ok(None);
            };
            if !session.broadcast {
                link.send_control(
                    source,
                    ControlMessage::Eom {
                        size: session.size as u16,
                        packets: session.packets,
                        pgn: session.pgn,
                    },
                );
            }
            return Ok(Some(session.complete()));
        }

        if !session.broadcast && sequence == session.window_end {
            grant_window(session, link);
        } else {
            session.deadline = link.deadline(link.timing.t1);
        }
        Ok(None)
    }

    /// The sender gave up on `pgn`. Returns whether a session was dropped.
    pub fn on_abort(&mut self, source: u8, pgn: u32) -> bool {
        match self
            .sessions
            .position(|session| !session.broadcast && session.source == source && session.pgn == pgn)
        {
            Some(index) => self.sessions.remove(index).is_some(),
            None => false,
        }
    }

    /// Drop sessions whose deadline passed; directed ones are aborted.
    pub fn expire<S: FrameSink>(&mut self, link: &mut TpLink<'_, S>) {
        let now = link.now;
        while let Some(index) = self
            .sessions
            .position(|session| deadline_reached(now, session.deadline))
        {
            let Some(session) = self.sessions.remove(index) else {
                break;
            };
            link.stats.bump(Counter::MpRxTimeout);
            if !session.broadcast {
                link.abort(session.source, AbortReason::Timeout, session.pgn);
            }
        }
    }

    pub fn clear(&mut self) {
        self.sessions.clear();
    }
}

/// Send the CTS for the next window and arm `T2`.
/// No slot for a connection-mode transfer: count it and abort the sender.
fn refuse<S: FrameSink>(link: &mut TpLink<'_, S>, source: u8, pgn: u32) {
    link.stats.bump(Counter::SessionTableFull);
    link.abort(source, AbortReason::Resources, pgn);
}

fn grant_window<M: RawMutex, S: FrameSink>(session: &mut RxSession<M>, link: &mut TpLink<'_, S>) {
    let remaining = session.packets - (session.next_sequence - 1);
    let mut grant = remaining.min(link.timing.cts_window);
    if session.max_per_cts != NO_CTS_LIMIT && session.max_per_cts > 0 {
        grant = grant.min(session.max_per_cts);
    }
    session.window_end = session.next_sequence - 1 + grant;
    session.deadline = link.deadline(link.timing.t2);
    link.send_control(
        session.source,
        ControlMessage::Cts {
            count: grant,
            next_sequence: session.next_sequence,
            pgn: session.pgn,
        },
    );
}
