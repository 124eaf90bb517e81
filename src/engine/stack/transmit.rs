use embassy_sync::blocking_mutex::raw::RawMutex;

use super::Stack;
use crate::engine::platform::Platform;
use crate::error::{SendError, SerializationError};
use crate::infra::codec::engine::{pack, packed_len};
use crate::infra::heap::HeapBox;
use crate::infra::stats::Counter;
use crate::protocol::catalog::{pgn, CatalogEntry, EntryFlags};
use crate::protocol::router::outbound::{request_frame, OutboundRequest};
use crate::protocol::transport::can_frame::CanFrame;
use crate::protocol::transport::can_id::{is_pdu1, CanId, GLOBAL_ADDRESS};
use crate::protocol::transport::fast_packet::builder::FastPacketBuilder;
use crate::protocol::transport::fast_packet::MAX_FAST_PACKET_PAYLOAD;
use crate::protocol::transport::segmented::{TpLink, MAX_SEGMENTED_PAYLOAD};
use crate::protocol::transport::traits::frame_port::FrameSink;
use crate::protocol::transport::SINGLE_FRAME_PAYLOAD;

impl<M, P, const TX: usize, const RX: usize, const N: usize> Stack<M, P, TX, RX, N>
where
    M: RawMutex,
    P: Platform<M>,
{
    /// Pack `request` and queue it with the framing its size calls for:
    /// one frame, fast packet, or a segmented transfer (BAM when global).
    pub fn send(&mut self, request: &OutboundRequest<'_>) -> Result<(), SendError> {
        let entry = self
            .router
            .catalog()
            .lookup(request.pgn, request.group_function)
            .ok_or(SendError::UnknownPgn { pgn: request.pgn })?;
        if !entry.has(EntryFlags::TX) {
            return Err(SendError::NotTransmittable { pgn: entry.pgn });
        }
        if !self.claim.is_online() {
            return Err(SendError::NotOnline);
        }

        let len = packed_len(entry.descriptor, request.record.extra_count);
        if len > MAX_SEGMENTED_PAYLOAD {
            return Err(SendError::TooLarge { len });
        }
        let mut payload = HeapBox::new(&self.heap, len).ok_or(SendError::OutOfMemory)?;
        let len = payload
            .with_mut(|out| pack(entry.descriptor, request.record, out))
            .map_err(SerializationError::from)??;

        let priority = request.flags.priority().unwrap_or(entry.descriptor.priority);
        let destination = if is_pdu1(entry.pgn) {
            request.destination
        } else {
            GLOBAL_ADDRESS
        };
        if request.flags.loopback() && self.config.loopback {
            self.loop_back(entry.pgn, destination, priority, &payload, len);
        }
        self.transmit_packed(entry, destination, priority, payload, len)
    }

    /// Queue an already packed payload.
    pub(super) fn transmit_packed(
        &mut self,
        entry: &'static CatalogEntry,
        destination: u8,
        priority: u8,
        payload: HeapBox<M>,
        len: usize,
    ) -> Result<(), SendError> {
        let source = self.claim.address();
        let id = CanId::for_message(entry.pgn, priority, source, destination)?;

        if let Some(class) = entry.fast_packet_class.filter(|_| len <= MAX_FAST_PACKET_PAYLOAD) {
            let sequence = self.sequences.next(class);
            let outbox = &mut self.outbox;
            let queued = payload
                .with(|bytes| {
                    let frames = FastPacketBuilder::new(id, &bytes[..len], sequence)?.build();
                    outbox.push_all(frames)
                })
                .map_err(SerializationError::from)?;
            return self.count_queue_full(queued);
        }

        if len <= SINGLE_FRAME_PAYLOAD {
            let frame = payload
                .with(|bytes| CanFrame::with_data(id, &bytes[..len]))
                .map_err(SerializationError::from)?;
            let queued = self.outbox.push(frame).map_err(|_| SendError::QueueFull);
            return self.count_queue_full(queued);
        }

        let mut link = TpLink {
            local: source,
            now: self.now,
            timing: &self.timing,
            out: &mut self.outbox,
            stats: &mut self.stats,
        };
        self.tp_tx.start_with(&mut link, destination, entry.pgn, payload)
    }

    /// Ask `destination` (or everyone) to send `requested`.
    pub fn send_request(&mut self, requested: u32, destination: u8) -> Result<(), SendError> {
        let frame = request_frame(self.claim.address(), destination, requested)?;
        let queued = self.outbox.push(frame).map_err(|_| SendError::QueueFull);
        self.count_queue_full(queued)
    }

    /// Broadcast a request for the address claim; every node answers and
    /// the node table fills from the replies.
    pub fn discover_network(&mut self) -> Result<(), SendError> {
        self.send_request(pgn::ADDRESS_CLAIM, GLOBAL_ADDRESS)
    }

    fn count_queue_full(&mut self, queued: Result<(), SendError>) -> Result<(), SendError> {
        if queued == Err(SendError::QueueFull) {
            self.stats.bump(Counter::TxQueueFull);
        }
        queued
    }
}
