use embassy_sync::blocking_mutex::raw::RawMutex;

use super::{notify, Stack};
use crate::engine::platform::Platform;
use crate::error::StackError;
use crate::infra::heap::HeapBox;
use crate::infra::stats::Counter;
use crate::protocol::catalog::{pgn, GroupFunction};
use crate::protocol::managment::address_claiming::{ClaimLink, NULL_ADDRESS};
use crate::protocol::managment::iso_name::IsoName;
use crate::protocol::router::{Inbound, Payload, RouteLink, Routed};
use crate::protocol::transport::can_frame::CanFrame;
use crate::protocol::transport::can_id::GLOBAL_ADDRESS;
use crate::protocol::transport::fast_packet::assembler::{CompletedMessage, ProcessResult};
use crate::protocol::transport::segmented::{ControlMessage, TpLink};

impl<M, P, const TX: usize, const RX: usize, const N: usize> Stack<M, P, TX, RX, N>
where
    M: RawMutex,
    P: Platform<M>,
{
    /// Process one frame as soon as it arrives instead of waiting for the
    /// next [`tick`](Self::tick). Fatal errors are also reported.
    pub fn receive(&mut self, frame: &CanFrame) -> Result<(), StackError> {
        let result = self.receive_frame(frame);
        if let Err(error) = result {
            self.platform.report_error(error);
        }
        result
    }

    /// Feed one frame from the bus through the layers.
    pub(super) fn receive_frame(&mut self, frame: &CanFrame) -> Result<(), StackError> {
        let id = frame.id;
        let source = id.source_address();
        let destination = id.destination_or_global();
        if source < NULL_ADDRESS {
            self.claim.on_traffic(source);
        }
        // Claims are arbitrated from the raw frame, before any arena use.
        if id.pgn() == pgn::ADDRESS_CLAIM {
            self.arbitrate(source, frame.payload())?;
        }
        let local = self.claim.address();
        // Directed traffic between two other nodes.
        if destination != GLOBAL_ADDRESS && destination != local {
            return Ok(());
        }

        match id.pgn() {
            pgn::TP_CM => self.on_transport_control(frame, source, destination),
            pgn::TP_DT => {
                let mut link = TpLink {
                    local,
                    now: self.now,
                    timing: &self.timing,
                    out: &mut self.outbox,
                    stats: &mut self.stats,
                };
                match self.tp_rx.on_data(&mut link, source, destination, frame.payload()) {
                    Ok(Some(message)) => self.route_completed(message),
                    Ok(None) => Ok(()),
                    Err(error) => self.escalate(Err(error)),
                }
            }
            pgn => match self.router.catalog().fast_packet_class(pgn) {
                Some(class) => match self.fast_packets.process_frame(&self.heap, frame, class, self.now) {
                    ProcessResult::MessageComplete(message) => self.route_completed(message),
                    ProcessResult::Dropped(_reason) => {
                        #[cfg(feature = "defmt")]
                        defmt::debug!("stack: fast packet from {} dropped: {}", source, _reason);
                        self.stats.bump(Counter::FastPacketDrops);
                        Ok(())
                    }
                    ProcessResult::Fault(error) => self.escalate(Err(error)),
                    ProcessResult::Ignored | ProcessResult::FragmentConsumed => Ok(()),
                },
                None => self.route(Inbound {
                    pgn,
                    source,
                    destination,
                    priority: id.priority(),
                    port: 0,
                    payload: Payload::Frame(frame.payload()),
                }),
            },
        }
    }

    /// Feed a received address claim to the claim state machine.
    fn arbitrate(&mut self, source: u8, payload: &[u8]) -> Result<(), StackError> {
        // A short payload is counted by the router.
        let Some(name) = IsoName::from_claim(payload) else {
            return Ok(());
        };
        let mut link = ClaimLink {
            timers: &mut self.timers,
            out: &mut self.outbox,
            stats: &mut self.stats,
        };
        let platform = &mut self.platform;
        let result = self
            .claim
            .on_claim(&mut link, source, name, |notice| notify::<M, P>(platform, notice));
        self.escalate(result)
    }

    fn on_transport_control(&mut self, frame: &CanFrame, source: u8, destination: u8) -> Result<(), StackError> {
        let Some(message) = ControlMessage::parse(frame.payload()) else {
            return Ok(());
        };
        let mut link = TpLink {
            local: self.claim.address(),
            now: self.now,
            timing: &self.timing,
            out: &mut self.outbox,
            stats: &mut self.stats,
        };
        match message {
            // An RTS must be addressed to us; a broadcast one is malformed.
            ControlMessage::Rts { .. } if destination != GLOBAL_ADDRESS => {
                self.tp_rx
                    .on_rts(&self.heap, &mut link, source, frame.id.priority(), message)
            }
            ControlMessage::Rts { .. } => {}
            // Broadcasts we cannot route would only hold arena space.
            ControlMessage::Bam { pgn, .. } if !self.router.catalog().receives(pgn) => {
                link.stats.bump(Counter::UnknownPgn);
            }
            ControlMessage::Bam { .. } => {
                self.tp_rx
                    .on_bam(&self.heap, &mut link, source, frame.id.priority(), message)
            }
            ControlMessage::Cts { .. } => self.tp_tx.on_cts(&mut link, source, message),
            ControlMessage::Eom { pgn, .. } => {
                let _ = self.tp_tx.on_eom(&mut link, source, pgn);
            }
            ControlMessage::Abort { pgn, .. } => {
                if !self.tp_rx.on_abort(source, pgn) && !self.tp_tx.on_abort(source, pgn) {
                    link.stats.bump(Counter::LateAbort);
                }
            }
        }
        Ok(())
    }

    fn route_completed(&mut self, message: CompletedMessage<M>) -> Result<(), StackError> {
        self.route(Inbound {
            pgn: message.pgn,
            source: message.source,
            destination: message.destination,
            priority: message.priority,
            port: 0,
            payload: Payload::Block(&message.payload, message.len),
        })
    }

    /// Route a complete message and carry out what the router hands back.
    pub(super) fn route(&mut self, message: Inbound<'_, M>) -> Result<(), StackError> {
        let pgn = message.pgn;
        let mut link = RouteLink {
            local: self.claim.address(),
            out: &mut self.outbox,
            stats: &mut self.stats,
        };
        let routed = match self.router.route(&mut link, message) {
            Ok(routed) => routed,
            Err(error) => return self.escalate(Err(error)),
        };
        // Any arrival of the PGN rearms its receive timeouts.
        self.timers.refresh_receive(pgn, GroupFunction::DontCare);

        match routed {
            Routed::Done => Ok(()),
            Routed::Internal(envelope) => {
                self.platform.internal_message(&envelope);
                Ok(())
            }
            Routed::ClaimRequest { requester: _ } => {
                let mut link = ClaimLink {
                    timers: &mut self.timers,
                    out: &mut self.outbox,
                    stats: &mut self.stats,
                };
                let result = self.claim.on_request(&mut link);
                self.escalate(result)
            }
            Routed::Response {
                entry,
                destination,
                payload,
                len,
            } => {
                let result = self.transmit_packed(entry, destination, entry.descriptor.priority, payload, len);
                self.escalate(result)
            }
        }
    }

    /// Loop an outbound payload back through the router as if received.
    pub(super) fn loop_back(&mut self, pgn: u32, destination: u8, priority: u8, payload: &HeapBox<M>, len: usize) {
        let message = Inbound {
            pgn,
            source: self.claim.address(),
            destination,
            priority,
            port: 0,
            payload: Payload::Block(payload, len),
        };
        if let Err(error) = self.route(message) {
            self.platform.report_error(error);
        }
    }
}
