//! Receive router: resolves a complete inbound payload against the
//! catalogue, applies the receive policies, decodes it into an [`Envelope`]
//! and hands it to the registered handler.
//!
//! Network-management traffic (ISO request, ISO ack, address claim) is
//! answered here when the answer is a plain acknowledgement, and otherwise
//! returned to the engine as a [`Routed`] outcome.
pub mod envelope;
pub mod handler;
pub mod outbound;

use alloc::boxed::Box;
use alloc::vec::Vec;
use embassy_sync::blocking_mutex::raw::RawMutex;

use self::envelope::{Envelope, Origin};
use self::handler::{HandlerResult, MessageHandler, Request, RequestHandler};
use self::outbound::ack_frame;
use crate::error::{DeserializationError, HeapError};
use crate::infra::codec::engine::{self, RecordRef};
use crate::infra::codec::record::PgnRecord;
use crate::infra::heap::{HeapBox, SharedHeap};
use crate::infra::stats::{CommStats, Counter};
use crate::protocol::catalog::system::ack_control;
use crate::protocol::catalog::{pgn, Catalog, CatalogEntry, EntryFlags, GroupFunction};
use crate::protocol::transport::can_id::{is_pdu1, GLOBAL_ADDRESS};
use crate::protocol::transport::traits::frame_port::FrameSink;

/// Reply to a message whose catalogue entry is not receivable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum NotReceivablePolicy {
    /// ISO ack "access denied".
    Deny,
    /// ISO ack "NAK".
    #[default]
    Nack,
    Ignore,
}

/// Wire bytes of a complete inbound message.
pub enum Payload<'a, M: RawMutex> {
    /// Single frame, at most 8 bytes.
    Frame(&'a [u8]),
    /// Reassembled multi-frame payload and its length.
    Block(&'a HeapBox<M>, usize),
}

/// A complete message as seen by the router.
pub struct Inbound<'a, M: RawMutex> {
    pub pgn: u32,
    pub source: u8,
    /// [`GLOBAL_ADDRESS`] for broadcast messages.
    pub destination: u8,
    pub priority: u8,
    pub port: u8,
    pub payload: Payload<'a, M>,
}

/// Engine parts the router writes to.
pub struct RouteLink<'a, S: FrameSink> {
    /// Our current source address.
    pub local: u8,
    pub out: &'a mut S,
    pub stats: &'a mut CommStats,
}

/// What the engine still has to do after routing.
pub enum Routed<M: RawMutex> {
    /// Handled, answered or dropped.
    Done,
    /// ISO ack or address claim, forward to the platform.
    Internal(Envelope<M>),
    /// ISO request for the address claim.
    ClaimRequest { requester: u8 },
    /// Packed response to an ISO request, to be sent by the engine.
    Response {
        entry: &'static CatalogEntry,
        destination: u8,
        payload: HeapBox<M>,
        len: usize,
    },
}

impl<M: RawMutex> core::fmt::Debug for Routed<M> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Routed::Done => f.write_str("Done"),
            Routed::Internal(envelope) => f.debug_tuple("Internal").field(envelope).finish(),
            Routed::ClaimRequest { requester } => f
                .debug_struct("ClaimRequest")
                .field("requester", requester)
                .finish(),
            Routed::Response {
                entry,
                destination,
                len,
                ..
            } => f
                .debug_struct("Response")
                .field("pgn", &entry.pgn)
                .field("destination", destination)
                .field("len", len)
                .finish(),
        }
    }
}

struct Registration<M: RawMutex> {
    pgn: u32,
    group_function: GroupFunction,
    handler: Box<dyn MessageHandler<M>>,
}

pub struct Router<M: RawMutex> {
    catalog: Catalog,
    heap: SharedHeap<M>,
    policy: NotReceivablePolicy,
    handlers: Vec<Registration<M>>,
    responders: Vec<(u32, Box<dyn RequestHandler>)>,
    fallback: Option<Box<dyn MessageHandler<M>>>,
    enabled: Vec<(u32, GroupFunction)>,
}

impl<M: RawMutex> Router<M> {
    pub fn new(catalog: Catalog, heap: SharedHeap<M>, policy: NotReceivablePolicy) -> Self {
        Self {
            catalog,
            heap,
            policy,
            handlers: Vec::new(),
            responders: Vec::new(),
            fallback: None,
            enabled: Vec::new(),
        }
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn heap(&self) -> &SharedHeap<M> {
        &self.heap
    }

    /// Register `handler` for `(pgn, group_function)`, replacing any previous
    /// one for the same key. `DontCare` handlers receive every group function
    /// without a more specific handler.
    pub fn register_handler(
        &mut self,
        pgn: u32,
        group_function: GroupFunction,
        handler: impl MessageHandler<M> + 'static,
    ) {
        let handler: Box<dyn MessageHandler<M>> = Box::new(handler);
        match self
            .handlers
            .iter_mut()
            .find(|r| r.pgn == pgn && r.group_function == group_function)
        {
            Some(registration) => registration.handler = handler,
            None => self.handlers.push(Registration {
                pgn,
                group_function,
                handler,
            }),
        }
    }

    pub fn unregister_handler(&mut self, pgn: u32, group_function: GroupFunction) {
        self.handlers
            .retain(|r| !(r.pgn == pgn && r.group_function == group_function));
    }

    pub fn register_request_handler(&mut self, pgn: u32, handler: impl RequestHandler + 'static) {
        let handler: Box<dyn RequestHandler> = Box::new(handler);
        match self.responders.iter_mut().find(|(key, _)| *key == pgn) {
            Some(slot) => slot.1 = handler,
            None => self.responders.push((pgn, handler)),
        }
    }

    /// Handler for every message without a specific one.
    pub fn set_fallback(&mut self, handler: impl MessageHandler<M> + 'static) {
        self.fallback = Some(Box::new(handler));
    }

    pub fn clear_fallback(&mut self) {
        self.fallback = None;
    }

    /// Enable or disable reception of a `DYNAMIC` entry.
    pub fn enable_dynamic(&mut self, pgn: u32, group_function: GroupFunction, enabled: bool) {
        let key = (pgn, group_function);
        let present = self.enabled.contains(&key);
        if enabled && !present {
            self.enabled.push(key);
        } else if !enabled && present {
            self.enabled.retain(|k| *k != key);
        }
    }

    pub fn is_enabled(&self, entry: &CatalogEntry) -> bool {
        !entry.has(EntryFlags::DYNAMIC)
            || self
                .enabled
                .iter()
                .any(|(pgn, gf)| *pgn == entry.pgn && gf.matches(entry.group_function))
    }

    /// Route one complete inbound message.
    ///
    /// Only arena corruption is an error; every other failure is answered or
    /// counted and yields [`Routed::Done`].
    pub fn route<S: FrameSink>(
        &mut self,
        link: &mut RouteLink<'_, S>,
        message: Inbound<'_, M>,
    ) -> Result<Routed<M>, HeapError> {
        let directed = is_pdu1(message.pgn)
            && message.destination == link.local
            && message.destination != GLOBAL_ADDRESS;

        let (entry, group_function) = match &message.payload {
            Payload::Frame(bytes) => self.resolve(message.pgn, bytes),
            Payload::Block(payload, len) => {
                let len = *len;
                payload.with(|bytes| self.resolve(message.pgn, &bytes[..len.min(bytes.len())]))?
            }
        };

        let Some(entry) = entry else {
            #[cfg(feature = "defmt")]
            defmt::debug!("unknown PGN {} from {}", message.pgn, message.source);
            link.stats.bump(Counter::UnknownPgn);
            return Ok(Routed::Done);
        };

        if !entry.has(EntryFlags::RX) {
            let control = match self.policy {
                NotReceivablePolicy::Deny => Some(ack_control::ACCESS_DENIED),
                NotReceivablePolicy::Nack => Some(ack_control::NAK),
                NotReceivablePolicy::Ignore => None,
            };
            if let (Some(control), true) = (control, directed) {
                acknowledge(link, message.source, control, group_function, message.pgn);
            }
            return Ok(Routed::Done);
        }

        if !self.is_enabled(entry) {
            return Ok(Routed::Done);
        }

        let decoded = match &message.payload {
            Payload::Frame(bytes) => PgnRecord::decode(&self.heap, entry.descriptor, bytes),
            Payload::Block(payload, len) => {
                PgnRecord::decode_block(&self.heap, entry.descriptor, payload, *len)
            }
        };
        let record = match decoded {
            Ok(record) => record,
            Err(DeserializationError::Heap(error @ HeapError::Corrupted { .. }))
            | Err(DeserializationError::Heap(error @ HeapError::NotInstalled)) => {
                return Err(error);
            }
            // Counted by the allocator.
            Err(DeserializationError::OutOfMemory { .. }) => return Ok(Routed::Done),
            Err(_error) => {
                #[cfg(feature = "defmt")]
                defmt::warn!("PGN {} from {} failed to decode: {}", entry.pgn, message.source, defmt::Debug2Format(&_error));
                link.stats.bump(Counter::DecodeErrors);
                if directed {
                    acknowledge(link, message.source, ack_control::NAK, group_function, entry.pgn);
                }
                return Ok(Routed::Done);
            }
        };

        let origin = Origin {
            source: message.source,
            destination: message.destination,
            priority: message.priority,
            port: message.port,
        };
        let envelope = Envelope::new(entry, group_function, record, origin);

        match entry.pgn {
            pgn::ISO_REQUEST => Ok(self.on_request(link, &envelope, directed)),
            pgn::ISO_ACK => {
                self.dispatch(&envelope);
                Ok(Routed::Internal(envelope))
            }
            // Arbitration already ran from the raw frame.
            pgn::ADDRESS_CLAIM => Ok(Routed::Internal(envelope)),
            _ => {
                match self.dispatch(&envelope) {
                    HandlerResult::Handled => {}
                    HandlerResult::Denied if directed => acknowledge(
                        link,
                        message.source,
                        ack_control::ACCESS_DENIED,
                        group_function,
                        entry.pgn,
                    ),
                    HandlerResult::Denied => {}
                    HandlerResult::Unhandled => {
                        if directed && !entry.has(EntryFlags::IGNORE_UNHANDLED) {
                            acknowledge(link, message.source, ack_control::NAK, group_function, entry.pgn);
                        }
                    }
                }
                Ok(Routed::Done)
            }
        }
    }

    /// Catalogue entry and effective group function of a payload.
    fn resolve(&self, pgn: u32, bytes: &[u8]) -> (Option<&'static CatalogEntry>, GroupFunction) {
        let Some(entry) = self.catalog.resolve(pgn, bytes) else {
            return (None, GroupFunction::DontCare);
        };
        let group_function = engine::read_group_function(entry.descriptor, bytes)
            .map_or(entry.group_function, GroupFunction::Code);
        (Some(entry), group_function)
    }

    /// Specific handler first, then the `DontCare` one, then the fallback.
    fn dispatch(&mut self, envelope: &Envelope<M>) -> HandlerResult {
        let pgn = envelope.pgn();
        let group_function = envelope.group_function();
        let specific = self
            .handlers
            .iter()
            .position(|r| r.pgn == pgn && r.group_function == group_function)
            .or_else(|| {
                self.handlers
                    .iter()
                    .position(|r| r.pgn == pgn && r.group_function == GroupFunction::DontCare)
            });
        if let Some(index) = specific {
            match self.handlers[index].handler.handle(envelope) {
                HandlerResult::Unhandled => {}
                result => return result,
            }
        }
        match self.fallback.as_mut() {
            Some(fallback) => fallback.handle(envelope),
            None => HandlerResult::Unhandled,
        }
    }

    fn on_request<S: FrameSink>(
        &mut self,
        link: &mut RouteLink<'_, S>,
        envelope: &Envelope<M>,
        directed: bool,
    ) -> Routed<M> {
        let requested = match envelope.value("pgn").and_then(|value| value.as_u32()) {
            Some(requested) => requested,
            None => return Routed::Done,
        };
        let requester = envelope.source();
        let global = envelope.destination() == GLOBAL_ADDRESS;
        if !directed && !global {
            return Routed::Done;
        }
        if requested == pgn::ADDRESS_CLAIM {
            return Routed::ClaimRequest { requester };
        }

        let Some(entry) = self.catalog.lookup(requested, GroupFunction::DontCare) else {
            if directed {
                acknowledge(link, requester, ack_control::NAK, GroupFunction::DontCare, requested);
            }
            return Routed::Done;
        };

        if entry.has(EntryFlags::REQUEST) {
            let request = Request {
                pgn: requested,
                requester,
                destination: envelope.destination(),
            };
            let heap = &self.heap;
            let packed = self
                .responders
                .iter_mut()
                .find(|(key, _)| *key == requested)
                .and_then(|(_, responder)| {
                    let record = responder.respond(&request)?;
                    Some(pack_response(heap, entry, record))
                });
            match packed {
                Some(Some((payload, len))) => {
                    return Routed::Response {
                        entry,
                        destination: if global { GLOBAL_ADDRESS } else { requester },
                        payload,
                        len,
                    };
                }
                // Out of memory or a record that does not fit the descriptor.
                Some(None) => {
                    if directed {
                        acknowledge(link, requester, ack_control::CANNOT_RESPOND, entry.group_function, requested);
                    }
                    return Routed::Done;
                }
                None => {}
            }
        }

        if directed {
            let control = if entry.has(EntryFlags::DENY_ON_REQUEST) {
                ack_control::ACCESS_DENIED
            } else {
                ack_control::NAK
            };
            acknowledge(link, requester, control, entry.group_function, requested);
        }
        Routed::Done
    }
}

impl<M: RawMutex> core::fmt::Debug for Router<M> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Router")
            .field("policy", &self.policy)
            .field("handlers", &self.handlers.len())
            .field("responders", &self.responders.len())
            .field("fallback", &self.fallback.is_some())
            .field("enabled", &self.enabled)
            .finish()
    }
}

/// Pack `record` for `entry` into a fresh arena block.
fn pack_response<M: RawMutex>(
    heap: &SharedHeap<M>,
    entry: &'static CatalogEntry,
    record: RecordRef<'_>,
) -> Option<(HeapBox<M>, usize)> {
    let capacity = engine::packed_len(entry.descriptor, record.extra_count);
    let mut payload = HeapBox::new(heap, capacity)?;
    let len = payload
        .with_mut(|out| engine::pack(entry.descriptor, record, out))
        .ok()?
        .ok()?;
    Some((payload, len))
}

/// Queue an ISO acknowledgement to `to`.
fn acknowledge<S: FrameSink>(
    link: &mut RouteLink<'_, S>,
    to: u8,
    control: u8,
    group_function: GroupFunction,
    acked_pgn: u32,
) {
    let Ok(frame) = ack_frame(link.local, to, control, group_function, acked_pgn) else {
        return;
    };
    if link.out.push(frame).is_err() {
        link.stats.bump(Counter::TxQueueFull);
    }
}
