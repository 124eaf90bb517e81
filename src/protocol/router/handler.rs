//! Application hooks called by the router.
use embassy_sync::blocking_mutex::raw::RawMutex;

use super::envelope::Envelope;
use crate::infra::codec::engine::RecordRef;

/// What a message handler did with an envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum HandlerResult {
    Handled,
    /// Treated as if no handler existed.
    Unhandled,
    /// Refused; a directed sender gets "access denied".
    Denied,
}

/// Consumer of received messages. Implemented for every
/// `FnMut(&Envelope<M>) -> HandlerResult` closure.
pub trait MessageHandler<M: RawMutex> {
    fn handle(&mut self, envelope: &Envelope<M>) -> HandlerResult;
}

impl<M: RawMutex, F> MessageHandler<M> for F
where
    F: FnMut(&Envelope<M>) -> HandlerResult,
{
    fn handle(&mut self, envelope: &Envelope<M>) -> HandlerResult {
        self(envelope)
    }
}

/// An ISO request addressed to us (or to everyone).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Request {
    /// Requested parameter group.
    pub pgn: u32,
    pub requester: u8,
    /// Destination of the request itself.
    pub destination: u8,
}

/// Builds the record sent back for a requested PGN. `None` refuses the
/// request, which the router answers with a NAK (or "access denied").
pub trait RequestHandler {
    fn respond(&mut self, request: &Request) -> Option<RecordRef<'_>>;
}
