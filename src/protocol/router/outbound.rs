//! Outbound side of the message lifecycle: send requests and ISO
//! acknowledgements.
use crate::error::CanIdBuildError;
use crate::infra::codec::engine::RecordRef;
use crate::protocol::catalog::{pgn, GroupFunction};
use crate::protocol::transport::can_frame::CanFrame;
use crate::protocol::transport::can_id::CanId;

/// Priority of ISO acknowledgements.
pub const ACK_PRIORITY: u8 = 6;

/// Options of one send.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SendFlags {
    loopback: bool,
    priority: Option<u8>,
}

impl SendFlags {
    pub const NONE: Self = Self {
        loopback: false,
        priority: None,
    };
    /// Also deliver the message to the local router, as if received from
    /// our own address.
    pub const LOOPBACK: Self = Self {
        loopback: true,
        priority: None,
    };

    /// Send with `priority` instead of the descriptor's default.
    pub const fn priority_override(priority: u8) -> Self {
        Self {
            loopback: false,
            priority: Some(priority & 0x07),
        }
    }

    pub const fn with_loopback(mut self) -> Self {
        self.loopback = true;
        self
    }

    pub const fn with_priority(mut self, priority: u8) -> Self {
        self.priority = Some(priority & 0x07);
        self
    }

    pub const fn loopback(&self) -> bool {
        self.loopback
    }

    pub const fn priority(&self) -> Option<u8> {
        self.priority
    }
}

/// One message to pack and send; consumed by `Stack::send`.
#[derive(Debug, Clone, Copy)]
pub struct OutboundRequest<'r> {
    pub pgn: u32,
    pub group_function: GroupFunction,
    /// Ignored for broadcast-only (PDU2) PGNs.
    pub destination: u8,
    pub record: RecordRef<'r>,
    pub flags: SendFlags,
}

impl<'r> OutboundRequest<'r> {
    pub const fn new(pgn: u32, destination: u8, record: RecordRef<'r>) -> Self {
        Self {
            pgn,
            group_function: GroupFunction::DontCare,
            destination,
            record,
            flags: SendFlags::NONE,
        }
    }

    pub const fn with_group_function(mut self, code: u8) -> Self {
        self.group_function = GroupFunction::Code(code);
        self
    }

    pub const fn with_flags(mut self, flags: SendFlags) -> Self {
        self.flags = flags;
        self
    }
}

/// ISO acknowledgement (PGN 59392) of `acked_pgn` sent by `source` to
/// `destination`.
///
/// ```text
/// [control, group function, 0xFF, 0xFF, acked address, pgn LE24]
/// ```
pub fn ack_frame(
    source: u8,
    destination: u8,
    control: u8,
    group_function: GroupFunction,
    acked_pgn: u32,
) -> Result<CanFrame, CanIdBuildError> {
    let id = CanId::for_message(pgn::ISO_ACK, ACK_PRIORITY, source, destination)?;
    let mut data = [0xFF; 8];
    data[0] = control;
    data[1] = group_function.to_byte();
    data[4] = destination;
    data[5..8].copy_from_slice(&acked_pgn.to_le_bytes()[..3]);
    Ok(CanFrame::with_data(id, &data))
}

/// ISO request (PGN 59904) for `requested` sent by `source` to `destination`.
pub fn request_frame(source: u8, destination: u8, requested: u32) -> Result<CanFrame, CanIdBuildError> {
    let id = CanId::for_message(pgn::ISO_REQUEST, ACK_PRIORITY, source, destination)?;
    Ok(CanFrame::with_data(id, &requested.to_le_bytes()[..3]))
}
