//! Creation and extraction of the 29-bit extended CAN identifiers used by
//! J1939-style networks.
use crate::error::CanIdBuildError;

/// Destination address meaning "every node".
pub const GLOBAL_ADDRESS: u8 = 255;

//==================================================================================CAN_ID
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
/// Extended CAN identifier (29 bits) with accessors for priority, PGN,
/// destination and source.
pub struct CanId(pub u32);

impl CanId {
    /// Pre-configured builder for a PGN and source address.
    pub fn builder(pgn: u32, source_address: u8) -> CanIdBuilder {
        CanIdBuilder::new(pgn, source_address)
    }

    /// Identifier for `pgn` sent to `destination`. PDU2 PGNs are always
    /// broadcast and ignore the destination.
    pub fn for_message(
        pgn: u32,
        priority: u8,
        source_address: u8,
        destination: u8,
    ) -> Result<Self, CanIdBuildError> {
        let builder = CanIdBuilder::new(pgn, source_address).with_priority(priority);
        if is_pdu1(pgn) {
            builder.to_destination(destination).build()
        } else {
            builder.build()
        }
    }

    /// Priority (3 bits).
    pub fn priority(&self) -> u8 {
        ((self.0 >> 26) & 0x07) as u8
    }

    /// 18-bit PGN. For PDU1 identifiers the destination byte is cleared.
    pub fn pgn(&self) -> u32 {
        let ps = (self.0 >> 8) & 0xFF;
        let pf = (self.0 >> 16) & 0xFF;
        let dp = (self.0 >> 24) & 0x01;
        let r = (self.0 >> 25) & 0x01;

        if pf >= 240 {
            (r << 17) | (dp << 16) | (pf << 8) | ps
        } else {
            (r << 17) | (dp << 16) | (pf << 8)
        }
    }

    /// Whether the identifier carries an explicit destination.
    pub fn is_pdu1(&self) -> bool {
        ((self.0 >> 16) & 0xFF) < 240
    }

    /// Explicit destination of a PDU1 identifier.
    pub fn destination(&self) -> Option<u8> {
        if self.is_pdu1() {
            Some(((self.0 >> 8) & 0xFF) as u8)
        } else {
            None
        }
    }

    /// Destination with PDU2 identifiers mapped to the global address.
    pub fn destination_or_global(&self) -> u8 {
        self.destination().unwrap_or(GLOBAL_ADDRESS)
    }

    pub fn source_address(&self) -> u8 {
        (self.0 & 0xFF) as u8
    }
}

/// Whether `pgn` is a PDU1 (destination specific) parameter group.
pub fn is_pdu1(pgn: u32) -> bool {
    ((pgn >> 8) & 0xFF) < 240
}

//==================================================================================CAN_ID_BUILDER
#[derive(Debug)]
/// Fluent builder enforcing the PDU1/PDU2 rules.
pub struct CanIdBuilder {
    pub priority: u8,
    pub pgn: u32,
    pub source_address: u8,
    pub destination: Option<u8>,
}

impl CanIdBuilder {
    pub fn new(pgn: u32, source_address: u8) -> Self {
        Self {
            priority: 6,
            pgn,
            source_address,
            destination: None,
        }
    }

    /// Priority, masked to 3 bits.
    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority & 0x07;
        self
    }

    /// Destination address (PDU1 only).
    pub fn to_destination(mut self, destination_address: u8) -> Self {
        self.destination = Some(destination_address);
        self
    }

    /// Build the identifier:
    /// - PF < 240 → PDU1: `destination` mandatory and the PGN's PS byte must be `0`
    /// - PF ≥ 240 → PDU2: `destination` must not be provided
    pub fn build(self) -> Result<CanId, CanIdBuildError> {
        if self.pgn > 0x3_FFFF {
            return Err(CanIdBuildError::InvalidData);
        }
        let r_dp = (self.pgn >> 16) & 0x03;
        let pf = ((self.pgn >> 8) & 0xFF) as u8;
        let ps = (self.pgn & 0xFF) as u8;

        let ps_field = match self.destination {
            None => {
                if pf < 240 {
                    return Err(CanIdBuildError::InvalidForBroadcast);
                }
                ps
            }
            Some(destination) => {
                if pf >= 240 {
                    return Err(CanIdBuildError::InvalidForFocusedMessage { pgn: pf });
                }
                if ps != 0 {
                    return Err(CanIdBuildError::PsFocusMessageMustBeNull);
                }
                destination
            }
        };
        Ok(CanId(
            ((self.priority as u32) << 26)
                | (r_dp << 24)
                | ((pf as u32) << 16)
                | ((ps_field as u32) << 8)
                | (self.source_address as u32),
        ))
    }
}
