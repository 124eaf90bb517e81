//! In-memory representation of an extended CAN 2.0B frame, convertible to and
//! from any `embedded_can::Frame` driver type.
use embedded_can::{ExtendedId, Frame, Id};

use crate::protocol::transport::can_id::CanId;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
/// Raw frame as exchanged with the bus driver.
pub struct CanFrame {
    /// 29-bit identifier.
    pub id: CanId,
    /// Payload buffer; classic CAN carries at most eight bytes.
    pub data: [u8; 8],
    /// Number of valid payload bytes (DLC, 0 to 8).
    pub len: usize,
}

impl CanFrame {
    /// Frame carrying the first (at most eight) bytes of `data`.
    pub fn with_data(id: CanId, data: &[u8]) -> Self {
        let len = data.len().min(8);
        let mut buffer = [0u8; 8];
        buffer[..len].copy_from_slice(&data[..len]);
        Self {
            id,
            data: buffer,
            len,
        }
    }

    /// Valid payload bytes.
    pub fn payload(&self) -> &[u8] {
        &self.data[..self.len.min(8)]
    }

    /// Convert a driver frame. Standard identifiers and remote frames are not
    /// part of the protocol and yield `None`.
    pub fn from_frame<F: Frame>(frame: &F) -> Option<Self> {
        if frame.is_remote_frame() {
            return None;
        }
        match frame.id() {
            Id::Extended(id) => Some(Self::with_data(CanId(id.as_raw()), frame.data())),
            Id::Standard(_) => None,
        }
    }

    /// Convert into a driver frame.
    pub fn to_frame<F: Frame>(&self) -> Option<F> {
        F::new(self.extended_id(), self.payload())
    }

    fn extended_id(&self) -> ExtendedId {
        ExtendedId::new(self.id.0 & 0x1FFF_FFFF).unwrap_or(ExtendedId::ZERO)
    }
}

impl Frame for CanFrame {
    fn new(id: impl Into<Id>, data: &[u8]) -> Option<Self> {
        if data.len() > 8 {
            return None;
        }
        match id.into() {
            Id::Extended(id) => Some(Self::with_data(CanId(id.as_raw()), data)),
            Id::Standard(_) => None,
        }
    }

    fn new_remote(_id: impl Into<Id>, _dlc: usize) -> Option<Self> {
        None
    }

    fn is_extended(&self) -> bool {
        true
    }

    fn is_remote_frame(&self) -> bool {
        false
    }

    fn id(&self) -> Id {
        Id::Extended(self.extended_id())
    }

    fn dlc(&self) -> usize {
        self.len
    }

    fn data(&self) -> &[u8] {
        self.payload()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embedded_can::StandardId;

    #[test]
    /// Driver frames convert both ways through the extended identifier.
    fn test_embedded_can_conversion() {
        let frame = CanFrame::with_data(CanId(0x18EE_FF80), &[1, 2, 3]);
        let driver: CanFrame = frame.to_frame().unwrap();
        assert_eq!(driver.id(), Id::Extended(ExtendedId::new(0x18EE_FF80).unwrap()));
        assert_eq!(CanFrame::from_frame(&driver), Some(frame));
        assert_eq!(frame.payload(), &[1, 2, 3]);
    }

    #[test]
    /// Standard identifiers and oversized payloads are rejected.
    fn test_rejects_foreign_frames() {
        let standard = StandardId::new(0x123).unwrap();
        assert!(<CanFrame as Frame>::new(standard, &[0]).is_none());
        let extended = ExtendedId::new(1).unwrap();
        assert!(<CanFrame as Frame>::new(extended, &[0; 9]).is_none());
    }
}
