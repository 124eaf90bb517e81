//! Defines the "data contract" between message descriptors (static tables
//! describing each Parameter Group) and the pack/unpack engine that interprets
//! them.
//!
//! A descriptor maps every field twice: once onto the wire (bit offset + width)
//! and once onto the in-memory record (byte offset + size). Numeric values are
//! kept little-endian inside the record so a record is a portable byte image.
use crate::error::DescriptorError;

/// Largest byte string a single [`PgnValue::Bytes`] can carry (fast-packet limit).
pub const MAX_PGN_BYTES: usize = 223;

/// Payload size that always fits in one classic CAN frame.
pub const SINGLE_FRAME_LEN: usize = 8;

/// Semantic type of a field within a PGN.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FieldKind {
    /// Unsigned bit field, `width` bits on the wire (1..=32).
    Bit,
    /// Unsigned byte.
    UChar,
    /// Signed byte.
    SChar,
    /// Unsigned 16-bit word.
    UInt,
    /// Signed 16-bit word.
    SInt,
    /// Unsigned 32-bit long word.
    ULong,
    /// Signed 32-bit long word.
    SLong,
    /// IEEE-754 single precision.
    Float,
    /// IEEE-754 double precision.
    Double,
    /// Fixed-length byte string, `width` bytes on the wire.
    String,
    /// Opaque host reference: occupies record space only, never wire space.
    Pointer,
}

impl FieldKind {
    /// Byte size of numeric kinds, `None` for kinds sized by their descriptor.
    pub const fn byte_size(self) -> Option<usize> {
        match self {
            FieldKind::UChar | FieldKind::SChar => Some(1),
            FieldKind::UInt | FieldKind::SInt => Some(2),
            FieldKind::ULong | FieldKind::SLong | FieldKind::Float => Some(4),
            FieldKind::Double => Some(8),
            FieldKind::Bit | FieldKind::String | FieldKind::Pointer => None,
        }
    }

    /// Whether the kind is sign-extended when read as a value.
    pub const fn is_signed(self) -> bool {
        matches!(self, FieldKind::SChar | FieldKind::SInt | FieldKind::SLong)
    }
}

/// Which half of a message a field or error belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Part {
    Fixed,
    Variable,
}

/// Descriptor for a single field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldDescriptor {
    /// Field identifier used by record accessors.
    pub id: &'static str,
    /// Semantic type.
    pub kind: FieldKind,
    /// Absolute bit offset of the first bit inside the part's wire buffer.
    pub bit_offset: u16,
    /// Width in bits (`Bit`) or bytes (`String`); implied by the kind otherwise.
    pub width: u16,
    /// Byte offset inside the in-memory record.
    pub record_offset: u16,
    /// Byte size inside the in-memory record.
    pub record_size: u16,
}

impl FieldDescriptor {
    /// Numeric field whose width follows from its kind.
    pub const fn number(id: &'static str, kind: FieldKind, bit_offset: u16, record_offset: u16) -> Self {
        let size = match kind.byte_size() {
            Some(size) => size as u16,
            None => 0,
        };
        Self {
            id,
            kind,
            bit_offset,
            width: size * 8,
            record_offset,
            record_size: size,
        }
    }

    /// Bit field of `width` bits stored in `record_size` bytes (1, 2 or 4).
    pub const fn bits(
        id: &'static str,
        bit_offset: u16,
        width: u16,
        record_offset: u16,
        record_size: u16,
    ) -> Self {
        Self {
            id,
            kind: FieldKind::Bit,
            bit_offset,
            width,
            record_offset,
            record_size,
        }
    }

    /// Fixed-length string of `len` bytes.
    pub const fn string(id: &'static str, bit_offset: u16, len: u16, record_offset: u16) -> Self {
        Self {
            id,
            kind: FieldKind::String,
            bit_offset,
            width: len,
            record_offset,
            record_size: len,
        }
    }

    /// Record-only opaque slot.
    pub const fn pointer(id: &'static str, record_offset: u16, record_size: u16) -> Self {
        Self {
            id,
            kind: FieldKind::Pointer,
            bit_offset: 0,
            width: 0,
            record_offset,
            record_size,
        }
    }

    /// Number of bits the field occupies on the wire.
    pub const fn wire_bits(&self) -> usize {
        match self.kind {
            FieldKind::Bit => self.width as usize,
            FieldKind::String => self.width as usize * 8,
            FieldKind::Pointer => 0,
            _ => match self.kind.byte_size() {
                Some(size) => size * 8,
                None => 0,
            },
        }
    }

    fn validate(&self, wire_len: u16, record_size: u16) -> Result<(), DescriptorError> {
        let field = self.id;
        let record_end = self.record_offset as usize + self.record_size as usize;
        if self.record_size == 0 || record_end > record_size as usize {
            return Err(DescriptorError::RecordSizeMismatch { field });
        }
        match self.kind {
            FieldKind::Pointer => return Ok(()),
            FieldKind::Bit => {
                if !(1..=32).contains(&self.width) {
                    return Err(DescriptorError::BadWidth { field });
                }
                if !matches!(self.record_size, 1 | 2 | 4)
                    || (self.width as usize) > self.record_size as usize * 8
                {
                    return Err(DescriptorError::RecordSizeMismatch { field });
                }
            }
            FieldKind::String => {
                if self.width == 0 {
                    return Err(DescriptorError::BadWidth { field });
                }
                if self.bit_offset % 8 != 0 {
                    return Err(DescriptorError::Unaligned { field });
                }
                if self.record_size < self.width {
                    return Err(DescriptorError::RecordSizeMismatch { field });
                }
            }
            kind => {
                if kind.byte_size() != Some(self.record_size as usize) {
                    return Err(DescriptorError::RecordSizeMismatch { field });
                }
            }
        }
        if self.bit_offset as usize + self.wire_bits() > wire_len as usize * 8 {
            return Err(DescriptorError::WireOverflow { field });
        }
        Ok(())
    }
}

/// One half (fixed or repeating) of a message layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartDescriptor {
    /// Bytes occupied on the wire.
    pub wire_len: u16,
    /// Bytes occupied by one record instance.
    pub record_size: u16,
    /// Ordered field list.
    pub fields: &'static [FieldDescriptor],
}

impl PartDescriptor {
    /// Check every field against the part's wire and record sizes.
    pub fn validate(&self) -> Result<(), DescriptorError> {
        self.fields
            .iter()
            .try_for_each(|field| field.validate(self.wire_len, self.record_size))
    }

    /// Look a field up by identifier.
    pub fn field(&self, id: &str) -> Option<&'static FieldDescriptor> {
        self.fields.iter().find(|field| field.id == id)
    }
}

/// Location of the group-function selector inside the fixed wire part.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GroupFunctionField {
    pub bit_offset: u16,
    pub bits: u8,
}

/// Descriptor for an entire message type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageDescriptor {
    /// Part present exactly once.
    pub fixed: PartDescriptor,
    /// Part repeated to fill the remaining payload.
    pub variable: Option<PartDescriptor>,
    /// Default CAN priority (0..=7).
    pub priority: u8,
    /// Secondary selector disambiguating message sub-types.
    pub group_function: Option<GroupFunctionField>,
}

impl MessageDescriptor {
    /// Configuration check run when a catalogue is built.
    pub fn validate(&self) -> Result<(), DescriptorError> {
        self.fixed.validate()?;
        if let Some(variable) = &self.variable {
            if variable.wire_len == 0 || variable.record_size == 0 {
                return Err(DescriptorError::EmptyVariablePart);
            }
            variable.validate()?;
        }
        if let Some(gf) = self.group_function {
            if gf.bits == 0
                || gf.bits > 8
                || gf.bit_offset as usize + gf.bits as usize > self.fixed.wire_len as usize * 8
            {
                return Err(DescriptorError::GroupFunctionOutOfRange);
            }
        }
        Ok(())
    }
}

/// Reserved top-of-range values per field width. The codec never interprets
/// them; presentation layers compare against these constants.
pub mod sentinel {
    pub const U8_NO_DATA: u8 = 0xFF;
    pub const U8_OUT_OF_RANGE: u8 = 0xFE;
    pub const U8_RESERVED: u8 = 0xFD;
    pub const U8_MAX_DATA: u8 = 0xFC;

    pub const U16_NO_DATA: u16 = 0xFFFF;
    pub const U16_OUT_OF_RANGE: u16 = 0xFFFE;
    pub const U16_RESERVED: u16 = 0xFFFD;
    pub const U16_MAX_DATA: u16 = 0xFFFC;

    pub const U32_NO_DATA: u32 = 0xFFFF_FFFF;
    pub const U32_OUT_OF_RANGE: u32 = 0xFFFF_FFFE;
    pub const U32_RESERVED: u32 = 0xFFFF_FFFD;
    pub const U32_MAX_DATA: u32 = 0xFFFF_FFFC;

    pub const I8_NO_DATA: i8 = i8::MAX;
    pub const I8_OUT_OF_RANGE: i8 = i8::MAX - 1;
    pub const I16_NO_DATA: i16 = i16::MAX;
    pub const I16_OUT_OF_RANGE: i16 = i16::MAX - 1;
    pub const I32_NO_DATA: i32 = i32::MAX;
    pub const I32_OUT_OF_RANGE: i32 = i32::MAX - 1;

    /// 24-bit PGN fields.
    pub const PGN_NO_DATA: u32 = 0x00FF_FFFF;
    pub const PGN_OUT_OF_RANGE: u32 = 0x00FF_FFFE;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PgnBytes {
    pub len: usize,
    pub data: [u8; MAX_PGN_BYTES],
}

impl Default for PgnBytes {
    fn default() -> Self {
        Self::new()
    }
}

impl PgnBytes {
    /// Create an empty buffer.
    pub const fn new() -> Self {
        Self {
            len: 0,
            data: [0; MAX_PGN_BYTES],
        }
    }

    /// Number of valid bytes stored.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Checks whether the buffer is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Copy bytes into the buffer and update `len`.
    #[inline]
    pub fn copy_from_slice(&mut self, slice: &[u8]) {
        let clamped = slice.len().min(MAX_PGN_BYTES);
        self.data[..clamped].copy_from_slice(&slice[..clamped]);
        self.len = clamped;
    }

    /// Immutable view over the populated bytes.
    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.data[..self.len]
    }
}

/// A field value read back from a record.
#[derive(Debug, Clone, PartialEq)]
pub enum PgnValue {
    U32(u32),
    U16(u16),
    U8(u8),
    I32(i32),
    I16(i16),
    I8(i8),
    F64(f64),
    F32(f32),
    Bytes(PgnBytes),
    /// Opaque record-only slot.
    Opaque,
}

impl PgnValue {
    /// Unsigned integer value widened to `u32`.
    pub fn as_u32(&self) -> Option<u32> {
        match *self {
            PgnValue::U32(value) => Some(value),
            PgnValue::U16(value) => Some(value.into()),
            PgnValue::U8(value) => Some(value.into()),
            _ => None,
        }
    }
}
