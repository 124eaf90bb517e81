//! Table-driven pack/unpack engine.
//!
//! A message is a fixed part followed by `count` repetitions of an optional
//! variable part. Every field is located by its absolute bit offset inside its
//! part, so the engine seeks instead of walking the layout and fields may be
//! declared in any order. Records are little-endian byte images described by
//! the same descriptors.
use super::bits::{BitReader, BitWriter};
use crate::core::{
    FieldDescriptor, FieldKind, MessageDescriptor, Part, PartDescriptor, PgnBytes, PgnValue,
    SINGLE_FRAME_LEN,
};
use crate::error::{DeserializationError, SerializationError};

/// Borrowed record image handed to [`pack`].
#[derive(Debug, Clone, Copy)]
pub struct RecordRef<'r> {
    /// Fixed record, at least `fixed.record_size` bytes.
    pub fixed: &'r [u8],
    /// `extra_count` variable records laid out back to back.
    pub extras: &'r [u8],
    pub extra_count: usize,
}

impl<'r> RecordRef<'r> {
    /// Record without variable part instances.
    pub const fn fixed(fixed: &'r [u8]) -> Self {
        Self {
            fixed,
            extras: &[],
            extra_count: 0,
        }
    }

    pub const fn with_extras(fixed: &'r [u8], extras: &'r [u8], extra_count: usize) -> Self {
        Self {
            fixed,
            extras,
            extra_count,
        }
    }
}

/// Wire length of a message with `count` variable instances, padded to one
/// full frame.
pub fn packed_len(descriptor: &MessageDescriptor, count: usize) -> usize {
    let variable = descriptor.variable.map_or(0, |part| part.wire_len as usize);
    (descriptor.fixed.wire_len as usize + count * variable).max(SINGLE_FRAME_LEN)
}

/// Serialize `record` into `out` and return the number of bytes to transmit.
///
/// The output is prefilled with `0xFF`: reserved bits and padding read as 1.
pub fn pack(
    descriptor: &MessageDescriptor,
    record: RecordRef<'_>,
    out: &mut [u8],
) -> Result<usize, SerializationError> {
    let fixed = &descriptor.fixed;
    if record.fixed.len() < fixed.record_size as usize {
        return Err(SerializationError::RecordTooSmall {
            part: Part::Fixed,
            needed: fixed.record_size as usize,
            got: record.fixed.len(),
        });
    }

    let count = record.extra_count;
    let variable = match (descriptor.variable.as_ref(), count) {
        (_, 0) => None,
        (None, _) => return Err(SerializationError::NoVariablePart),
        (Some(variable), _) => {
            let needed = count * variable.record_size as usize;
            if record.extras.len() < needed {
                return Err(SerializationError::RecordTooSmall {
                    part: Part::Variable,
                    needed,
                    got: record.extras.len(),
                });
            }
            Some(variable)
        }
    };

    let total = packed_len(descriptor, count);
    if out.len() < total {
        let part = if out.len() < (fixed.wire_len as usize).max(SINGLE_FRAME_LEN) {
            Part::Fixed
        } else {
            Part::Variable
        };
        return Err(SerializationError::BufferTooSmall {
            part,
            needed: total,
            available: out.len(),
        });
    }

    let out = &mut out[..total];
    out.fill(0xFF);
    let mut writer = BitWriter::new(out);

    write_part(&mut writer, 0, fixed, record.fixed)?;
    if let Some(variable) = variable {
        let record_size = variable.record_size as usize;
        for (index, extra) in record.extras.chunks_exact(record_size).take(count).enumerate() {
            let base = (fixed.wire_len as usize + index * variable.wire_len as usize) * 8;
            write_part(&mut writer, base, variable, extra)?;
        }
    }

    #[cfg(feature = "defmt")]
    defmt::trace!("codec: packed {} bytes ({} extras)", total, count);
    Ok(total)
}

/// Number of variable instances carried by a payload of `len` bytes.
pub fn variable_count(
    descriptor: &MessageDescriptor,
    len: usize,
) -> Result<usize, DeserializationError> {
    let fixed = descriptor.fixed.wire_len as usize;
    if len < fixed {
        return Err(DeserializationError::InvalidDataLength { len });
    }
    match descriptor.variable {
        Some(variable) => {
            let rest = len - fixed;
            let var_len = variable.wire_len as usize;
            // Single frames are padded, so a partial trailing instance is tolerated.
            if rest % var_len != 0 && len > SINGLE_FRAME_LEN {
                return Err(DeserializationError::InvalidDataLength { len });
            }
            Ok(rest / var_len)
        }
        None if len == fixed => Ok(0),
        None if len == SINGLE_FRAME_LEN => Ok(0),
        None => Err(DeserializationError::InvalidDataLength { len }),
    }
}

/// Decode `wire` into caller-provided records and return the variable count.
///
/// `fixed_out` is zeroed before decoding, so bytes not covered by a field
/// (and `Pointer` fields) read back as zero.
pub fn unpack_into(
    descriptor: &MessageDescriptor,
    wire: &[u8],
    fixed_out: &mut [u8],
    extras_out: &mut [u8],
) -> Result<usize, DeserializationError> {
    let fixed = &descriptor.fixed;
    let count = variable_count(descriptor, wire.len())?;
    if fixed_out.len() < fixed.record_size as usize {
        return Err(DeserializationError::RecordTooSmall {
            part: Part::Fixed,
            needed: fixed.record_size as usize,
            got: fixed_out.len(),
        });
    }

    let mut reader = BitReader::new(wire);
    let fixed_out = &mut fixed_out[..fixed.record_size as usize];
    fixed_out.fill(0);
    read_part(&mut reader, 0, fixed, fixed_out)?;

    if let (Some(variable), true) = (descriptor.variable.as_ref(), count > 0) {
        let record_size = variable.record_size as usize;
        let needed = count * record_size;
        if extras_out.len() < needed {
            return Err(DeserializationError::RecordTooSmall {
                part: Part::Variable,
                needed,
                got: extras_out.len(),
            });
        }
        for (index, extra) in extras_out[..needed].chunks_exact_mut(record_size).enumerate() {
            extra.fill(0);
            let base = (fixed.wire_len as usize + index * variable.wire_len as usize) * 8;
            read_part(&mut reader, base, variable, extra)?;
        }
    }
    Ok(count)
}

/// Read the group-function selector of a payload, if the message has one.
pub fn read_group_function(descriptor: &MessageDescriptor, wire: &[u8]) -> Option<u8> {
    let selector = descriptor.group_function?;
    let mut reader = BitReader::new(wire);
    reader.seek(selector.bit_offset as usize).ok()?;
    reader.read_u8(selector.bits).ok()
}

/// Read one field out of a record image.
pub fn field_value(field: &FieldDescriptor, record: &[u8]) -> Option<PgnValue> {
    let start = field.record_offset as usize;
    let bytes = record.get(start..start + field.record_size as usize)?;
    let value = match field.kind {
        FieldKind::UChar => PgnValue::U8(bytes[0]),
        FieldKind::SChar => PgnValue::I8(bytes[0] as i8),
        FieldKind::UInt => PgnValue::U16(u16::from_le_bytes(bytes.try_into().ok()?)),
        FieldKind::SInt => PgnValue::I16(i16::from_le_bytes(bytes.try_into().ok()?)),
        FieldKind::ULong => PgnValue::U32(u32::from_le_bytes(bytes.try_into().ok()?)),
        FieldKind::SLong => PgnValue::I32(i32::from_le_bytes(bytes.try_into().ok()?)),
        FieldKind::Float => PgnValue::F32(f32::from_le_bytes(bytes.try_into().ok()?)),
        FieldKind::Double => PgnValue::F64(f64::from_le_bytes(bytes.try_into().ok()?)),
        FieldKind::Bit => match bytes.len() {
            1 => PgnValue::U8(bytes[0]),
            2 => PgnValue::U16(u16::from_le_bytes(bytes.try_into().ok()?)),
            _ => PgnValue::U32(u32::from_le_bytes(bytes.try_into().ok()?)),
        },
        FieldKind::String => {
            let mut text = PgnBytes::new();
            text.copy_from_slice(&bytes[..field.width as usize]);
            PgnValue::Bytes(text)
        }
        FieldKind::Pointer => PgnValue::Opaque,
    };
    Some(value)
}

fn write_part(
    writer: &mut BitWriter<'_>,
    base: usize,
    part: &PartDescriptor,
    record: &[u8],
) -> Result<(), SerializationError> {
    for field in part.fields {
        let start = field.record_offset as usize;
        match field.kind {
            FieldKind::Pointer => continue,
            FieldKind::String => {
                writer.seek(base + field.bit_offset as usize)?;
                writer.write_slice(&record[start..start + field.width as usize])?;
            }
            _ => {
                let mut raw = [0u8; 8];
                let size = field.record_size as usize;
                raw[..size].copy_from_slice(&record[start..start + size]);
                writer.seek(base + field.bit_offset as usize)?;
                writer.write_u64(u64::from_le_bytes(raw), field.wire_bits() as u8)?;
            }
        }
    }
    Ok(())
}

fn read_part(
    reader: &mut BitReader<'_>,
    base: usize,
    part: &PartDescriptor,
    record: &mut [u8],
) -> Result<(), DeserializationError> {
    for field in part.fields {
        let start = field.record_offset as usize;
        let size = field.record_size as usize;
        match field.kind {
            // Host references never travel: the slot stays zeroed.
            FieldKind::Pointer => continue,
            FieldKind::String => {
                reader.seek(base + field.bit_offset as usize)?;
                let text = reader.read_slice(field.width as usize)?;
                record[start..start + text.len()].copy_from_slice(text);
            }
            _ => {
                reader.seek(base + field.bit_offset as usize)?;
                let raw = reader.read_u64(field.wire_bits() as u8)?;
                record[start..start + size].copy_from_slice(&raw.to_le_bytes()[..size]);
            }
        }
    }
    Ok(())
}
