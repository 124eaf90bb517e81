//! Decoded message records stored in the arena.
use embassy_sync::blocking_mutex::raw::RawMutex;

use super::engine::{self, RecordRef};
use crate::core::{MessageDescriptor, PgnValue};
use crate::error::{DeserializationError, HeapError, SerializationError};
use crate::infra::heap::{with_heap, HeapAllocator, HeapBlock, HeapBox, SharedHeap};

/// Where the wire bytes of a decode come from.
enum Wire<'a> {
    Slice(&'a [u8]),
    Block(&'a HeapBlock, usize),
}

/// Fixed record plus the optional array of variable records, both heap backed.
/// Blocks go back to the arena when the record is dropped.
pub struct PgnRecord<M: RawMutex> {
    descriptor: &'static MessageDescriptor,
    fixed: HeapBox<M>,
    extras: Option<HeapBox<M>>,
    extra_count: usize,
}

impl<M: RawMutex> PgnRecord<M> {
    /// Decode a payload held in a plain buffer.
    pub fn decode(
        heap: &SharedHeap<M>,
        descriptor: &'static MessageDescriptor,
        wire: &[u8],
    ) -> Result<Self, DeserializationError> {
        Self::decode_from(heap, descriptor, Wire::Slice(wire), wire.len())
    }

    /// Decode the first `len` bytes of a heap-resident payload (a reassembled
    /// transport buffer) without copying it out of the arena.
    pub fn decode_block(
        heap: &SharedHeap<M>,
        descriptor: &'static MessageDescriptor,
        payload: &HeapBox<M>,
        len: usize,
    ) -> Result<Self, DeserializationError> {
        let block = payload.block().ok_or(HeapError::NotInstalled)?;
        if len > block.len() {
            return Err(DeserializationError::InvalidDataLength { len });
        }
        Self::decode_from(heap, descriptor, Wire::Block(block, len), len)
    }

    fn decode_from(
        heap: &SharedHeap<M>,
        descriptor: &'static MessageDescriptor,
        wire: Wire<'_>,
        len: usize,
    ) -> Result<Self, DeserializationError> {
        let count = engine::variable_count(descriptor, len)?;
        let fixed_len = descriptor.fixed.record_size as usize;
        let extras_len = descriptor
            .variable
            .map_or(0, |part| part.record_size as usize * count);

        // Allocation and unpacking share one lock; blocks are wrapped in
        // `HeapBox` only once it is released.
        let (fixed, extras) = with_heap(heap, |allocator| {
            allocate_and_unpack(allocator, descriptor, wire, fixed_len, extras_len)
        })?;

        Ok(Self {
            descriptor,
            fixed: HeapBox::from_block(heap.clone(), fixed),
            extras: extras.map(|block| HeapBox::from_block(heap.clone(), block)),
            extra_count: count,
        })
    }

    pub fn descriptor(&self) -> &'static MessageDescriptor {
        self.descriptor
    }

    /// Number of variable-part instances.
    pub fn extra_count(&self) -> usize {
        self.extra_count
    }

    /// Value of a fixed-part field.
    pub fn value(&self, field_id: &str) -> Option<PgnValue> {
        let field = self.descriptor.fixed.field(field_id)?;
        self.fixed
            .with(|bytes| engine::field_value(field, bytes))
            .ok()
            .flatten()
    }

    /// Value of a field of the `index`-th variable instance.
    pub fn extra_value(&self, index: usize, field_id: &str) -> Option<PgnValue> {
        let variable = self.descriptor.variable.as_ref()?;
        let field = variable.field(field_id)?;
        if index >= self.extra_count {
            return None;
        }
        let size = variable.record_size as usize;
        self.extras
            .as_ref()?
            .with(|bytes| engine::field_value(field, &bytes[index * size..(index + 1) * size]))
            .ok()
            .flatten()
    }

    /// Read the fixed record image.
    pub fn with_fixed<R>(&self, f: impl FnOnce(&[u8]) -> R) -> Result<R, HeapError> {
        self.fixed.with(f)
    }

    /// Read the variable records image (empty when there are none).
    pub fn with_extras<R>(&self, f: impl FnOnce(&[u8]) -> R) -> Result<R, HeapError> {
        match &self.extras {
            Some(extras) => extras.with(f),
            None => Ok(f(&[])),
        }
    }

    /// Pack the record back onto the wire.
    pub fn encode(&self, out: &mut [u8]) -> Result<usize, SerializationError> {
        let fixed = self.fixed.block().ok_or(HeapError::NotInstalled)?;
        let extras = self.extras.as_ref().and_then(HeapBox::block);
        with_heap(self.fixed.heap(), |allocator| -> Result<usize, SerializationError> {
            let fixed = allocator.bytes(fixed)?;
            let extras = match extras {
                Some(block) => allocator.bytes(block)?,
                None => &[],
            };
            engine::pack(
                self.descriptor,
                RecordRef::with_extras(fixed, extras, self.extra_count),
                out,
            )
        })
    }
}

impl<M: RawMutex> core::fmt::Debug for PgnRecord<M> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PgnRecord")
            .field("fixed", &self.fixed)
            .field("extra_count", &self.extra_count)
            .finish()
    }
}

fn allocate_and_unpack(
    allocator: &mut HeapAllocator,
    descriptor: &MessageDescriptor,
    wire: Wire<'_>,
    fixed_len: usize,
    extras_len: usize,
) -> Result<(HeapBlock, Option<HeapBlock>), DeserializationError> {
    let fixed = allocator
        .allocate(fixed_len)
        .ok_or(DeserializationError::OutOfMemory {
            requested: fixed_len,
        })?;
    let extras = match extras_len {
        0 => None,
        len => match allocator.allocate(len) {
            Some(block) => Some(block),
            None => {
                allocator.release(fixed)?;
                return Err(DeserializationError::OutOfMemory { requested: len });
            }
        },
    };

    match unpack_blocks(allocator, descriptor, wire, &fixed, extras.as_ref()) {
        Ok(_) => Ok((fixed, extras)),
        Err(error) => {
            allocator.release(fixed)?;
            if let Some(extras) = extras {
                allocator.release(extras)?;
            }
            Err(error)
        }
    }
}

fn unpack_blocks(
    allocator: &mut HeapAllocator,
    descriptor: &MessageDescriptor,
    wire: Wire<'_>,
    fixed: &HeapBlock,
    extras: Option<&HeapBlock>,
) -> Result<usize, DeserializationError> {
    match (wire, extras) {
        (Wire::Slice(wire), None) => {
            let fixed = allocator.bytes_mut(fixed)?;
            engine::unpack_into(descriptor, wire, fixed, &mut [])
        }
        (Wire::Slice(wire), Some(extras)) => {
            let [fixed, extras] = allocator.disjoint_mut([fixed, extras])?;
            engine::unpack_into(descriptor, wire, fixed, extras)
        }
        (Wire::Block(payload, len), None) => {
            let [wire, fixed] = allocator.disjoint_mut([payload, fixed])?;
            engine::unpack_into(descriptor, &wire[..len], fixed, &mut [])
        }
        (Wire::Block(payload, len), Some(extras)) => {
            let [wire, fixed, extras] = allocator.disjoint_mut([payload, fixed, extras])?;
            engine::unpack_into(descriptor, &wire[..len], fixed, extras)
        }
    }
}
