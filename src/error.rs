//! Error definitions shared across library modules.
//! Each type models a specific failure scenario (arena management, codec,
//! transport, address claiming, platform persistence, etc.).
use crate::core::Part;
use thiserror_no_std::Error;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
/// Errors that can occur while building a 29-bit CAN identifier.
pub enum CanIdBuildError {
    /// Provided parameters do not produce a valid identifier.
    #[error("Invalid data")]
    InvalidData,
    /// Attempt to build a broadcast message (PDU2) with PF < 240.
    #[error("Invalid for broadcast message: PF is too low")]
    InvalidForBroadcast,
    /// Attempt to send an addressed message (PDU1) with PF ≥ 240.
    #[error("Invalid for addressed message: PF is too high: {pgn}")]
    InvalidForFocusedMessage { pgn: u8 },
    /// In PDU1 the lower 8 bits of the PGN must remain zero.
    #[error("PDU1 PGNs require PS = 0")]
    PsFocusMessageMustBeNull,
}

//==================================================================================HEAP_ERROR
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
/// Arena allocator failures.
pub enum HeapError {
    /// `install` was called while an arena is already attached.
    #[error("An arena is already installed")]
    AlreadyInstalled,
    /// The arena cannot hold a single block.
    #[error("Arena too small: {size} bytes")]
    ArenaTooSmall { size: usize },
    /// No arena attached.
    #[error("No arena installed")]
    NotInstalled,
    /// The block does not belong to this arena or is not allocated.
    #[error("Invalid block at offset {offset}")]
    InvalidBlock { offset: usize },
    /// A block header or the free list is damaged. Fatal.
    #[error("Heap corrupted near offset {offset}")]
    Corrupted { offset: usize },
    /// `destroy` refused because allocations are still live.
    #[error("{count} blocks still in use")]
    BlocksInUse { count: usize },
}

//================================================================================CODEC_ERROR
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
/// Configuration errors detected while validating a message descriptor.
pub enum DescriptorError {
    /// Field record size is inconsistent with its kind, or lies outside the record.
    #[error("Field/record size mismatch for {field}")]
    RecordSizeMismatch { field: &'static str },
    /// Field bits lie outside the declared wire length.
    #[error("Field {field} overflows the wire part")]
    WireOverflow { field: &'static str },
    /// Width is zero or too large for the kind.
    #[error("Invalid width for {field}")]
    BadWidth { field: &'static str },
    /// Strings must start on a byte boundary.
    #[error("Field {field} must be byte aligned")]
    Unaligned { field: &'static str },
    /// A variable part with a zero wire length can never be counted.
    #[error("Variable part has a zero wire length")]
    EmptyVariablePart,
    /// Group-function selector lies outside the fixed part.
    #[error("Group function selector outside the fixed part")]
    GroupFunctionOutOfRange,
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
/// Issues encountered while serializing a record into a buffer.
pub enum SerializationError {
    /// The record given for a part is smaller than the descriptor expects.
    #[error("Record too small for {part:?} part: need {needed}, got {got}")]
    RecordTooSmall { part: Part, needed: usize, got: usize },
    /// Provided buffer is too small for the payload.
    #[error("Buffer too small for {part:?} part: need {needed}, available {available}")]
    BufferTooSmall {
        part: Part,
        needed: usize,
        available: usize,
    },
    /// Extras were supplied for a message without a variable part.
    #[error("Message has no variable part")]
    NoVariablePart,
    /// Failed while writing bits into the output buffer.
    #[error("BitWrite error: {0}")]
    BitWrite(#[from] BitWriterError),
    /// The record lives in the arena and could not be read.
    #[error("Heap error: {0}")]
    Heap(#[from] HeapError),
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
/// Errors raised while deserializing a wire buffer into a record.
pub enum DeserializationError {
    /// Payload size does not match the descriptor.
    #[error("Invalid data length: {len}")]
    InvalidDataLength { len: usize },
    /// Output record is smaller than the descriptor expects.
    #[error("Record too small for {part:?} part: need {needed}, got {got}")]
    RecordTooSmall { part: Part, needed: usize, got: usize },
    /// Record storage could not be allocated from the arena.
    #[error("Out of memory: {requested} bytes")]
    OutOfMemory { requested: usize },
    /// Arena access failed.
    #[error("Heap error: {0}")]
    Heap(#[from] HeapError),
    /// Bit-level access on the buffer failed.
    #[error("BitReader error: {0}")]
    BitRead(#[from] BitReaderError),
}

//==================================================================================BITREADER_ERRORS
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
/// Errors raised during bitwise buffer reads.
pub enum BitReaderError {
    /// Attempted to read past the end of the buffer.
    #[error("Attempted to read out of bounds -> asked: {asked}, available: {available}")]
    OutOfBounds { asked: usize, available: usize },
    /// Requested more bits than the target type can hold.
    #[error("Cannot read more than {max} bits. Requested: {asked}")]
    TooLongForType { max: u8, asked: u8 },
    /// Cursor is not aligned on a byte boundary when required.
    #[error("Non aligned bit. Cursor: {cursor}")]
    NonAlignedBit { cursor: usize },
}
//==================================================================================BITWRITER_ERRORS
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
/// Errors raised during bitwise writes into a buffer.
pub enum BitWriterError {
    /// Attempted to write beyond the provided capacity.
    #[error("Attempted to write out of bounds -> asked: {asked}, available: {available}")]
    OutOfBounds { asked: usize, available: usize },
    /// Field is too large for the provided type.
    #[error("Cannot write more than {max} bits. Requested: {asked}")]
    TooLongForType { max: u8, asked: u8 },
    /// Cursor is not aligned on a byte boundary when the operation requires it.
    #[error("Non aligned bit. Cursor: {cursor}")]
    NonAlignedBit { cursor: usize },
}

//==================================================================================CATALOG_ERROR
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
/// Catalogue construction failures.
pub enum CatalogError {
    /// Entries are not sorted by `(pgn, group function)`.
    #[error("Catalogue not sorted at index {index}")]
    Unsorted { index: usize },
    /// Two entries share the same key.
    #[error("Duplicate catalogue entry for PGN {pgn}")]
    Duplicate { pgn: u32 },
    /// Two entries share a fast-packet sequence class.
    #[error("Fast packet class {class} used twice")]
    DuplicateFastPacketClass { class: u8 },
    /// Fast-packet class id outside the supported range.
    #[error("Fast packet class {class} out of range")]
    FastPacketClassOutOfRange { class: u8 },
    /// Descriptor of an entry is invalid.
    #[error("Invalid descriptor for PGN {pgn}: {error}")]
    Descriptor { pgn: u32, error: DescriptorError },
}

//==================================================================================TIMER_ERROR
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
/// Timer table failures.
pub enum TimerError {
    /// Table is at capacity; insertion fails closed.
    #[error("Timer table full")]
    Full,
    /// "No change" requested for a timer that does not exist.
    #[error("Timer not found")]
    NotFound,
}

//==================================================================================CLAIM_ERROR
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
/// Errors encountered while claiming or defending an address.
pub enum ClaimError {
    /// The state machine received an event it cannot explain. Fatal.
    #[error("Address claim state inconsistent")]
    InconsistentState,
    /// No free address was available in the configured range.
    #[error("No address available")]
    NoAddressAvailable,
    /// Unable to build the CAN identifier.
    #[error(transparent)]
    BuildErr(#[from] CanIdBuildError),
}

//==================================================================================SEND_ERROR
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
/// Errors encountered when sending a PGN (pack + frame + queue).
pub enum SendError {
    /// PGN not present in the catalogue.
    #[error("Unknown PGN {pgn}")]
    UnknownPgn { pgn: u32 },
    /// Catalogue entry lacks the transmit capability.
    #[error("PGN {pgn} is not transmittable")]
    NotTransmittable { pgn: u32 },
    /// The node has not claimed an address yet.
    #[error("Node is not online")]
    NotOnline,
    /// Payload exceeds the largest transport.
    #[error("Payload too large: {len}")]
    TooLarge { len: usize },
    /// Arena could not hold the packed payload.
    #[error("Out of memory")]
    OutOfMemory,
    /// Outbound frame queue cannot take the whole message.
    #[error("Outbound queue full")]
    QueueFull,
    /// No segmented-transfer session slot is available.
    #[error("Transport session busy")]
    SessionBusy,
    /// PGN serialization failed.
    #[error("Serialization failed: {0}")]
    Serialization(#[from] SerializationError),
    /// CAN identifier could not be built.
    #[error("Frame build failed: {0}")]
    Build(#[from] CanIdBuildError),
}

//==================================================================================PLATFORM_ERROR
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
/// Failures reported by the platform persistence layer.
pub enum PlatformError {
    /// Stored blob has a different size than requested.
    #[error("Blob size mismatch: expected {expected}, found {found}")]
    SizeMismatch { expected: usize, found: usize },
    /// Nothing stored for this parameter / layer.
    #[error("Parameter not found")]
    NotFound,
    /// Storage medium failed.
    #[error("Storage failure")]
    Storage,
}

//==================================================================================CONFIG_ERROR
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
/// Invalid stack configuration.
pub enum ConfigError {
    /// Tick period must be at least one millisecond.
    #[error("Tick period must be non-zero")]
    ZeroTick,
    /// Address range is empty or reaches the reserved addresses.
    #[error("Invalid address range {low}..={high}")]
    InvalidAddressRange { low: u8, high: u8 },
    /// Preferred address is reserved (254 or 255).
    #[error("Preferred address {address} is reserved")]
    ReservedAddress { address: u8 },
    /// Node table limit above the compiled capacity.
    #[error("Max nodes {requested} above capacity {capacity}")]
    TooManyNodes { requested: usize, capacity: usize },
    /// CTS window must grant at least one frame.
    #[error("CTS window must be non-zero")]
    ZeroCtsWindow,
    /// At least one frame must be drained per tick.
    #[error("Frames per tick must be non-zero")]
    ZeroFramesPerTick,
}

//==================================================================================STACK_ERROR
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
/// Umbrella error returned by the engine.
pub enum StackError {
    #[error("Heap: {0}")]
    Heap(#[from] HeapError),
    #[error("Claim: {0}")]
    Claim(#[from] ClaimError),
    #[error("Config: {0}")]
    Config(#[from] ConfigError),
    #[error("Catalog: {0}")]
    Catalog(#[from] CatalogError),
    #[error("Platform: {0}")]
    Platform(#[from] PlatformError),
    #[error("Send: {0}")]
    Send(#[from] SendError),
    #[error("Timer: {0}")]
    Timer(#[from] TimerError),
}

impl StackError {
    /// Conditions the host must treat as fatal: heap corruption and an
    /// inconsistent address-claim state.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            StackError::Heap(HeapError::Corrupted { .. })
                | StackError::Claim(ClaimError::InconsistentState)
        )
    }
}
