//! PGN codec: bit cursors, the descriptor-driven engine and heap-backed
//! decoded records.
pub mod bits;
pub mod engine;
pub mod record;

pub use engine::{pack, packed_len, unpack_into, variable_count, RecordRef};
pub use record::PgnRecord;
