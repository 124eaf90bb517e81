//! Low-level building blocks: the bounded arena allocator, fixed-capacity
//! slot tables, the bit-level codec, and diagnostic counters.
pub mod codec;
pub mod heap;
pub mod slots;
pub mod stats;
