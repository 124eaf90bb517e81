//! Builder and assembler working together.
use super::assembler::{FastPacketAssembler, ProcessResult};
use super::builder::FastPacketBuilder;
use super::{SequenceCounters, MAX_FAST_PACKET_PAYLOAD};
use crate::infra::heap::{shared_heap, HeapAllocator};
use crate::protocol::transport::can_id::CanId;
use alloc::vec;
use alloc::vec::Vec;
use embassy_sync::blocking_mutex::raw::NoopRawMutex;

#[test]
/// The maximum payload survives fragmentation and reassembly.
fn test_roundtrip_max_payload() {
    let mut allocator = HeapAllocator::new();
    allocator.install(vec![0u8; 1024].leak()).unwrap();
    let heap = shared_heap::<NoopRawMutex>(allocator);
    let mut assembler: FastPacketAssembler<NoopRawMutex, 2> = FastPacketAssembler::new();

    let original: Vec<u8> = (0..MAX_FAST_PACKET_PAYLOAD as u8).collect();
    let id = CanId::builder(126_996, 42).build().unwrap();
    let mut result = None;
    for frame in FastPacketBuilder::new(id, &original, 3).unwrap().build() {
        if let ProcessResult::MessageComplete(message) =
            assembler.process_frame(&heap, &frame, 5, 0)
        {
            result = Some(message);
        }
    }

    let message = result.expect("complete message");
    assert_eq!(message.len, MAX_FAST_PACKET_PAYLOAD);
    assert_eq!(message.payload.with(|bytes| bytes.to_vec()).unwrap(), original);
}

#[test]
/// Counters roll over per class after seven.
fn test_sequence_counters() {
    let mut counters = SequenceCounters::new();
    let first: Vec<u8> = (0..10).map(|_| counters.next(4)).collect();
    assert_eq!(first, [0, 1, 2, 3, 4, 5, 6, 7, 0, 1]);
    assert_eq!(counters.next(5), 0);
}

#[test]
/// Frame counts for the fast-packet layout.
fn test_frame_count() {
    assert_eq!(super::frame_count(6), 1);
    assert_eq!(super::frame_count(7), 2);
    assert_eq!(super::frame_count(13), 2);
    assert_eq!(super::frame_count(14), 3);
}
