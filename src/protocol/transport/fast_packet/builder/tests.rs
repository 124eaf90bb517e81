//! Fast-packet frame generation.
use super::*;
use alloc::vec::Vec;

fn id() -> CanId {
    CanId::builder(129_029, 42).with_priority(3).build().unwrap()
}

#[test]
/// A ten-byte payload spans two padded frames.
fn test_builder_two_frames() {
    let payload = [1, 2, 3, 4, 5, 6, 7, 8, 9, 10];
    let frames: Vec<CanFrame> = FastPacketBuilder::new(id(), &payload, 5)
        .unwrap()
        .build()
        .collect();

    assert_eq!(frames.len(), 2);
    assert_eq!(frames[0].data, [0xA0, 10, 1, 2, 3, 4, 5, 6]);
    assert_eq!(frames[1].data, [0xA1, 7, 8, 9, 10, 0xFF, 0xFF, 0xFF]);
    assert!(frames.iter().all(|frame| frame.len == 8 && frame.id == id()));
}

#[test]
/// Short payloads still use fast-packet framing.
fn test_builder_short_payload() {
    let frames: Vec<CanFrame> = FastPacketBuilder::new(id(), &[0xAB; 4], 0)
        .unwrap()
        .build()
        .collect();
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].data, [0x00, 4, 0xAB, 0xAB, 0xAB, 0xAB, 0xFF, 0xFF]);
}

#[test]
/// The maximum payload needs 32 frames, indices 0 to 31.
fn test_builder_max_payload() {
    let payload = [0x5A; MAX_FAST_PACKET_PAYLOAD];
    let frames: Vec<CanFrame> = FastPacketBuilder::new(id(), &payload, 7)
        .unwrap()
        .build()
        .collect();
    assert_eq!(frames.len(), super::super::frame_count(MAX_FAST_PACKET_PAYLOAD));
    assert_eq!(frames.len(), 32);
    assert_eq!(frames[31].data[0], 0xFF);
    assert_eq!(frames[31].data[1..], [0x5A; 7]);
}

#[test]
/// Oversized and empty payloads are refused.
fn test_builder_rejects_bad_sizes() {
    assert_eq!(
        FastPacketBuilder::new(id(), &[0; 224], 0).unwrap_err(),
        SendError::TooLarge { len: 224 }
    );
    assert!(FastPacketBuilder::new(id(), &[], 0).is_err());
}
