//! Arena allocator tests: splitting, coalescing, accounting and misuse.
use super::*;
use alloc::vec;
use alloc::vec::Vec;
use embassy_sync::blocking_mutex::raw::NoopRawMutex;

fn arena(len: usize) -> &'static mut [u8] {
    vec![0u8; len].leak()
}

fn installed(len: usize) -> HeapAllocator {
    let mut heap = HeapAllocator::new();
    heap.install(arena(len)).unwrap();
    heap
}

#[test]
/// Install rejects a second arena and arenas too small for one block.
fn test_install_guards() {
    let mut heap = HeapAllocator::new();
    assert_eq!(
        heap.install(arena(0)),
        Err(HeapError::ArenaTooSmall { size: 0 })
    );
    assert_eq!(
        heap.install(arena(8)),
        Err(HeapError::ArenaTooSmall { size: 8 })
    );
    heap.install(arena(64)).unwrap();
    assert_eq!(heap.install(arena(64)), Err(HeapError::AlreadyInstalled));
}

#[test]
/// Without an arena every allocation fails and is counted.
fn test_allocate_without_arena() {
    let mut heap = HeapAllocator::new();
    assert!(heap.allocate(4).is_none());
    assert_eq!(heap.malloc_failures(), 1);
}

#[test]
/// Ten 64-byte requests on 512 bytes: seven fit, the rest fail and are counted.
/// Releasing every other block leaves no two adjacent holes, so 128 bytes fail.
fn test_every_other_release_cannot_serve_large_block() {
    let mut heap = installed(512);
    let mut blocks: Vec<Option<HeapBlock>> = (0..10).map(|_| heap.allocate(64)).collect();

    assert_eq!(blocks.iter().filter(|b| b.is_some()).count(), 7);
    assert_eq!(heap.malloc_failures(), 3);
    assert_eq!(heap.free_low_water(), 0);

    for index in (0..10).step_by(2) {
        if let Some(block) = blocks[index].take() {
            heap.release(block).unwrap();
        }
    }

    assert!(heap.allocate(128).is_none());
    assert_eq!(heap.malloc_failures(), 4);
}

#[test]
/// Releasing the block between two free holes coalesces all three.
fn test_coalescing_serves_large_block() {
    let mut heap = installed(512);
    let mut blocks: Vec<Option<HeapBlock>> = (0..7).map(|_| heap.allocate(64)).collect();

    heap.release(blocks[0].take().unwrap()).unwrap();
    heap.release(blocks[2].take().unwrap()).unwrap();
    assert!(heap.allocate(128).is_none());

    heap.release(blocks[1].take().unwrap()).unwrap();
    let large = heap.allocate(128).expect("three merged blocks hold 128 bytes");
    assert_eq!(large.offset(), UNIT);
    assert_eq!(large.len(), 128);
}

#[test]
/// Free bytes return to the full arena once everything is released.
fn test_free_bytes_accounting() {
    let mut heap = installed(256);
    let full = heap.free_bytes();
    let a = heap.allocate(10).unwrap();
    let b = heap.allocate(30).unwrap();
    assert_eq!(heap.free_bytes(), full - (3 + 5) * UNIT);
    assert_eq!(heap.live_blocks(), 2);

    heap.release(b).unwrap();
    heap.release(a).unwrap();
    assert_eq!(heap.free_bytes(), full);
    assert_eq!(heap.free_low_water(), full - 8 * UNIT);
    assert_eq!(heap.live_blocks(), 0);
}

#[test]
/// Releasing out of address order still merges back into one block.
fn test_release_out_of_order_merges() {
    let mut heap = installed(256);
    let a = heap.allocate(8).unwrap();
    let b = heap.allocate(8).unwrap();
    let c = heap.allocate(8).unwrap();
    heap.release(c).unwrap();
    heap.release(a).unwrap();
    heap.release(b).unwrap();

    let whole = heap.allocate(256 - UNIT).expect("arena fully coalesced");
    assert_eq!(whole.offset(), UNIT);
}

#[test]
/// Forged or already released blocks are refused.
fn test_release_invalid_block() {
    let mut heap = installed(128);
    let a = heap.allocate(8).unwrap();
    let offset = a.offset();
    heap.release(a).unwrap();

    assert_eq!(
        heap.release(HeapBlock::forged(offset, 8)),
        Err(HeapError::InvalidBlock { offset })
    );
    assert_eq!(
        heap.release(HeapBlock::forged(3, 8)),
        Err(HeapError::InvalidBlock { offset: 3 })
    );
}

#[test]
/// A damaged header is reported as corruption and recorded as a fault.
fn test_corrupted_header_detected() {
    let mut heap = installed(128);
    let a = heap.allocate(8).unwrap();
    let unit = a.offset() / UNIT - 1;
    // Size larger than the arena.
    heap.write_header(unit as u32, 1_000, IN_USE_TAG);

    assert!(matches!(heap.release(a), Err(HeapError::Corrupted { .. })));
    assert!(matches!(heap.take_fault(), Some(HeapError::Corrupted { .. })));
}

#[test]
/// Destroy refuses while blocks are live, then hands the arena back.
fn test_destroy() {
    let mut heap = installed(64);
    let a = heap.allocate(4).unwrap();
    assert_eq!(heap.destroy(), Err(HeapError::BlocksInUse { count: 1 }));
    heap.release(a).unwrap();
    let raw = heap.destroy().unwrap();
    assert_eq!(raw.len(), 64);
    assert!(!heap.is_installed());
    assert!(heap.allocate(4).is_none());
}

#[test]
/// Disjoint views map to the right blocks regardless of argument order.
fn test_disjoint_views() {
    let mut heap = installed(256);
    let a = heap.allocate(4).unwrap();
    let b = heap.allocate(4).unwrap();
    {
        let [second, first] = heap.disjoint_mut([&b, &a]).unwrap();
        first.copy_from_slice(&[1, 2, 3, 4]);
        second.copy_from_slice(&[5, 6, 7, 8]);
    }
    assert_eq!(heap.bytes(&a).unwrap(), &[1, 2, 3, 4]);
    assert_eq!(heap.bytes(&b).unwrap(), &[5, 6, 7, 8]);
    assert!(heap.disjoint_mut([&a, &a]).is_err());
}

#[test]
/// HeapBox releases its block when dropped.
fn test_heap_box_releases_on_drop() {
    let heap = shared_heap::<NoopRawMutex>(installed(128));
    let full = with_heap(&heap, |h| h.free_bytes());
    {
        let mut boxed = HeapBox::new(&heap, 16).unwrap();
        boxed.with_mut(|bytes| bytes.fill(0xAB)).unwrap();
        assert_eq!(boxed.with(|bytes| bytes[15]).unwrap(), 0xAB);
        assert!(with_heap(&heap, |h| h.free_bytes()) < full);
    }
    assert_eq!(with_heap(&heap, |h| h.free_bytes()), full);
}
