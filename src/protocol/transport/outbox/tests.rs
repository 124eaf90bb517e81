use super::*;
use crate::protocol::transport::can_id::CanId;
use alloc::vec::Vec;
use embassy_sync::blocking_mutex::raw::NoopRawMutex;

struct BusyPort {
    accepted: Vec<CanFrame>,
    room: usize,
}

impl FramePort for BusyPort {
    fn receive(&mut self) -> Option<CanFrame> {
        None
    }

    fn transmit(&mut self, frame: CanFrame) -> Result<(), CanFrame> {
        if self.room == 0 {
            return Err(frame);
        }
        self.room -= 1;
        self.accepted.push(frame);
        Ok(())
    }
}

fn frame(tag: u8) -> CanFrame {
    CanFrame::with_data(CanId::builder(130_306, 1).build().unwrap(), &[tag])
}

#[test]
/// A message that does not fit is refused as a whole.
fn test_push_all_is_atomic() {
    let mut outbox: Outbox<NoopRawMutex, 4> = Outbox::new();
    outbox.push_all([frame(1), frame(2), frame(3)]).unwrap();
    assert_eq!(
        outbox.push_all([frame(4), frame(5)]),
        Err(SendError::QueueFull)
    );
    assert_eq!(outbox.len(), 3);
    assert_eq!(outbox.free(), 1);
}

#[test]
/// A frame the driver refuses is retried first, keeping the order.
fn test_drain_holds_refused_frame() {
    let mut outbox: Outbox<NoopRawMutex, 4> = Outbox::new();
    outbox.push_all([frame(1), frame(2), frame(3)]).unwrap();
    let mut port = BusyPort {
        accepted: Vec::new(),
        room: 1,
    };

    assert_eq!(outbox.drain_into(&mut port, 8), 1);
    assert_eq!(outbox.len(), 2);

    port.room = 8;
    assert_eq!(outbox.drain_into(&mut port, 8), 2);
    let tags: Vec<u8> = port.accepted.iter().map(|f| f.data[0]).collect();
    assert_eq!(tags, [1, 2, 3]);
    assert!(outbox.is_empty());
}

#[test]
/// Draining stops at the per-tick budget.
fn test_drain_budget() {
    let mut outbox: Outbox<NoopRawMutex, 4> = Outbox::new();
    outbox.push_all([frame(1), frame(2), frame(3)]).unwrap();
    let mut port = BusyPort {
        accepted: Vec::new(),
        room: 8,
    };
    assert_eq!(outbox.drain_into(&mut port, 2), 2);
    assert_eq!(outbox.pop().map(|f| f.data[0]), Some(3));
}
