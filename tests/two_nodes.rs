//! Two stacks sharing a bus: address contention, then fast-packet and
//! segmented transfers between them.
mod helpers;

use embassy_sync::blocking_mutex::raw::NoopRawMutex;
use embassy_sync::channel::Channel;
use helpers::{build_stack, MockCanBus, MockTimer, SharedPlatform, DIRECT, TRACK};
use korri_stack::engine::runner::{forward_into, StackCommand, StackRunner};
use korri_stack::infra::codec::engine::RecordRef;
use korri_stack::protocol::managment::iso_name::IsoName;
use korri_stack::protocol::managment::node_table::NodeEvent;
use korri_stack::protocol::router::envelope::Envelope;
use korri_stack::protocol::router::outbound::OutboundRequest;
use korri_stack::protocol::transport::can_id::GLOBAL_ADDRESS;
use static_cell::StaticCell;
use tokio::time::Duration;

/// Lower NAME, wins the contention for 128.
const STRONG: IsoName = IsoName::from_raw(0x8000_0000_0000_0100);
const WEAK: IsoName = IsoName::from_raw(0x8000_0000_0000_0900);

static ARENA_A: StaticCell<[u8; 8192]> = StaticCell::new();
static ARENA_B: StaticCell<[u8; 8192]> = StaticCell::new();

type Inbox = Channel<NoopRawMutex, Envelope<NoopRawMutex>, 8>;

#[tokio::test]
/// The weaker node moves to 129; records then flow from A to B.
async fn contention_then_transfers() {
    let log_a = SharedPlatform::default();
    let log_b = SharedPlatform::default();
    let stack_a = build_stack(ARENA_A.init([0; 8192]), STRONG, log_a.clone());
    let mut stack_b = build_stack(ARENA_B.init([0; 8192]), WEAK, log_b.clone());

    let inbox: &'static Inbox = Box::leak(Box::new(Channel::new()));
    stack_b.router_mut().set_fallback(forward_into(inbox));

    let commands: Channel<NoopRawMutex, StackCommand, 4> = Channel::new();
    let (bus_a, bus_b) = MockCanBus::create_pair();
    let runner_a = StackRunner::new(stack_a, bus_a, MockTimer, Some(&commands));
    let handle = runner_a.handle().expect("handle exists with a command channel");
    let runner_b: StackRunner<'_, _, _, _, _, NoopRawMutex, 1> = StackRunner::new(stack_b, bus_b, MockTimer, None);
    let mut drive_a = core::pin::pin!(runner_a.drive());
    let mut drive_b = core::pin::pin!(runner_b.drive());

    tokio::select! {
        result = &mut drive_a => panic!("node A ended: {:?}", result),
        result = &mut drive_b => panic!("node B ended: {:?}", result),
        _ = async {
            tokio::time::sleep(Duration::from_millis(600)).await;
            assert!(log_a.0.borrow().nodes.contains(&(NodeEvent::NewNode, 129)));
            assert!(log_b.0.borrow().nodes.contains(&(NodeEvent::NewNode, 128)));

            let track: Vec<u8> = (1..=20).collect();
            handle
                .send(&OutboundRequest::new(TRACK, GLOBAL_ADDRESS, RecordRef::fixed(&track)))
                .await;
            let envelope = inbox.receive().await;
            assert_eq!(envelope.pgn(), TRACK);
            assert_eq!(envelope.source(), 128);
            let received = envelope.record().with_fixed(|bytes| bytes.to_vec()).unwrap();
            assert_eq!(received, track);
            drop(envelope);

            let bulk: Vec<u8> = (0..40).collect();
            handle
                .send(&OutboundRequest::new(DIRECT, 129, RecordRef::fixed(&bulk)))
                .await;
            let envelope = tokio::time::timeout(Duration::from_secs(2), inbox.receive())
                .await
                .expect("segmented transfer must complete");
            assert_eq!(envelope.pgn(), DIRECT);
            assert_eq!(envelope.destination(), 129);
            let received = envelope.record().with_fixed(|bytes| bytes.to_vec()).unwrap();
            assert_eq!(received, bulk);

            assert!(log_a.0.borrow().errors.is_empty());
            assert!(log_b.0.borrow().errors.is_empty());
        } => {}
    }
}
