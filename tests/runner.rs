//! The async runner against a scripted peer on an in-memory bus.
mod helpers;

use embassy_sync::blocking_mutex::raw::NoopRawMutex;
use embassy_sync::channel::Channel;
use helpers::{build_sized, build_stack, MockCanBus, MockTimer, SharedPlatform, LEVEL_PGN};
use korri_stack::engine::platform::{ConfigLayer, NetworkState, ParamType};
use korri_stack::engine::runner::{StackCommand, StackRunner};
use korri_stack::infra::codec::engine::RecordRef;
use korri_stack::protocol::catalog::pgn;
use korri_stack::protocol::managment::address_claiming::ClaimState;
use korri_stack::protocol::managment::iso_name::IsoName;
use korri_stack::protocol::router::outbound::OutboundRequest;
use korri_stack::protocol::transport::can_frame::CanFrame;
use korri_stack::protocol::transport::can_id::{CanId, GLOBAL_ADDRESS};
use korri_stack::protocol::transport::traits::can_bus::CanBus;
use static_cell::StaticCell;
use tokio::time::Duration;

const NAME: IsoName = IsoName::from_raw(0x8000_0000_0000_0500);
const HOST: u8 = 0x10;

static CLAIM_ARENA: StaticCell<[u8; 4096]> = StaticCell::new();
static REQUEST_ARENA: StaticCell<[u8; 4096]> = StaticCell::new();
static SIZED_ARENA: StaticCell<[u8; 4096]> = StaticCell::new();

/// Next frame of `pgn` sent by the device, skipping anything else.
async fn next_of(host_bus: &mut MockCanBus, pgn: u32) -> CanFrame {
    loop {
        let frame = host_bus.recv().await.expect("device frame expected");
        if frame.id.pgn() == pgn {
            return frame;
        }
    }
}

#[tokio::test]
/// The runner claims, persists the address and sends queued records.
async fn runner_claims_and_sends() {
    let platform = SharedPlatform::default();
    let stack = build_stack(CLAIM_ARENA.init([0; 4096]), NAME, platform.clone());
    let commands: Channel<NoopRawMutex, StackCommand, 4> = Channel::new();
    let (dut_bus, mut host_bus) = MockCanBus::create_pair();
    let runner = StackRunner::new(stack, dut_bus, MockTimer, Some(&commands));
    let handle = runner.handle().expect("handle exists with a command channel");
    let mut runner_future = core::pin::pin!(runner.drive());

    tokio::select! {
        result = &mut runner_future => {
            panic!("runner ended unexpectedly: {:?}", result);
        }
        _ = async {
            let claim = next_of(&mut host_bus, pgn::ADDRESS_CLAIM).await;
            assert_eq!(claim.id.source_address(), 128);
            assert_eq!(claim.payload(), &NAME.to_claim());

            tokio::time::sleep(Duration::from_millis(400)).await;
            {
                let log = platform.0.borrow();
                assert!(log.states.contains(&NetworkState::Claim(ClaimState::Online)));
                let address = log
                    .store
                    .iter()
                    .find(|(param, layer, _)| *param == ParamType::Address && *layer == ConfigLayer::User)
                    .map(|(_, _, blob)| blob.clone());
                assert_eq!(address, Some(vec![128]));
            }

            let record = [0x2A, 0x00];
            handle
                .send(&OutboundRequest::new(LEVEL_PGN, GLOBAL_ADDRESS, RecordRef::fixed(&record)))
                .await;
            let level = next_of(&mut host_bus, LEVEL_PGN).await;
            assert_eq!(level.id.source_address(), 128);
            assert_eq!(&level.payload()[..2], &record);
        } => {}
    }
}

#[tokio::test]
/// A request for the address claim is answered while running.
async fn runner_answers_claim_request() {
    let platform = SharedPlatform::default();
    let stack = build_stack(REQUEST_ARENA.init([0; 4096]), NAME, platform.clone());
    let (dut_bus, mut host_bus) = MockCanBus::create_pair();
    let runner: StackRunner<'_, _, _, _, _, NoopRawMutex, 1> = StackRunner::new(stack, dut_bus, MockTimer, None);
    let mut runner_future = core::pin::pin!(runner.drive());

    tokio::select! {
        result = &mut runner_future => {
            panic!("runner ended unexpectedly: {:?}", result);
        }
        _ = async {
            next_of(&mut host_bus, pgn::ADDRESS_CLAIM).await;
            tokio::time::sleep(Duration::from_millis(400)).await;

            let id = CanId::for_message(pgn::ISO_REQUEST, 6, HOST, GLOBAL_ADDRESS).unwrap();
            let requested = pgn::ADDRESS_CLAIM.to_le_bytes();
            host_bus.send(&CanFrame::with_data(id, &requested[..3])).await.unwrap();

            let answer = next_of(&mut host_bus, pgn::ADDRESS_CLAIM).await;
            assert_eq!(answer.id.source_address(), 128);
            assert!(platform.0.borrow().errors.is_empty());
        } => {}
    }
}

#[tokio::test]
/// A stack with its own table sizes runs and takes commands like any other.
async fn runner_drives_resized_stack() {
    let platform = SharedPlatform::default();
    let stack = build_sized::<2, 1, 8>(SIZED_ARENA.init([0; 4096]), NAME, platform.clone());
    let commands: Channel<NoopRawMutex, StackCommand, 4> = Channel::new();
    let (dut_bus, mut host_bus) = MockCanBus::create_pair();
    let mut runner = StackRunner::new(stack, dut_bus, MockTimer, Some(&commands));
    assert_eq!(runner.stack_mut().nodes().max_nodes(), 8);
    let handle = runner.handle().expect("handle exists with a command channel");
    let mut runner_future = core::pin::pin!(runner.drive());

    tokio::select! {
        result = &mut runner_future => {
            panic!("runner ended unexpectedly: {:?}", result);
        }
        _ = async {
            next_of(&mut host_bus, pgn::ADDRESS_CLAIM).await;
            tokio::time::sleep(Duration::from_millis(400)).await;
            assert!(platform.0.borrow().states.contains(&NetworkState::Claim(ClaimState::Online)));

            handle.discover_network().await;
            let request = next_of(&mut host_bus, pgn::ISO_REQUEST).await;
            assert_eq!(request.id.source_address(), 128);
            assert!(platform.0.borrow().errors.is_empty());
        } => {}
    }
}
