/// Test doubles: an in-memory CAN bus, a tokio-backed timer, a recording
/// platform and a small application catalogue.
use embassy_sync::blocking_mutex::raw::NoopRawMutex;
use korri_stack::core::{FieldDescriptor, FieldKind, MessageDescriptor, PartDescriptor};
use korri_stack::engine::config::StackConfig;
use korri_stack::engine::platform::{ConfigLayer, NetworkState, ParamType, Platform};
use korri_stack::engine::stack::Stack;
use korri_stack::error::{PlatformError, StackError};
use korri_stack::infra::heap::{shared_heap, HeapAllocator};
use korri_stack::protocol::catalog::{Catalog, CatalogEntry, EntryFlags};
use korri_stack::protocol::managment::iso_name::IsoName;
use korri_stack::protocol::managment::node_table::NodeEvent;
use korri_stack::protocol::transport::{
    can_frame::CanFrame,
    traits::{can_bus::CanBus, korri_timer::KorriTimer},
};
use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::time::sleep;

#[derive(Clone)]
#[allow(dead_code)]
/// In-memory CAN bus reproducing the `CanBus` trait behavior.
pub struct MockCanBus {
    tx: mpsc::UnboundedSender<CanFrame>,
    rx: Arc<Mutex<mpsc::UnboundedReceiver<CanFrame>>>,
}

#[allow(dead_code)]
impl MockCanBus {
    /// Construct a pair of interconnected buses (DUT <-> host).
    pub fn create_pair() -> (Self, Self) {
        let (dut_tx, host_rx) = mpsc::unbounded_channel();
        let (host_tx, dut_rx) = mpsc::unbounded_channel();

        let dut_bus = Self {
            tx: dut_tx,
            rx: Arc::new(Mutex::new(dut_rx)),
        };

        let host_bus = Self {
            tx: host_tx,
            rx: Arc::new(Mutex::new(host_rx)),
        };

        (dut_bus, host_bus)
    }
}

impl CanBus for MockCanBus {
    type Error = ();

    async fn send<'a>(&'a mut self, frame: &'a CanFrame) -> Result<(), Self::Error> {
        self.tx.send(frame.clone()).map_err(|_| ())?;
        Ok(())
    }

    async fn recv(&mut self) -> Result<CanFrame, Self::Error> {
        let mut rx = self.rx.lock().await;
        rx.recv().await.ok_or(())
    }
}

#[allow(dead_code)]
/// Timer based on `tokio::time::sleep` to drive the tick in tests.
pub struct MockTimer;

impl KorriTimer for MockTimer {
    async fn delay(&mut self, duration: embassy_time::Duration) {
        sleep(std::time::Duration::from_millis(duration.as_millis())).await;
    }
}

#[derive(Default)]
#[allow(dead_code)]
pub struct PlatformLog {
    pub store: Vec<(ParamType, ConfigLayer, Vec<u8>)>,
    pub states: Vec<NetworkState>,
    pub nodes: Vec<(NodeEvent, u8)>,
    pub errors: Vec<StackError>,
}

#[derive(Clone, Default)]
#[allow(dead_code)]
/// Platform whose log stays reachable after the stack is moved into a runner.
pub struct SharedPlatform(pub Rc<RefCell<PlatformLog>>);

impl Platform<NoopRawMutex> for SharedPlatform {
    fn load(&mut self, param: ParamType, layer: ConfigLayer, out: &mut [u8]) -> Result<(), PlatformError> {
        let log = self.0.borrow();
        let (_, _, blob) = log
            .store
            .iter()
            .find(|(p, l, _)| *p == param && *l == layer)
            .ok_or(PlatformError::NotFound)?;
        if blob.len() != out.len() {
            return Err(PlatformError::SizeMismatch {
                expected: out.len(),
                found: blob.len(),
            });
        }
        out.copy_from_slice(blob);
        Ok(())
    }

    fn save(&mut self, param: ParamType, layer: ConfigLayer, data: &[u8]) -> Result<(), PlatformError> {
        let mut log = self.0.borrow_mut();
        log.store.retain(|(p, l, _)| !(*p == param && *l == layer));
        log.store.push((param, layer, data.to_vec()));
        Ok(())
    }

    fn network_state(&mut self, state: NetworkState) {
        self.0.borrow_mut().states.push(state);
    }

    fn node_changed(&mut self, event: NodeEvent, address: u8, _name: IsoName) {
        self.0.borrow_mut().nodes.push((event, address));
    }

    fn report_error(&mut self, error: StackError) {
        self.0.borrow_mut().errors.push(error);
    }
}

#[allow(dead_code)]
pub const LEVEL_PGN: u32 = 65_280;
#[allow(dead_code)]
pub const DIRECT: u32 = 61_184;
#[allow(dead_code)]
pub const TRACK: u32 = 130_816;

static LEVEL_FIELDS: [FieldDescriptor; 1] = [FieldDescriptor::number("level", FieldKind::UInt, 0, 0)];

static LEVEL: MessageDescriptor = MessageDescriptor {
    fixed: PartDescriptor {
        wire_len: 2,
        record_size: 2,
        fields: &LEVEL_FIELDS,
    },
    variable: None,
    priority: 6,
    group_function: None,
};

static BLOB20_FIELDS: [FieldDescriptor; 1] = [FieldDescriptor::string("blob", 0, 20, 0)];

static BLOB20: MessageDescriptor = MessageDescriptor {
    fixed: PartDescriptor {
        wire_len: 20,
        record_size: 20,
        fields: &BLOB20_FIELDS,
    },
    variable: None,
    priority: 3,
    group_function: None,
};

static BLOB40_FIELDS: [FieldDescriptor; 1] = [FieldDescriptor::string("blob", 0, 40, 0)];

static BLOB40: MessageDescriptor = MessageDescriptor {
    fixed: PartDescriptor {
        wire_len: 40,
        record_size: 40,
        fields: &BLOB40_FIELDS,
    },
    variable: None,
    priority: 6,
    group_function: None,
};

const RX_TX: EntryFlags = EntryFlags::RX.union(EntryFlags::TX);

static ENTRIES: [CatalogEntry; 3] = [
    CatalogEntry::new(DIRECT, RX_TX.union(EntryFlags::PDU1), &BLOB40),
    CatalogEntry::new(LEVEL_PGN, RX_TX.union(EntryFlags::REQUEST), &LEVEL),
    CatalogEntry::new(TRACK, RX_TX, &BLOB20).with_fast_packet(0),
];

#[allow(dead_code)]
pub type TestStack = Stack<NoopRawMutex, SharedPlatform>;

#[allow(dead_code)]
/// Stack named `name` over `arena`, preferring address 128.
pub fn build_stack(arena: &'static mut [u8], name: IsoName, platform: SharedPlatform) -> TestStack {
    build_sized(arena, name, platform)
}

#[allow(dead_code)]
/// Same as [`build_stack`] with caller-chosen timer and node capacities.
pub fn build_sized<const TX: usize, const RX: usize, const N: usize>(
    arena: &'static mut [u8],
    name: IsoName,
    platform: SharedPlatform,
) -> Stack<NoopRawMutex, SharedPlatform, TX, RX, N> {
    let mut allocator = HeapAllocator::new();
    allocator.install(arena).expect("arena must install");
    let config = StackConfig {
        name,
        max_nodes: N,
        ..StackConfig::default()
    };
    let catalog = Catalog::new(&ENTRIES).expect("catalog must validate");
    Stack::new(config, catalog, shared_heap(allocator), platform).expect("stack must build")
}
