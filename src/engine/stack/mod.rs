//! The engine context object.
//!
//! [`Stack`] owns every protocol layer and runs them from [`Stack::tick`], a
//! non-blocking step function called once per configured tick period:
//!
//! 1. drain the [`FramePort`]: each frame goes to the claim machine, the
//!    transport sessions and the router, in that order (claims are
//!    arbitrated from the raw frame, before anything touches the arena);
//! 2. poll outbound transfers and expire stale sessions;
//! 3. count node liveness down;
//! 4. advance the timers;
//! 5. hand queued frames to the port.
//!
//! Recoverable faults are counted or reported through
//! [`Platform::report_error`]; only fatal ones are returned.
mod receive;
mod transmit;

use alloc::vec;

use embassy_sync::blocking_mutex::raw::RawMutex;

use super::config::StackConfig;
use super::persist::{
    decode_name, decode_rx_timers, decode_tx_timers, encode_name, encode_rx_timers,
    encode_tx_timers, load_layered, rx_blob_len, tx_blob_len, AccessCounters, ADDRESS_LEN, NAME_LEN,
};
use super::platform::{ConfigLayer, NetworkState, ParamType, Platform};
use crate::error::{StackError, TimerError};
use crate::infra::heap::{with_heap, SharedHeap};
use crate::infra::stats::{CommStats, Counter};
use crate::protocol::catalog::{pgn, Catalog};
use crate::protocol::managment::address_claiming::{
    AddressClaim, ClaimLink, ClaimNotice, ClaimState, Priority, NULL_ADDRESS,
};
use crate::protocol::managment::iso_name::IsoName;
use crate::protocol::managment::node_table::{NodeTable, NODES};
use crate::protocol::router::Router;
use crate::protocol::timers::{TimerEvent, TimerKey, TimerService, RX_TIMERS, TX_TIMERS};
use crate::protocol::transport::fast_packet::assembler::FastPacketAssembler;
use crate::protocol::transport::fast_packet::{SequenceCounters, FP_SESSIONS};
use crate::protocol::transport::outbox::Outbox;
use crate::protocol::transport::can_frame::CanFrame;
use crate::protocol::transport::segmented::rx::SegmentedReceiver;
use crate::protocol::transport::segmented::tx::SegmentedSender;
use crate::protocol::transport::segmented::{SegmentedTiming, TpLink};
use crate::protocol::transport::traits::frame_port::FramePort;

pub struct Stack<
    M: RawMutex,
    P: Platform<M>,
    const TX: usize = TX_TIMERS,
    const RX: usize = RX_TIMERS,
    const N: usize = NODES,
> {
    config: StackConfig,
    heap: SharedHeap<M>,
    platform: P,
    claim: AddressClaim<N>,
    timers: TimerService<TX, RX>,
    router: Router<M>,
    fast_packets: FastPacketAssembler<M, FP_SESSIONS>,
    tp_rx: SegmentedReceiver<M>,
    tp_tx: SegmentedSender<M>,
    sequences: SequenceCounters,
    outbox: Outbox<M>,
    stats: CommStats,
    timing: SegmentedTiming,
    fast_packet_timeout: u32,
    /// Tick counter.
    now: u32,
    counters: AccessCounters,
}

impl<M, P, const TX: usize, const RX: usize, const N: usize> Stack<M, P, TX, RX, N>
where
    M: RawMutex,
    P: Platform<M>,
{
    /// Validate `config`, restore the persisted parameters and build the
    /// stack. Claiming starts with [`start`](Self::start).
    pub fn new(config: StackConfig, catalog: Catalog, heap: SharedHeap<M>, platform: P) -> Result<Self, StackError> {
        config.validate(N)?;
        let mut stack = Self {
            claim: AddressClaim::new(config.seed, config.max_nodes, config.claim_config()),
            router: Router::new(catalog, heap.clone(), config.not_receivable),
            timing: config.segmented_timing(),
            fast_packet_timeout: config.ticks(config.fast_packet_timeout),
            heap,
            platform,
            timers: TimerService::new(),
            fast_packets: FastPacketAssembler::new(),
            tp_rx: SegmentedReceiver::new(),
            tp_tx: SegmentedSender::new(),
            sequences: SequenceCounters::new(),
            outbox: Outbox::new(),
            stats: CommStats::new(),
            now: 0,
            counters: AccessCounters::default(),
            config,
        };
        stack.restore()?;
        Ok(stack)
    }

    /// Send the first address claim.
    pub fn start(&mut self) -> Result<(), StackError> {
        let mut link = ClaimLink {
            timers: &mut self.timers,
            out: &mut self.outbox,
            stats: &mut self.stats,
        };
        let platform = &mut self.platform;
        self.claim
            .begin_claiming(&mut link, |notice| notify::<M, P>(platform, notice))?;
        Ok(())
    }

    /// Forget every session and known node, then claim again.
    pub fn restart(&mut self) -> Result<(), StackError> {
        self.fast_packets.clear();
        self.tp_rx.clear();
        self.tp_tx.clear();
        self.outbox.clear();
        let mut link = ClaimLink {
            timers: &mut self.timers,
            out: &mut self.outbox,
            stats: &mut self.stats,
        };
        self.claim.reset(&mut link);
        self.start()
    }

    /// Run one step. Fatal errors are also reported to the platform.
    pub fn tick(&mut self, port: &mut impl FramePort) -> Result<(), StackError> {
        let result = self.step(port);
        if let Err(error) = result {
            #[cfg(feature = "defmt")]
            defmt::error!("stack: fatal error {}", defmt::Debug2Format(&error));
            self.platform.report_error(error);
        }
        result
    }

    fn step(&mut self, port: &mut impl FramePort) -> Result<(), StackError> {
        while let Some(frame) = port.receive() {
            self.receive_frame(&frame)?;
        }
        self.poll_transport()?;
        self.count_liveness()?;
        self.advance_timers()?;
        self.outbox.drain_into(port, self.config.frames_per_tick);
        self.check_heap()?;
        self.now = self.now.wrapping_add(1);
        Ok(())
    }

    fn poll_transport(&mut self) -> Result<(), StackError> {
        let mut link = TpLink {
            local: self.claim.address(),
            now: self.now,
            timing: &self.timing,
            out: &mut self.outbox,
            stats: &mut self.stats,
        };
        self.tp_rx.expire(&mut link);
        let polled = self.tp_tx.poll(&mut link);
        for _ in 0..self.fast_packets.expire(self.now, self.fast_packet_timeout) {
            self.stats.bump(Counter::FastPacketDrops);
        }
        self.escalate(polled)
    }

    fn count_liveness(&mut self) -> Result<(), StackError> {
        let mut link = ClaimLink {
            timers: &mut self.timers,
            out: &mut self.outbox,
            stats: &mut self.stats,
        };
        let platform = &mut self.platform;
        let result = self
            .claim
            .tick(&mut link, |notice| notify::<M, P>(platform, notice));
        self.escalate(result)
    }

    fn advance_timers(&mut self) -> Result<(), StackError> {
        let mut settle = false;
        let mut announce = false;
        let platform = &mut self.platform;
        self.timers.advance(self.claim.is_online(), |event| match event {
            TimerEvent::Protocol => settle = true,
            TimerEvent::Transmit { key, .. } if key.pgn == pgn::ADDRESS_CLAIM => announce = true,
            TimerEvent::Transmit { key, destination } => platform.transmit_due(key, destination),
            TimerEvent::ReceiveTimeout { key } => platform.receive_timeout(key),
        });

        let mut link = ClaimLink {
            timers: &mut self.timers,
            out: &mut self.outbox,
            stats: &mut self.stats,
        };
        let platform = &mut self.platform;
        let mut result = Ok(());
        if settle {
            result = self
                .claim
                .on_protocol_timer(&mut link, |notice| notify::<M, P>(platform, notice));
        }
        if announce && result.is_ok() {
            result = self.claim.on_request(&mut link);
        }
        self.escalate(result)
    }

    /// Mirror the allocator counters and surface a fault it recorded.
    fn check_heap(&mut self) -> Result<(), StackError> {
        let (fault, low_water, failures) = with_heap(&self.heap, |allocator| {
            (
                allocator.take_fault(),
                allocator.free_low_water(),
                allocator.malloc_failures(),
            )
        });
        self.stats.note_heap(low_water, failures);
        self.stats.note_active_sessions(
            self.fast_packets.active() + self.tp_rx.active() + self.tp_tx.active(),
        );
        match fault {
            Some(fault) => self.escalate(Err(fault)),
            None => Ok(()),
        }
    }

    /// Return fatal errors, report the others and carry on.
    fn escalate<E: Into<StackError>>(&mut self, result: Result<(), E>) -> Result<(), StackError> {
        let result: Result<(), StackError> = result.map_err(Into::into);
        match result {
            Ok(()) => Ok(()),
            Err(error) if error.is_fatal() => Err(error),
            Err(error) => {
                #[cfg(feature = "defmt")]
                defmt::warn!("stack: {}", defmt::Debug2Format(&error));
                self.platform.report_error(error);
                Ok(())
            }
        }
    }

    //==================================================================================TIMERS
    /// Create, update or delete a transmit timer (ticks) and persist the table.
    pub fn set_transmit_timer(&mut self, key: TimerKey, destination: u8, period: u16, start_at: u16) -> Result<(), StackError> {
        self.timers.set_transmit_timer(key, destination, period, start_at)?;
        self.save_tx_timers(true)
    }

    /// One-shot transmit request after `delay` ticks. Not persisted.
    pub fn set_transmit_one_shot(&mut self, key: TimerKey, destination: u8, delay: u16) -> Result<(), TimerError> {
        self.timers.set_transmit_one_shot(key, destination, delay)
    }

    /// Create, update or delete a receive timeout (ticks) and persist the table.
    pub fn set_receive_timeout(&mut self, key: TimerKey, window: u16) -> Result<(), StackError> {
        self.timers.set_receive_timeout(key, window)?;
        self.save_rx_timers(true)
    }

    pub fn enable_periodic_reports(&mut self, enabled: bool) {
        self.timers.enable_periodic_reports(enabled);
    }

    pub fn timers(&self) -> &TimerService<TX, RX> {
        &self.timers
    }

    //==================================================================================PERSISTENCE
    /// Load address, NAME and timer tables, `User` first then `Factory`.
    fn restore(&mut self) -> Result<(), StackError> {
        let mut address = [0u8; ADDRESS_LEN];
        if load_layered::<M, P>(&mut self.platform, ParamType::Address, &mut address).is_ok()
            && address[0] < NULL_ADDRESS
        {
            self.claim.set_preferred(address[0]);
        }
        let mut name = [0u8; NAME_LEN];
        if load_layered::<M, P>(&mut self.platform, ParamType::Name, &mut name).is_ok() {
            let (counter, name) = decode_name(&name);
            self.counters.name = counter;
            self.claim.set_name(name);
        }
        self.load_timers(None)
    }

    /// Replace the timer tables with `layer`, or the layered default.
    fn load_timers(&mut self, layer: Option<ConfigLayer>) -> Result<(), StackError> {
        self.timers.clear();
        let mut tx = vec![0u8; tx_blob_len(TX)];
        if self.load_blob(ParamType::TxTimers, layer, &mut tx) {
            self.counters.tx_timers = decode_tx_timers(&tx, &mut self.timers)?;
        }
        let mut rx = vec![0u8; rx_blob_len(RX)];
        if self.load_blob(ParamType::RxTimers, layer, &mut rx) {
            self.counters.rx_timers = decode_rx_timers(&rx, &mut self.timers)?;
        }
        Ok(())
    }

    fn load_blob(&mut self, param: ParamType, layer: Option<ConfigLayer>, out: &mut [u8]) -> bool {
        match layer {
            Some(layer) => self.platform.load(param, layer, out).is_ok(),
            None => load_layered::<M, P>(&mut self.platform, param, out).is_ok(),
        }
    }

    /// Reload the timer tables from `layer`, store them as the `User` values
    /// and restart the access counters.
    pub fn reset_configuration(&mut self, layer: ConfigLayer) -> Result<(), StackError> {
        self.load_timers(Some(layer))?;
        self.counters.tx_timers = 0;
        self.counters.rx_timers = 0;
        self.save_tx_timers(false)?;
        self.save_rx_timers(false)
    }

    fn save_tx_timers(&mut self, bump: bool) -> Result<(), StackError> {
        if bump {
            self.counters.tx_timers = self.counters.tx_timers.wrapping_add(1);
        }
        let mut blob = vec![0u8; tx_blob_len(TX)];
        encode_tx_timers(&self.timers, self.counters.tx_timers, &mut blob);
        self.platform.save(ParamType::TxTimers, ConfigLayer::User, &blob)?;
        Ok(())
    }

    fn save_rx_timers(&mut self, bump: bool) -> Result<(), StackError> {
        if bump {
            self.counters.rx_timers = self.counters.rx_timers.wrapping_add(1);
        }
        let mut blob = vec![0u8; rx_blob_len(RX)];
        encode_rx_timers(&self.timers, self.counters.rx_timers, &mut blob);
        self.platform.save(ParamType::RxTimers, ConfigLayer::User, &blob)?;
        Ok(())
    }

    /// Change and persist the NAME. A running node claims again with it.
    pub fn set_name(&mut self, name: IsoName) -> Result<(), StackError> {
        self.counters.name = self.counters.name.wrapping_add(1);
        self.platform
            .save(ParamType::Name, ConfigLayer::User, &encode_name(self.counters.name, name))?;
        self.claim.set_name(name);
        if self.claim.state() != ClaimState::Idle {
            self.restart()?;
        }
        Ok(())
    }

    pub fn access_counters(&self) -> AccessCounters {
        self.counters
    }

    //==================================================================================STATE
    /// Forward a bus-level state change from the driver.
    pub fn report_bus_state(&mut self, state: NetworkState) {
        self.platform.network_state(state);
    }

    pub fn claim_state(&self) -> ClaimState {
        self.claim.state()
    }

    pub fn is_online(&self) -> bool {
        self.claim.is_online()
    }

    /// Claimed address, 254 when none.
    pub fn address(&self) -> u8 {
        self.claim.address()
    }

    pub fn name(&self) -> IsoName {
        self.claim.name()
    }

    pub fn nodes(&self) -> &NodeTable<N> {
        self.claim.nodes()
    }

    pub fn test_priority(&self, address: u8) -> Priority {
        self.claim.test_priority(address)
    }

    pub fn stats(&self) -> CommStats {
        self.stats
    }

    pub fn config(&self) -> &StackConfig {
        &self.config
    }

    /// Handler registry.
    pub fn router_mut(&mut self) -> &mut Router<M> {
        &mut self.router
    }

    pub fn platform(&self) -> &P {
        &self.platform
    }

    pub fn platform_mut(&mut self) -> &mut P {
        &mut self.platform
    }

    pub fn heap(&self) -> &SharedHeap<M> {
        &self.heap
    }

    /// Ticks elapsed since construction.
    pub fn now(&self) -> u32 {
        self.now
    }

    /// Frames waiting for the bus.
    pub fn pending_frames(&self) -> usize {
        self.outbox.len()
    }

    /// Next frame for the bus, for hosts that drive the bus themselves
    /// instead of through a [`FramePort`].
    pub fn pop_frame(&mut self) -> Option<CanFrame> {
        self.outbox.pop()
    }
}

/// Relay a claim notice to the platform; a settled address is persisted.
fn notify<M: RawMutex, P: Platform<M>>(platform: &mut P, notice: ClaimNotice) {
    match notice {
        ClaimNotice::State(state) => platform.network_state(NetworkState::Claim(state)),
        ClaimNotice::Claimed(address) => {
            if let Err(error) = platform.save(ParamType::Address, ConfigLayer::User, &[address]) {
                platform.report_error(error.into());
            }
        }
        ClaimNotice::Node(change) => platform.node_changed(change.event, change.address, change.name),
    }
}
