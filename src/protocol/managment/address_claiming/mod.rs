//! Address-claim arbitration (PGN 60928) as a state machine driven by the
//! tick: received claims, requests and the protocol countdown are fed in,
//! claim frames are pushed to the outbox.
//!
//! ```text
//! Idle --begin--> Claiming --250 ms quiet--> Online
//!                    |  ^                      |
//!          lost, no  |  | lost, next free      | lost
//!          candidate v  | address              v
//!                  Blocked <----------------- (same rules)
//! ```
//!
//! The lower NAME keeps a contested address. A blocked node announces itself
//! from the null address after a pseudo-random delay and waits for the
//! holder of its address to disappear.
use core::cmp::Ordering;
use core::ops::RangeInclusive;

use super::iso_name::IsoName;
use super::node_table::{NodeChange, NodeEvent, NodeTable, NODES};
use crate::error::{CanIdBuildError, ClaimError};
use crate::infra::stats::{CommStats, Counter};
use crate::protocol::catalog::pgn;
use crate::protocol::timers::{ticks_for, TimerService, RX_TIMERS, TX_TIMERS};
use crate::protocol::transport::can_frame::CanFrame;
use crate::protocol::transport::can_id::{CanId, GLOBAL_ADDRESS};
use crate::protocol::transport::traits::frame_port::FrameSink;

/// Source address of a node without a claimed address.
pub const NULL_ADDRESS: u8 = 254;
/// CAN priority of address claims.
pub const CLAIM_PRIORITY: u8 = 6;
/// Quiet period after a claim before the address is ours.
pub const SETTLE_MS: u64 = 250;
/// Upper bound of the pseudo-random "cannot claim" delay.
pub const MAX_RANDOM_DELAY_MS: u32 = 153;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ClaimState {
    Idle,
    /// Claim sent, waiting for the settle period.
    Claiming,
    Online,
    /// No address could be obtained.
    Blocked,
}

/// Outcome of [`AddressClaim::test_priority`], seen from the local node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Priority {
    /// The local NAME wins.
    Higher,
    Lower,
    Equal,
    /// No NAME known for the address.
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimConfig {
    pub name: IsoName,
    pub preferred: u8,
    /// Addresses the node may use.
    pub range: RangeInclusive<u8>,
    /// Move to the next free address after losing arbitration.
    pub increment_on_conflict: bool,
    /// Tick length, in milliseconds.
    pub tick_ms: u64,
    /// Ticks a silent node is kept in the node table.
    pub node_liveness: u32,
}

impl Default for ClaimConfig {
    fn default() -> Self {
        Self {
            name: IsoName::builder().self_configurable(true).build(),
            preferred: 128,
            range: 128..=247,
            increment_on_conflict: true,
            tick_ms: 10,
            node_liveness: 500,
        }
    }
}

/// What the claim machine reports to the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ClaimNotice {
    State(ClaimState),
    /// The address settled; persist it as the preferred one.
    Claimed(u8),
    Node(NodeChange),
}

/// Engine parts the claim machine acts on.
pub struct ClaimLink<'a, S: FrameSink, const TX: usize = TX_TIMERS, const RX: usize = RX_TIMERS> {
    pub timers: &'a mut TimerService<TX, RX>,
    pub out: &'a mut S,
    pub stats: &'a mut CommStats,
}

impl<S: FrameSink, const TX: usize, const RX: usize> ClaimLink<'_, S, TX, RX> {
    fn send_claim(&mut self, name: IsoName, source: u8) -> Result<(), ClaimError> {
        let frame = claim_frame(name, source)?;
        if self.out.push(frame).is_err() {
            self.stats.bump(Counter::TxQueueFull);
        }
        Ok(())
    }
}

/// Address-claim frame announcing `name` from `source`, sent to every node.
pub fn claim_frame(name: IsoName, source: u8) -> Result<CanFrame, CanIdBuildError> {
    let id = CanId::for_message(pgn::ADDRESS_CLAIM, CLAIM_PRIORITY, source, GLOBAL_ADDRESS)?;
    Ok(CanFrame::with_data(id, &name.to_claim()))
}

pub struct AddressClaim<const N: usize = NODES> {
    config: ClaimConfig,
    state: ClaimState,
    address: u8,
    /// First address tried in the current round.
    round_start: u8,
    /// Address whose holder blocked us.
    blocked_on: Option<u8>,
    cannot_claim_pending: bool,
    seed: u32,
    nodes: NodeTable<N>,
}

impl<const N: usize> AddressClaim<N> {
    pub fn new(seed: u32, max_nodes: usize, config: ClaimConfig) -> Self {
        Self {
            config,
            state: ClaimState::Idle,
            address: NULL_ADDRESS,
            round_start: NULL_ADDRESS,
            blocked_on: None,
            cannot_claim_pending: false,
            seed,
            nodes: NodeTable::new(max_nodes),
        }
    }

    pub fn state(&self) -> ClaimState {
        self.state
    }

    pub fn is_online(&self) -> bool {
        self.state == ClaimState::Online
    }

    /// Address in use, [`NULL_ADDRESS`] while idle or blocked.
    pub fn address(&self) -> u8 {
        self.address
    }

    pub fn name(&self) -> IsoName {
        self.config.name
    }

    pub fn config(&self) -> &ClaimConfig {
        &self.config
    }

    /// Replace the preferred address (typically the persisted one). Takes
    /// effect on the next [`begin_claiming`](Self::begin_claiming).
    pub fn set_preferred(&mut self, address: u8) {
        self.config.preferred = address;
    }

    /// Replace the NAME. Takes effect on the next claim round.
    pub fn set_name(&mut self, name: IsoName) {
        self.config.name = name;
    }

    pub fn nodes(&self) -> &NodeTable<N> {
        &self.nodes
    }

    /// Compare the local NAME with the one holding `address`.
    pub fn test_priority(&self, address: u8) -> Priority {
        match self.nodes.name_of(address) {
            None => Priority::Failed,
            Some(other) => match self.config.name.cmp(&other) {
                Ordering::Less => Priority::Higher,
                Ordering::Greater => Priority::Lower,
                Ordering::Equal => Priority::Equal,
            },
        }
    }

    /// Start a claim round at the preferred address (or the start of the
    /// range when the preferred one lies outside it).
    pub fn begin_claiming<S: FrameSink, const TX: usize, const RX: usize>(
        &mut self,
        link: &mut ClaimLink<'_, S, TX, RX>,
        mut notify: impl FnMut(ClaimNotice),
    ) -> Result<(), ClaimError> {
        let address = if self.config.range.contains(&self.config.preferred) {
            self.config.preferred
        } else {
            *self.config.range.start()
        };
        self.start_round(address, link, &mut notify)
    }

    /// An address claim from `source` was received.
    pub fn on_claim<S: FrameSink, const TX: usize, const RX: usize>(
        &mut self,
        link: &mut ClaimLink<'_, S, TX, RX>,
        source: u8,
        name: IsoName,
        mut notify: impl FnMut(ClaimNotice),
    ) -> Result<(), ClaimError> {
        let holding = matches!(self.state, ClaimState::Claiming | ClaimState::Online);
        if holding && source == self.address {
            if name == self.config.name {
                return Ok(());
            }
            if self.config.name.wins_over(&name) {
                #[cfg(feature = "defmt")]
                defmt::info!("claim: defending address {}", source);
                link.send_claim(self.config.name, self.address)?;
                if self.state == ClaimState::Claiming {
                    link.timers.arm_protocol(self.settle_ticks());
                }
                return Ok(());
            }
            self.lose(link, &mut notify)?;
        }

        if source >= NULL_ADDRESS || name == self.config.name {
            return Ok(());
        }
        let blocked_on = self.blocked_on;
        let mut retry = false;
        self.nodes
            .observe(source, name, self.config.node_liveness, link.stats, |change| {
                retry |= releases(blocked_on, &change);
                notify(ClaimNotice::Node(change));
            });
        self.retry_if_released(retry, link, &mut notify)
    }

    /// The protocol countdown expired.
    pub fn on_protocol_timer<S: FrameSink, const TX: usize, const RX: usize>(
        &mut self,
        link: &mut ClaimLink<'_, S, TX, RX>,
        mut notify: impl FnMut(ClaimNotice),
    ) -> Result<(), ClaimError> {
        match self.state {
            ClaimState::Claiming => {
                #[cfg(feature = "defmt")]
                defmt::info!("claim: address {} claimed", self.address);
                self.enter(ClaimState::Online, &mut notify);
                notify(ClaimNotice::Claimed(self.address));
                Ok(())
            }
            ClaimState::Blocked => {
                if core::mem::take(&mut self.cannot_claim_pending) {
                    link.send_claim(self.config.name, NULL_ADDRESS)?;
                }
                Ok(())
            }
            ClaimState::Idle | ClaimState::Online => Err(ClaimError::InconsistentState),
        }
    }

    /// Answer an ISO request for the address claim.
    pub fn on_request<S: FrameSink, const TX: usize, const RX: usize>(
        &mut self,
        link: &mut ClaimLink<'_, S, TX, RX>,
    ) -> Result<(), ClaimError> {
        match self.state {
            ClaimState::Idle => Ok(()),
            ClaimState::Claiming | ClaimState::Online => link.send_claim(self.config.name, self.address),
            ClaimState::Blocked => link.send_claim(self.config.name, NULL_ADDRESS),
        }
    }

    /// Any message from `source` proves it is alive.
    pub fn on_traffic(&mut self, source: u8) {
        self.nodes.refresh(source, self.config.node_liveness);
    }

    /// Per-tick node liveness countdown.
    pub fn tick<S: FrameSink, const TX: usize, const RX: usize>(
        &mut self,
        link: &mut ClaimLink<'_, S, TX, RX>,
        mut notify: impl FnMut(ClaimNotice),
    ) -> Result<(), ClaimError> {
        let blocked_on = self.blocked_on;
        let mut retry = false;
        self.nodes.tick(|change| {
            retry |= releases(blocked_on, &change);
            notify(ClaimNotice::Node(change));
        });
        self.retry_if_released(retry, link, &mut notify)
    }

    /// Forget every known node and go back to `Idle`.
    pub fn reset<S: FrameSink, const TX: usize, const RX: usize>(&mut self, link: &mut ClaimLink<'_, S, TX, RX>) {
        link.timers.cancel_protocol();
        self.nodes.clear();
        self.state = ClaimState::Idle;
        self.address = NULL_ADDRESS;
        self.blocked_on = None;
        self.cannot_claim_pending = false;
    }

    fn start_round<S: FrameSink, const TX: usize, const RX: usize>(
        &mut self,
        address: u8,
        link: &mut ClaimLink<'_, S, TX, RX>,
        notify: &mut impl FnMut(ClaimNotice),
    ) -> Result<(), ClaimError> {
        self.round_start = address;
        self.blocked_on = None;
        self.cannot_claim_pending = false;
        self.try_address(address, link, notify)
    }

    fn try_address<S: FrameSink, const TX: usize, const RX: usize>(
        &mut self,
        address: u8,
        link: &mut ClaimLink<'_, S, TX, RX>,
        notify: &mut impl FnMut(ClaimNotice),
    ) -> Result<(), ClaimError> {
        #[cfg(feature = "defmt")]
        defmt::info!("claim: trying address {}", address);
        self.address = address;
        link.send_claim(self.config.name, address)?;
        link.timers.arm_protocol(self.settle_ticks());
        self.enter(ClaimState::Claiming, notify);
        Ok(())
    }

    fn lose<S: FrameSink, const TX: usize, const RX: usize>(
        &mut self,
        link: &mut ClaimLink<'_, S, TX, RX>,
        notify: &mut impl FnMut(ClaimNotice),
    ) -> Result<(), ClaimError> {
        let lost = self.address;
        #[cfg(feature = "defmt")]
        defmt::warn!("claim: lost address {}", lost);
        if self.state == ClaimState::Online {
            notify(ClaimNotice::Node(NodeChange {
                event: NodeEvent::BumpedOff,
                address: lost,
                name: self.config.name,
            }));
        }
        if self.config.increment_on_conflict {
            if let Some(next) = self.next_candidate(lost) {
                return self.try_address(next, link, notify);
            }
        }

        self.address = NULL_ADDRESS;
        self.blocked_on = Some(lost);
        self.cannot_claim_pending = true;
        let delay = self.random_delay_ticks();
        link.timers.arm_protocol(delay);
        self.enter(ClaimState::Blocked, notify);
        Ok(())
    }

    fn retry_if_released<S: FrameSink, const TX: usize, const RX: usize>(
        &mut self,
        released: bool,
        link: &mut ClaimLink<'_, S, TX, RX>,
        notify: &mut impl FnMut(ClaimNotice),
    ) -> Result<(), ClaimError> {
        match (released, self.state, self.blocked_on) {
            (true, ClaimState::Blocked, Some(address)) => self.start_round(address, link, notify),
            _ => Ok(()),
        }
    }

    /// Next address of the range after `from` not held by a known node,
    /// `None` once the round is back at its first address.
    fn next_candidate(&self, from: u8) -> Option<u8> {
        let low = *self.config.range.start();
        let high = *self.config.range.end();
        let span = high.checked_sub(low)? as usize + 1;
        let mut candidate = from;
        for _ in 0..span {
            candidate = if candidate >= high || candidate < low {
                low
            } else {
                candidate + 1
            };
            if candidate == self.round_start {
                return None;
            }
            if !self.nodes.contains_address(candidate) {
                return Some(candidate);
            }
        }
        None
    }

    fn settle_ticks(&self) -> u32 {
        ticks_for(SETTLE_MS, self.config.tick_ms)
    }

    fn random_delay_ticks(&mut self) -> u32 {
        self.seed = self.seed.wrapping_mul(1_103_515_245).wrapping_add(12_345);
        let ms = (self.seed >> 16) % (MAX_RANDOM_DELAY_MS + 1);
        ticks_for(ms as u64, self.config.tick_ms)
    }

    fn enter(&mut self, state: ClaimState, notify: &mut impl FnMut(ClaimNotice)) {
        if self.state != state {
            self.state = state;
            notify(ClaimNotice::State(state));
        }
    }
}

/// Whether `change` frees the address a blocked node is waiting for.
fn releases(blocked_on: Option<u8>, change: &NodeChange) -> bool {
    blocked_on == Some(change.address)
        && matches!(change.event, NodeEvent::TimedOut | NodeEvent::BumpedOff)
}

#[cfg(test)]
#[path = "tests.rs"]
mod tests;
