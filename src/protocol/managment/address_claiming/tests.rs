use super::*;
use alloc::vec::Vec;

use crate::protocol::timers::TimerEvent;

const OURS: IsoName = IsoName::from_raw(0x8000_0000_0000_0500);
const LOWER: IsoName = IsoName::from_raw(0x8000_0000_0000_0100);
const HIGHER: IsoName = IsoName::from_raw(0x8000_0000_0000_0900);

#[derive(Default)]
struct Sink(Vec<CanFrame>);

impl FrameSink for Sink {
    fn push(&mut self, frame: CanFrame) -> Result<(), CanFrame> {
        self.0.push(frame);
        Ok(())
    }

    fn free(&self) -> usize {
        64
    }
}

struct Bench {
    claim: AddressClaim<8>,
    timers: TimerService,
    out: Sink,
    stats: CommStats,
    notices: Vec<ClaimNotice>,
}

impl Bench {
    fn new(increment_on_conflict: bool) -> Self {
        let config = ClaimConfig {
            name: OURS,
            preferred: 0x20,
            range: 0x10..=0x30,
            increment_on_conflict,
            tick_ms: 10,
            node_liveness: 50,
        };
        Self {
            claim: AddressClaim::new(7, 8, config),
            timers: TimerService::new(),
            out: Sink::default(),
            stats: CommStats::new(),
            notices: Vec::new(),
        }
    }

    fn begin(&mut self) {
        let mut link = ClaimLink {
            timers: &mut self.timers,
            out: &mut self.out,
            stats: &mut self.stats,
        };
        let notices = &mut self.notices;
        self.claim
            .begin_claiming(&mut link, |notice| notices.push(notice))
            .unwrap();
    }

    fn receive_claim(&mut self, source: u8, name: IsoName) {
        let mut link = ClaimLink {
            timers: &mut self.timers,
            out: &mut self.out,
            stats: &mut self.stats,
        };
        let notices = &mut self.notices;
        self.claim
            .on_claim(&mut link, source, name, |notice| notices.push(notice))
            .unwrap();
    }

    /// Advance `ticks` ticks the way the engine does.
    fn run(&mut self, ticks: u32) -> Result<(), ClaimError> {
        for _ in 0..ticks {
            let mut events = Vec::new();
            self.timers
                .advance(self.claim.is_online(), |event| events.push(event));
            let mut link = ClaimLink {
                timers: &mut self.timers,
                out: &mut self.out,
                stats: &mut self.stats,
            };
            let notices = &mut self.notices;
            for event in events {
                if event == TimerEvent::Protocol {
                    self.claim
                        .on_protocol_timer(&mut link, |notice| notices.push(notice))?;
                }
            }
            self.claim.tick(&mut link, |notice| notices.push(notice))?;
        }
        Ok(())
    }

    /// `(source, name)` of every frame sent so far.
    fn claims(&mut self) -> Vec<(u8, IsoName)> {
        self.out
            .0
            .drain(..)
            .map(|frame| {
                assert_eq!(frame.id.pgn(), pgn::ADDRESS_CLAIM);
                assert_eq!(frame.id.destination(), Some(GLOBAL_ADDRESS));
                (
                    frame.id.source_address(),
                    IsoName::from_claim(frame.payload()).unwrap(),
                )
            })
            .collect()
    }
}

#[test]
/// Claim frame layout: PDU1 to global, NAME little endian, priority 6.
fn test_claim_frame() {
    let frame = claim_frame(OURS, 0x20).unwrap();
    assert_eq!(frame.id.priority(), 6);
    assert_eq!(frame.id.source_address(), 0x20);
    assert_eq!(frame.len, 8);
    assert_eq!(frame.data, OURS.raw().to_le_bytes());
}

#[test]
/// A quiet bus gives the preferred address after 250 ms.
fn test_claim_settles() {
    let mut bench = Bench::new(true);
    bench.begin();
    assert_eq!(bench.claims(), [(0x20, OURS)]);
    assert_eq!(bench.claim.state(), ClaimState::Claiming);

    bench.run(24).unwrap();
    assert_eq!(bench.claim.state(), ClaimState::Claiming);
    bench.run(1).unwrap();
    assert!(bench.claim.is_online());
    assert_eq!(bench.claim.address(), 0x20);
    assert_eq!(
        bench.notices,
        [
            ClaimNotice::State(ClaimState::Claiming),
            ClaimNotice::State(ClaimState::Online),
            ClaimNotice::Claimed(0x20),
        ]
    );
}

#[test]
/// A preferred address outside the range falls back to the range start.
fn test_preferred_outside_range() {
    let mut bench = Bench::new(true);
    bench.claim.set_preferred(0x05);
    bench.begin();
    assert_eq!(bench.claims(), [(0x10, OURS)]);
}

#[test]
/// A higher NAME claiming our address is answered and restarts the settle.
fn test_defends_address() {
    let mut bench = Bench::new(true);
    bench.begin();
    bench.claims();
    bench.run(20).unwrap();
    bench.receive_claim(0x20, HIGHER);
    assert_eq!(bench.claims(), [(0x20, OURS)]);

    bench.run(24).unwrap();
    assert_eq!(bench.claim.state(), ClaimState::Claiming);
    bench.run(1).unwrap();
    assert!(bench.claim.is_online());
}

#[test]
/// Our own claim echoed back is not a conflict.
fn test_ignores_own_name() {
    let mut bench = Bench::new(true);
    bench.begin();
    bench.claims();
    bench.receive_claim(0x20, OURS);
    assert!(bench.claims().is_empty());
    assert_eq!(bench.claim.state(), ClaimState::Claiming);
}

#[test]
/// Losing 0x20 before settle moves to the next free address, never Online at 0x20.
fn test_lost_claim_moves_on() {
    let mut bench = Bench::new(true);
    bench.receive_claim(0x21, HIGHER);
    bench.begin();
    bench.claims();
    bench.receive_claim(0x20, LOWER);

    // 0x21 is held by a known node.
    assert_eq!(bench.claims(), [(0x22, OURS)]);
    assert_eq!(bench.claim.nodes().name_of(0x20), Some(LOWER));
    bench.run(25).unwrap();
    assert!(bench.claim.is_online());
    assert_eq!(bench.claim.address(), 0x22);
}

#[test]
/// Without increment the node blocks and announces "cannot claim" from 254.
fn test_lost_claim_blocks() {
    let mut bench = Bench::new(false);
    bench.begin();
    bench.claims();
    bench.receive_claim(0x20, LOWER);
    assert_eq!(bench.claim.state(), ClaimState::Blocked);
    assert_eq!(bench.claim.address(), NULL_ADDRESS);
    assert!(bench.claims().is_empty());

    // Random delay is at most 153 ms, 16 ticks.
    bench.run(16).unwrap();
    assert_eq!(bench.claims(), [(NULL_ADDRESS, OURS)]);
    assert_eq!(bench.claim.state(), ClaimState::Blocked);
}

#[test]
/// Losing an address while online reports ourselves bumped off.
fn test_bumped_off_when_online() {
    let mut bench = Bench::new(true);
    bench.begin();
    bench.run(25).unwrap();
    bench.notices.clear();
    bench.claims();

    bench.receive_claim(0x20, LOWER);
    assert_eq!(
        bench.notices[..3],
        [
            ClaimNotice::Node(NodeChange {
                event: NodeEvent::BumpedOff,
                address: 0x20,
                name: OURS,
            }),
            ClaimNotice::State(ClaimState::Claiming),
            ClaimNotice::Node(NodeChange {
                event: NodeEvent::NewNode,
                address: 0x20,
                name: LOWER,
            }),
        ]
    );
    assert_eq!(bench.claims(), [(0x21, OURS)]);
}

#[test]
/// A blocked node retries its address once the holder times out.
fn test_blocked_retry_on_timeout() {
    let mut bench = Bench::new(false);
    bench.begin();
    bench.receive_claim(0x20, LOWER);
    assert_eq!(bench.claim.state(), ClaimState::Blocked);
    bench.claims();

    bench.run(50).unwrap();
    assert_eq!(bench.claim.state(), ClaimState::Claiming);
    assert_eq!(bench.claims().last(), Some(&(0x20, OURS)));
    bench.run(25).unwrap();
    assert!(bench.claim.is_online());
}

#[test]
/// Requests are answered from the current address, or from 254 when blocked.
fn test_answers_requests() {
    let mut bench = Bench::new(false);
    let mut link = ClaimLink {
        timers: &mut bench.timers,
        out: &mut bench.out,
        stats: &mut bench.stats,
    };
    bench.claim.on_request(&mut link).unwrap();
    assert!(bench.claims().is_empty());

    bench.begin();
    bench.claims();
    let mut link = ClaimLink {
        timers: &mut bench.timers,
        out: &mut bench.out,
        stats: &mut bench.stats,
    };
    bench.claim.on_request(&mut link).unwrap();
    assert_eq!(bench.claims(), [(0x20, OURS)]);

    bench.receive_claim(0x20, LOWER);
    let mut link = ClaimLink {
        timers: &mut bench.timers,
        out: &mut bench.out,
        stats: &mut bench.stats,
    };
    bench.claim.on_request(&mut link).unwrap();
    assert_eq!(bench.claims(), [(NULL_ADDRESS, OURS)]);
}

#[test]
/// Priority against known nodes; unknown addresses fail.
fn test_priority() {
    let mut bench = Bench::new(true);
    bench.receive_claim(0x40, LOWER);
    bench.receive_claim(0x41, HIGHER);
    assert_eq!(bench.claim.test_priority(0x40), Priority::Lower);
    assert_eq!(bench.claim.test_priority(0x41), Priority::Higher);
    assert_eq!(bench.claim.test_priority(0x42), Priority::Failed);
}

#[test]
/// Priority is antisymmetric and transitive over three NAMEs.
fn test_priority_order() {
    let names = [LOWER, OURS, HIGHER];
    for a in names {
        for b in names {
            assert_eq!(a.wins_over(&b), b > a);
            assert!(!(a.wins_over(&b) && b.wins_over(&a)));
            for c in names {
                if a.wins_over(&b) && b.wins_over(&c) {
                    assert!(a.wins_over(&c));
                }
            }
        }
    }
}

#[test]
/// A settle expiry while online is an inconsistent state.
fn test_unexpected_protocol_timer() {
    let mut bench = Bench::new(true);
    bench.begin();
    bench.run(25).unwrap();
    bench.timers.arm_protocol(1);
    assert_eq!(bench.run(1), Err(ClaimError::InconsistentState));
}
