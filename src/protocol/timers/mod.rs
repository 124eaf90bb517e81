//! Cooperative timer service advanced once per tick.
//!
//! Three kinds of countdowns live here:
//! - transmit timers asking the application to send a message every period;
//! - receive timeouts raised when a watched message stops arriving;
//! - the single protocol countdown used by address claiming.
//!
//! All durations are in ticks. Tables are fixed-size and fail closed.
use crate::error::TimerError;
use crate::infra::slots::SlotTable;
use crate::protocol::catalog::{pgn, GroupFunction};

/// Default transmit table capacity.
pub const TX_TIMERS: usize = 30;
/// Default receive table capacity.
pub const RX_TIMERS: usize = 10;
/// Period / start / window value meaning "keep what is there".
pub const NO_CHANGE: u16 = 0xFFFF;

/// Whether tick `now` has reached `deadline`, tolerating counter wrap.
pub fn deadline_reached(now: u32, deadline: u32) -> bool {
    (now.wrapping_sub(deadline) as i32) >= 0
}

/// Ticks covering `ms` milliseconds, rounded up, never below one.
pub const fn ticks_for(ms: u64, tick_ms: u64) -> u32 {
    if tick_ms == 0 {
        return 1;
    }
    let ticks = ms.div_ceil(tick_ms);
    if ticks == 0 {
        1
    } else if ticks > u32::MAX as u64 {
        u32::MAX
    } else {
        ticks as u32
    }
}

/// Message a timer is attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TimerKey {
    pub pgn: u32,
    pub group_function: GroupFunction,
}

impl TimerKey {
    pub const fn new(pgn: u32) -> Self {
        Self {
            pgn,
            group_function: GroupFunction::DontCare,
        }
    }

    pub const fn with_group_function(pgn: u32, code: u8) -> Self {
        Self {
            pgn,
            group_function: GroupFunction::Code(code),
        }
    }
}

/// Something a timer asks the engine to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TimerEvent {
    /// Time to send `key` to `destination`.
    Transmit { key: TimerKey, destination: u8 },
    /// `key` was not received within its window.
    ReceiveTimeout { key: TimerKey },
    /// The claim / settle countdown expired.
    Protocol,
}

/// Periodic (or one-shot) transmit schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxTimer {
    pub key: TimerKey,
    pub destination: u8,
    pub period: u16,
    /// Ticks before the next firing, `0` when stopped.
    countdown: u16,
    one_shot: bool,
}

impl TxTimer {
    pub fn countdown(&self) -> u16 {
        self.countdown
    }

    pub fn is_one_shot(&self) -> bool {
        self.one_shot
    }
}

/// Reception watchdog.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RxTimer {
    pub key: TimerKey,
    pub window: u16,
    /// Ticks left, `0` when disarmed.
    remaining: u16,
}

impl RxTimer {
    pub fn is_armed(&self) -> bool {
        self.remaining > 0
    }
}

pub struct TimerService<const TX: usize = TX_TIMERS, const RX: usize = RX_TIMERS> {
    transmit: SlotTable<TxTimer, TX>,
    receive: SlotTable<RxTimer, RX>,
    protocol: Option<u32>,
    reports_enabled: bool,
}

impl<const TX: usize, const RX: usize> Default for TimerService<TX, RX> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const TX: usize, const RX: usize> TimerService<TX, RX> {
    pub fn new() -> Self {
        Self {
            transmit: SlotTable::new(),
            receive: SlotTable::new(),
            protocol: None,
            reports_enabled: true,
        }
    }

    /// Create, update, stop or delete the transmit timer of `(key, destination)`.
    ///
    /// - `period == 0` deletes the entry;
    /// - `period == NO_CHANGE` keeps the period of an existing entry;
    /// - `start_at == NO_CHANGE` keeps the countdown (a new entry starts a
    ///   full period), `0` stops the timer, `1` fires on the next advance, and
    ///   anything at or above the period starts a full period.
    pub fn set_transmit_timer(
        &mut self,
        key: TimerKey,
        destination: u8,
        period: u16,
        start_at: u16,
    ) -> Result<(), TimerError> {
        self.set_transmit(key, destination, period, start_at, false)
    }

    /// Same as [`set_transmit_timer`](Self::set_transmit_timer), the entry
    /// disappearing after it fires once.
    pub fn set_transmit_one_shot(
        &mut self,
        key: TimerKey,
        destination: u8,
        delay: u16,
    ) -> Result<(), TimerError> {
        self.set_transmit(key, destination, delay, delay, true)
    }

    fn set_transmit(
        &mut self,
        key: TimerKey,
        destination: u8,
        period: u16,
        start_at: u16,
        one_shot: bool,
    ) -> Result<(), TimerError> {
        let slot = self
            .transmit
            .position(|timer| timer.key == key && timer.destination == destination);

        if period == 0 {
            if let Some(index) = slot {
                self.transmit.remove(index);
            }
            return Ok(());
        }

        match slot.and_then(|index| self.transmit.get_mut(index)) {
            Some(timer) => {
                if period != NO_CHANGE {
                    timer.period = period;
                }
                timer.one_shot = one_shot;
                if start_at != NO_CHANGE {
                    timer.countdown = initial_countdown(timer.period, start_at);
                }
                Ok(())
            }
            None => {
                if period == NO_CHANGE {
                    return Err(TimerError::NotFound);
                }
                let countdown = if start_at == NO_CHANGE {
                    period
                } else {
                    initial_countdown(period, start_at)
                };
                self.transmit
                    .insert(TxTimer {
                        key,
                        destination,
                        period,
                        countdown,
                        one_shot,
                    })
                    .map(|_| ())
                    .map_err(|_| TimerError::Full)
            }
        }
    }

    /// Create, resize or delete the receive timeout of `key`. Setting a
    /// window arms the timer.
    pub fn set_receive_timeout(&mut self, key: TimerKey, window: u16) -> Result<(), TimerError> {
        let slot = self.receive.position(|timer| timer.key == key);
        if window == 0 {
            if let Some(index) = slot {
                self.receive.remove(index);
            }
            return Ok(());
        }
        match slot.and_then(|index| self.receive.get_mut(index)) {
            Some(timer) => {
                if window != NO_CHANGE {
                    timer.window = window;
                }
                timer.remaining = timer.window;
                Ok(())
            }
            None if window == NO_CHANGE => Err(TimerError::NotFound),
            None => self
                .receive
                .insert(RxTimer {
                    key,
                    window,
                    remaining: window,
                })
                .map(|_| ())
                .map_err(|_| TimerError::Full),
        }
    }

    /// Re-arm the receive timeout matching a received message. Returns
    /// `false` when nothing watches it.
    pub fn refresh_receive(&mut self, pgn: u32, group_function: GroupFunction) -> bool {
        let mut refreshed = false;
        for (_, timer) in self.receive.iter_mut() {
            if timer.key.pgn == pgn && timer.key.group_function.matches(group_function) {
                timer.remaining = timer.window;
                refreshed = true;
            }
        }
        refreshed
    }

    /// Gate for periodic transmissions. Countdowns keep running while off.
    pub fn enable_periodic_reports(&mut self, enabled: bool) {
        self.reports_enabled = enabled;
    }

    pub fn periodic_reports_enabled(&self) -> bool {
        self.reports_enabled
    }

    /// Start the protocol countdown, replacing a running one.
    pub fn arm_protocol(&mut self, ticks: u32) {
        self.protocol = Some(ticks.max(1));
    }

    pub fn cancel_protocol(&mut self) {
        self.protocol = None;
    }

    pub fn protocol_armed(&self) -> bool {
        self.protocol.is_some()
    }

    pub fn transmit_timers(&self) -> impl Iterator<Item = &TxTimer> {
        self.transmit.iter().map(|(_, timer)| timer)
    }

    pub fn receive_timers(&self) -> impl Iterator<Item = &RxTimer> {
        self.receive.iter().map(|(_, timer)| timer)
    }

    /// Drop every transmit and receive timer.
    pub fn clear(&mut self) {
        self.transmit.clear();
        self.receive.clear();
    }

    /// Advance every countdown by one tick and report what fired.
    ///
    /// Transmit events other than the address claim are swallowed while
    /// reports are disabled or the node is not `online`.
    pub fn advance(&mut self, online: bool, mut sink: impl FnMut(TimerEvent)) {
        if let Some(ticks) = self.protocol.as_mut() {
            *ticks -= 1;
            if *ticks == 0 {
                self.protocol = None;
                sink(TimerEvent::Protocol);
            }
        }

        let gate_open = online && self.reports_enabled;
        self.transmit.retain(|timer| {
            if timer.countdown == 0 {
                return true;
            }
            timer.countdown -= 1;
            if timer.countdown > 0 {
                return true;
            }
            if gate_open || timer.key.pgn == pgn::ADDRESS_CLAIM {
                sink(TimerEvent::Transmit {
                    key: timer.key,
                    destination: timer.destination,
                });
            }
            timer.countdown = timer.period;
            !timer.one_shot
        });

        for (_, timer) in self.receive.iter_mut() {
            if timer.remaining == 0 {
                continue;
            }
            timer.remaining -= 1;
            if timer.remaining == 0 {
                #[cfg(feature = "defmt")]
                defmt::debug!("receive timeout for PGN {}", timer.key.pgn);
                sink(TimerEvent::ReceiveTimeout { key: timer.key });
            }
        }
    }
}

fn initial_countdown(period: u16, start_at: u16) -> u16 {
    if start_at >= period {
        period
    } else {
        start_at
    }
}
