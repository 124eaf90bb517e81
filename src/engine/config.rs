//! Stack configuration with millisecond durations, converted to ticks once
//! at construction.
use core::ops::RangeInclusive;
use embassy_time::Duration;

use crate::error::ConfigError;
use crate::protocol::managment::address_claiming::{ClaimConfig, NULL_ADDRESS};
use crate::protocol::managment::iso_name::IsoName;
use crate::protocol::managment::node_table::NODES;
use crate::protocol::router::NotReceivablePolicy;
use crate::protocol::timers::ticks_for;
use crate::protocol::transport::segmented::SegmentedTiming;
use crate::protocol::transport::{
    BAM_INTERVAL_MS, FAST_PACKET_TIMEOUT_MS, TP_T1_MS, TP_T2_MS, TP_T3_MS, TP_T4_MS,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackConfig {
    /// Period between two `tick` calls.
    pub tick: Duration,
    pub name: IsoName,
    /// Used when no address was persisted.
    pub preferred_address: u8,
    pub address_range: RangeInclusive<u8>,
    pub increment_on_conflict: bool,
    /// Runtime cap of the node table, at most its compiled capacity.
    pub max_nodes: usize,
    /// Seed of the "cannot claim" delay.
    pub seed: u32,
    pub not_receivable: NotReceivablePolicy,
    /// Most packets granted by one CTS.
    pub cts_window: u8,
    pub fast_packet_timeout: Duration,
    pub t1: Duration,
    pub t2: Duration,
    pub t3: Duration,
    pub t4: Duration,
    pub bam_interval: Duration,
    /// Silence after which a node leaves the node table.
    pub node_liveness: Duration,
    /// Allow [`SendFlags::LOOPBACK`](crate::protocol::router::outbound::SendFlags::LOOPBACK).
    pub loopback: bool,
    /// Frames handed to the port per tick.
    pub frames_per_tick: usize,
}

impl Default for StackConfig {
    fn default() -> Self {
        Self {
            tick: Duration::from_millis(10),
            name: IsoName::builder().self_configurable(true).build(),
            preferred_address: 128,
            address_range: 128..=247,
            increment_on_conflict: true,
            max_nodes: NODES,
            seed: 1,
            not_receivable: NotReceivablePolicy::Nack,
            cts_window: 16,
            fast_packet_timeout: Duration::from_millis(FAST_PACKET_TIMEOUT_MS),
            t1: Duration::from_millis(TP_T1_MS),
            t2: Duration::from_millis(TP_T2_MS),
            t3: Duration::from_millis(TP_T3_MS),
            t4: Duration::from_millis(TP_T4_MS),
            bam_interval: Duration::from_millis(BAM_INTERVAL_MS),
            node_liveness: Duration::from_secs(5),
            loopback: true,
            frames_per_tick: 8,
        }
    }
}

impl StackConfig {
    /// Check the configuration against a node table of `node_capacity` slots.
    pub fn validate(&self, node_capacity: usize) -> Result<(), ConfigError> {
        if self.tick.as_millis() == 0 {
            return Err(ConfigError::ZeroTick);
        }
        let (low, high) = (*self.address_range.start(), *self.address_range.end());
        if low > high || high >= NULL_ADDRESS {
            return Err(ConfigError::InvalidAddressRange { low, high });
        }
        if self.preferred_address >= NULL_ADDRESS {
            return Err(ConfigError::ReservedAddress {
                address: self.preferred_address,
            });
        }
        if self.max_nodes > node_capacity {
            return Err(ConfigError::TooManyNodes {
                requested: self.max_nodes,
                capacity: node_capacity,
            });
        }
        if self.cts_window == 0 {
            return Err(ConfigError::ZeroCtsWindow);
        }
        if self.frames_per_tick == 0 {
            return Err(ConfigError::ZeroFramesPerTick);
        }
        Ok(())
    }

    /// Ticks covering `duration`, rounded up, at least one.
    pub fn ticks(&self, duration: Duration) -> u32 {
        ticks_for(duration.as_millis(), self.tick.as_millis())
    }

    pub fn segmented_timing(&self) -> SegmentedTiming {
        SegmentedTiming {
            t1: self.ticks(self.t1),
            t2: self.ticks(self.t2),
            t3: self.ticks(self.t3),
            t4: self.ticks(self.t4),
            bam_interval: self.ticks(self.bam_interval),
            cts_window: self.cts_window,
        }
    }

    pub fn claim_config(&self) -> ClaimConfig {
        ClaimConfig {
            name: self.name,
            preferred: self.preferred_address,
            range: self.address_range.clone(),
            increment_on_conflict: self.increment_on_conflict,
            tick_ms: self.tick.as_millis(),
            node_liveness: self.ticks(self.node_liveness),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    /// Defaults are valid and convert to the documented tick counts.
    fn test_default_ticks() {
        let config = StackConfig::default();
        config.validate(NODES).unwrap();
        let timing = config.segmented_timing();
        assert_eq!((timing.t1, timing.t2, timing.t3, timing.t4), (75, 125, 125, 105));
        assert_eq!(timing.bam_interval, 5);
        assert_eq!(config.claim_config().node_liveness, 500);
    }

    #[test]
    /// Durations round up to whole ticks.
    fn test_rounding() {
        let config = StackConfig {
            tick: Duration::from_millis(40),
            ..StackConfig::default()
        };
        assert_eq!(config.segmented_timing().bam_interval, 2);
        assert_eq!(config.ticks(Duration::from_millis(0)), 1);
    }

    #[test]
    /// Each invalid setting is reported.
    fn test_validate() {
        let base = StackConfig::default();
        let cases = [
            (
                StackConfig {
                    tick: Duration::from_ticks(0),
                    ..base.clone()
                },
                ConfigError::ZeroTick,
            ),
            (
                StackConfig {
                    address_range: 10..=254,
                    ..base.clone()
                },
                ConfigError::InvalidAddressRange { low: 10, high: 254 },
            ),
            (
                StackConfig {
                    preferred_address: 255,
                    ..base.clone()
                },
                ConfigError::ReservedAddress { address: 255 },
            ),
            (
                StackConfig {
                    max_nodes: 64,
                    ..base.clone()
                },
                ConfigError::TooManyNodes {
                    requested: 64,
                    capacity: NODES,
                },
            ),
            (
                StackConfig {
                    cts_window: 0,
                    ..base.clone()
                },
                ConfigError::ZeroCtsWindow,
            ),
            (
                StackConfig {
                    frames_per_tick: 0,
                    ..base.clone()
                },
                ConfigError::ZeroFramesPerTick,
            ),
        ];
        for (config, error) in cases {
            assert_eq!(config.validate(NODES), Err(error));
        }
    }
}
