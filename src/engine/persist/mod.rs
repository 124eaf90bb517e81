//! Blob layouts of the persisted parameters and the layered load.
//!
//! ```text
//! Address  : [address]
//! Name     : [counter, NAME LE 8]
//! TxTimers : [counter, {pgn LE 3, gf, destination, period LE 2} x TX]
//! RxTimers : [counter, {pgn LE 3, gf, window LE 2} x RX]
//! ```
//!
//! Unused timer slots are all `0xFF`. The counter is bumped on every save.
use embassy_sync::blocking_mutex::raw::RawMutex;

use super::platform::{ConfigLayer, ParamType, Platform};
use crate::error::{PlatformError, TimerError};
use crate::protocol::catalog::GroupFunction;
use crate::protocol::managment::iso_name::IsoName;
use crate::protocol::timers::{TimerKey, TimerService, NO_CHANGE};

pub const ADDRESS_LEN: usize = 1;
pub const NAME_LEN: usize = 1 + 8;
pub const TX_RECORD: usize = 7;
pub const RX_RECORD: usize = 6;

const EMPTY_PGN: u32 = 0x00FF_FFFF;

pub const fn tx_blob_len(slots: usize) -> usize {
    1 + slots * TX_RECORD
}

pub const fn rx_blob_len(slots: usize) -> usize {
    1 + slots * RX_RECORD
}

/// Save counters of the blobs that carry one.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AccessCounters {
    pub name: u8,
    pub tx_timers: u8,
    pub rx_timers: u8,
}

/// Read `param` from the `User` layer, falling back to `Factory`. Returns
/// the layer the blob came from.
pub fn load_layered<M: RawMutex, P: Platform<M>>(
    platform: &mut P,
    param: ParamType,
    out: &mut [u8],
) -> Result<ConfigLayer, PlatformError> {
    match platform.load(param, ConfigLayer::User, out) {
        Ok(()) => Ok(ConfigLayer::User),
        Err(_) => platform
            .load(param, ConfigLayer::Factory, out)
            .map(|()| ConfigLayer::Factory),
    }
}

pub fn encode_name(counter: u8, name: IsoName) -> [u8; NAME_LEN] {
    let mut blob = [0u8; NAME_LEN];
    blob[0] = counter;
    blob[1..].copy_from_slice(&name.to_claim());
    blob
}

/// `(counter, NAME)` of a name blob.
pub fn decode_name(blob: &[u8; NAME_LEN]) -> (u8, IsoName) {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&blob[1..]);
    (blob[0], IsoName::from_raw(u64::from_le_bytes(raw)))
}

/// Write the periodic transmit timers into `out` (`tx_blob_len(TX)` bytes).
/// One-shot timers are not persisted.
pub fn encode_tx_timers<const TX: usize, const RX: usize>(
    timers: &TimerService<TX, RX>,
    counter: u8,
    out: &mut [u8],
) {
    out.fill(0xFF);
    out[0] = counter;
    let records = out[1..].chunks_exact_mut(TX_RECORD);
    for (timer, record) in timers.transmit_timers().filter(|t| !t.is_one_shot()).zip(records) {
        record[..3].copy_from_slice(&timer.key.pgn.to_le_bytes()[..3]);
        record[3] = timer.key.group_function.to_byte();
        record[4] = timer.destination;
        record[5..7].copy_from_slice(&timer.period.to_le_bytes());
    }
}

/// Install the timers of a transmit blob. Returns its counter.
pub fn decode_tx_timers<const TX: usize, const RX: usize>(
    blob: &[u8],
    timers: &mut TimerService<TX, RX>,
) -> Result<u8, TimerError> {
    for record in blob[1..].chunks_exact(TX_RECORD) {
        let Some(key) = record_key(record) else {
            continue;
        };
        let period = u16::from_le_bytes([record[5], record[6]]);
        if period == 0 || period == NO_CHANGE {
            continue;
        }
        timers.set_transmit_timer(key, record[4], period, NO_CHANGE)?;
    }
    Ok(blob[0])
}

pub fn encode_rx_timers<const TX: usize, const RX: usize>(
    timers: &TimerService<TX, RX>,
    counter: u8,
    out: &mut [u8],
) {
    out.fill(0xFF);
    out[0] = counter;
    let records = out[1..].chunks_exact_mut(RX_RECORD);
    for (timer, record) in timers.receive_timers().zip(records) {
        record[..3].copy_from_slice(&timer.key.pgn.to_le_bytes()[..3]);
        record[3] = timer.key.group_function.to_byte();
        record[4..6].copy_from_slice(&timer.window.to_le_bytes());
    }
}

pub fn decode_rx_timers<const TX: usize, const RX: usize>(
    blob: &[u8],
    timers: &mut TimerService<TX, RX>,
) -> Result<u8, TimerError> {
    for record in blob[1..].chunks_exact(RX_RECORD) {
        let Some(key) = record_key(record) else {
            continue;
        };
        let window = u16::from_le_bytes([record[4], record[5]]);
        if window == 0 || window == NO_CHANGE {
            continue;
        }
        timers.set_receive_timeout(key, window)?;
    }
    Ok(blob[0])
}

fn record_key(record: &[u8]) -> Option<TimerKey> {
    let pgn = u32::from_le_bytes([record[0], record[1], record[2], 0]);
    (pgn != EMPTY_PGN).then(|| TimerKey {
        pgn,
        group_function: GroupFunction::from_byte(record[3]),
    })
}
