//! Host services the stack consumes: non-volatile parameters and event
//! notifications. Every notification has a no-op default so a host only
//! implements what it cares about.
use embassy_sync::blocking_mutex::raw::RawMutex;

use crate::error::{PlatformError, StackError};
use crate::protocol::managment::address_claiming::ClaimState;
use crate::protocol::managment::iso_name::IsoName;
use crate::protocol::managment::node_table::NodeEvent;
use crate::protocol::router::envelope::Envelope;
use crate::protocol::timers::TimerKey;

/// Persisted parameter blobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ParamType {
    /// Last claimed address, 1 byte.
    Address,
    /// Access counter and NAME.
    Name,
    /// Access counter and the transmit timer table.
    TxTimers,
    /// Access counter and the receive timeout table.
    RxTimers,
}

/// Storage layer a parameter is read from or written to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConfigLayer {
    /// Defaults shipped with the firmware.
    Factory,
    /// Integrator defaults.
    Oem,
    /// Values changed at runtime.
    User,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum NetworkState {
    Claim(ClaimState),
    BusOff,
    BusWarning,
    /// Error counters back to normal.
    BusActive,
}

pub trait Platform<M: RawMutex> {
    /// Fill `out` with the stored blob. The blob must be exactly
    /// `out.len()` bytes, otherwise `SizeMismatch`.
    fn load(&mut self, param: ParamType, layer: ConfigLayer, out: &mut [u8]) -> Result<(), PlatformError>;

    fn save(&mut self, param: ParamType, layer: ConfigLayer, data: &[u8]) -> Result<(), PlatformError>;

    fn network_state(&mut self, _state: NetworkState) {}

    fn node_changed(&mut self, _event: NodeEvent, _address: u8, _name: IsoName) {}

    /// ISO acknowledgements and address claims, after the stack acted on them.
    fn internal_message(&mut self, _envelope: &Envelope<M>) {}

    fn report_error(&mut self, _error: StackError) {}

    /// A transmit timer fired: the application should send `key` now.
    fn transmit_due(&mut self, _key: TimerKey, _destination: u8) {}

    fn receive_timeout(&mut self, _key: TimerKey) {}
}

/// Platform without storage or notifications.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullPlatform;

impl<M: RawMutex> Platform<M> for NullPlatform {
    fn load(&mut self, _param: ParamType, _layer: ConfigLayer, _out: &mut [u8]) -> Result<(), PlatformError> {
        Err(PlatformError::NotFound)
    }

    fn save(&mut self, _param: ParamType, _layer: ConfigLayer, _data: &[u8]) -> Result<(), PlatformError> {
        Ok(())
    }
}
