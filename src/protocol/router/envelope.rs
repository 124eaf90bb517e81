//! Received-message envelope shared by reference count.
//!
//! Decoding produces one envelope with a use count of 1. Handlers and tasks
//! that need the message past their call keep a clone; the decoded record
//! goes back to the arena when the last clone is dropped.
use alloc::sync::Arc;
use embassy_sync::blocking_mutex::raw::RawMutex;

use crate::core::PgnValue;
use crate::infra::codec::record::PgnRecord;
use crate::protocol::catalog::{CatalogEntry, GroupFunction};

struct Inner<M: RawMutex> {
    pgn: u32,
    group_function: GroupFunction,
    entry: &'static CatalogEntry,
    record: PgnRecord<M>,
    source: u8,
    destination: u8,
    priority: u8,
    port: u8,
}

/// Decoded message with its addressing.
pub struct Envelope<M: RawMutex> {
    inner: Arc<Inner<M>>,
}

/// Addressing of a received message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Origin {
    pub source: u8,
    pub destination: u8,
    pub priority: u8,
    /// Bus the message arrived on, `0` for the local port and loopback.
    pub port: u8,
}

impl<M: RawMutex> Envelope<M> {
    pub(crate) fn new(entry: &'static CatalogEntry, group_function: GroupFunction, record: PgnRecord<M>, origin: Origin) -> Self {
        Self {
            inner: Arc::new(Inner {
                pgn: entry.pgn,
                group_function,
                entry,
                record,
                source: origin.source,
                destination: origin.destination,
                priority: origin.priority,
                port: origin.port,
            }),
        }
    }

    pub fn pgn(&self) -> u32 {
        self.inner.pgn
    }

    pub fn group_function(&self) -> GroupFunction {
        self.inner.group_function
    }

    pub fn entry(&self) -> &'static CatalogEntry {
        self.inner.entry
    }

    pub fn record(&self) -> &PgnRecord<M> {
        &self.inner.record
    }

    /// Fixed-part field shortcut.
    pub fn value(&self, field_id: &str) -> Option<PgnValue> {
        self.inner.record.value(field_id)
    }

    pub fn source(&self) -> u8 {
        self.inner.source
    }

    pub fn destination(&self) -> u8 {
        self.inner.destination
    }

    pub fn priority(&self) -> u8 {
        self.inner.priority
    }

    pub fn port(&self) -> u8 {
        self.inner.port
    }

    /// Number of live handles on this message.
    pub fn use_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }

    /// Take another handle; same as `clone`.
    pub fn retain(&self) -> Self {
        self.clone()
    }

    /// Give this handle up; same as `drop`.
    pub fn release(self) {}
}

impl<M: RawMutex> Clone for Envelope<M> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<M: RawMutex> core::fmt::Debug for Envelope<M> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Envelope")
            .field("pgn", &self.inner.pgn)
            .field("group_function", &self.inner.group_function)
            .field("source", &self.inner.source)
            .field("destination", &self.inner.destination)
            .field("use_count", &self.use_count())
            .finish()
    }
}
