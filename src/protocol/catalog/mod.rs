//! Message catalogue: which Parameter Groups the node knows, how each is
//! laid out, and what the node may do with it.
//!
//! An application supplies one sorted `&'static [CatalogEntry]`; the
//! network-management entries of [`system`] are always appended behind it.
use core::cmp::Ordering;
use core::ops::BitOr;

use crate::core::MessageDescriptor;
use crate::error::CatalogError;
use crate::infra::codec::engine::read_group_function;
use crate::protocol::transport::fast_packet::FAST_PACKET_CLASSES;

pub mod system;

/// Well-known parameter group numbers spoken by the engine itself.
pub mod pgn {
    pub const ISO_ACK: u32 = 59_392;
    pub const ISO_REQUEST: u32 = 59_904;
    pub const TP_DT: u32 = 60_160;
    pub const TP_CM: u32 = 60_416;
    pub const ADDRESS_CLAIM: u32 = 60_928;
}

/// Secondary selector of a catalogue entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum GroupFunction {
    /// Matches every group function.
    DontCare,
    Code(u8),
}

impl GroupFunction {
    /// One-byte image used in persisted tables and ISO acknowledgements.
    pub const fn to_byte(self) -> u8 {
        match self {
            GroupFunction::DontCare => 0xFF,
            GroupFunction::Code(code) => code,
        }
    }

    pub const fn from_byte(byte: u8) -> Self {
        match byte {
            0xFF => GroupFunction::DontCare,
            code => GroupFunction::Code(code),
        }
    }

    /// Whether two selectors designate the same message, `DontCare` matching
    /// anything.
    pub fn matches(self, other: GroupFunction) -> bool {
        match (self, other) {
            (GroupFunction::DontCare, _) | (_, GroupFunction::DontCare) => true,
            (GroupFunction::Code(a), GroupFunction::Code(b)) => a == b,
        }
    }
}

/// Capabilities of a catalogue entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct EntryFlags(u8);

impl EntryFlags {
    pub const NONE: Self = Self(0);
    /// The node accepts the message.
    pub const RX: Self = Self(1 << 0);
    /// The node may send the message.
    pub const TX: Self = Self(1 << 1);
    /// The node answers ISO requests for the message.
    pub const REQUEST: Self = Self(1 << 2);
    /// Reception must be switched on at runtime.
    pub const DYNAMIC: Self = Self(1 << 3);
    /// Destination-specific message.
    pub const PDU1: Self = Self(1 << 4);
    /// No "not available" NAK when nothing handles it.
    pub const IGNORE_UNHANDLED: Self = Self(1 << 5);
    /// Requests are answered with "access denied" instead of NAK.
    pub const DENY_ON_REQUEST: Self = Self(1 << 6);

    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn bits(self) -> u8 {
        self.0
    }
}

impl BitOr for EntryFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        self.union(rhs)
    }
}

/// One known Parameter Group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CatalogEntry {
    pub pgn: u32,
    pub group_function: GroupFunction,
    /// Sequence class for fast-packet framing, `None` for single-frame or
    /// segmented messages.
    pub fast_packet_class: Option<u8>,
    pub flags: EntryFlags,
    pub descriptor: &'static MessageDescriptor,
}

impl CatalogEntry {
    pub const fn new(pgn: u32, flags: EntryFlags, descriptor: &'static MessageDescriptor) -> Self {
        Self {
            pgn,
            group_function: GroupFunction::DontCare,
            fast_packet_class: None,
            flags,
            descriptor,
        }
    }

    pub const fn with_group_function(mut self, code: u8) -> Self {
        self.group_function = GroupFunction::Code(code);
        self
    }

    pub const fn with_fast_packet(mut self, class: u8) -> Self {
        self.fast_packet_class = Some(class);
        self
    }

    pub const fn has(&self, flags: EntryFlags) -> bool {
        self.flags.contains(flags)
    }

    fn key(&self) -> (u32, GroupFunction) {
        (self.pgn, self.group_function)
    }
}

/// Validated, sorted catalogue.
#[derive(Debug, Clone, Copy)]
pub struct Catalog {
    application: &'static [CatalogEntry],
}

impl Catalog {
    /// Validate `entries` and build the catalogue.
    ///
    /// Entries must be sorted by `(pgn, group_function)` with `DontCare`
    /// first, unique (system PGNs included), use each fast-packet class at most
    /// once, and carry consistent descriptors.
    pub fn new(entries: &'static [CatalogEntry]) -> Result<Self, CatalogError> {
        check_entries(entries)?;
        for entry in entries {
            if system::ENTRIES.iter().any(|system| system.key() == entry.key()) {
                return Err(CatalogError::Duplicate { pgn: entry.pgn });
            }
        }
        Ok(Self {
            application: entries,
        })
    }

    /// Catalogue holding only the network-management entries.
    pub fn system_only() -> Self {
        Self { application: &[] }
    }

    /// Application entries followed by the system ones.
    pub fn entries(&self) -> impl Iterator<Item = &'static CatalogEntry> {
        self.application.iter().chain(system::ENTRIES.iter())
    }

    /// Entry for `(pgn, group_function)`, `DontCare` matching on either side.
    pub fn lookup(&self, pgn: u32, group_function: GroupFunction) -> Option<&'static CatalogEntry> {
        lookup_in(self.application, pgn, group_function)
            .or_else(|| lookup_in(&system::ENTRIES, pgn, group_function))
    }

    /// Entry for a received payload: when the generic entry declares a
    /// group-function selector, the selector is read from `payload` and the
    /// specific entry is preferred.
    pub fn resolve(&self, pgn: u32, payload: &[u8]) -> Option<&'static CatalogEntry> {
        let generic = self.lookup(pgn, GroupFunction::DontCare)?;
        let Some(code) = read_group_function(generic.descriptor, payload) else {
            return Some(generic);
        };
        match self.lookup(pgn, GroupFunction::Code(code)) {
            Some(entry) if entry.group_function != GroupFunction::DontCare => Some(entry),
            _ => Some(generic),
        }
    }

    /// Fast-packet class of `pgn`, if it uses fast-packet framing.
    /// Whether any group function of `pgn` is receivable.
    pub fn receives(&self, pgn: u32) -> bool {
        [self.application, &system::ENTRIES[..]].iter().any(|entries| {
            let start = entries.partition_point(|entry| entry.pgn < pgn);
            entries[start..]
                .iter()
                .take_while(|entry| entry.pgn == pgn)
                .any(|entry| entry.has(EntryFlags::RX))
        })
    }

    pub fn fast_packet_class(&self, pgn: u32) -> Option<u8> {
        self.lookup(pgn, GroupFunction::DontCare)
            .and_then(|entry| entry.fast_packet_class)
    }
}

fn lookup_in(
    entries: &'static [CatalogEntry],
    pgn: u32,
    group_function: GroupFunction,
) -> Option<&'static CatalogEntry> {
    let start = entries.partition_point(|entry| entry.pgn < pgn);
    match group_function {
        GroupFunction::DontCare => entries.get(start).filter(|entry| entry.pgn == pgn),
        code => {
            let mut fallback = None;
            for entry in entries[start..].iter().take_while(|entry| entry.pgn == pgn) {
                if entry.group_function == code {
                    return Some(entry);
                }
                if entry.group_function == GroupFunction::DontCare {
                    fallback = Some(entry);
                }
            }
            fallback
        }
    }
}

fn check_entries(entries: &[CatalogEntry]) -> Result<(), CatalogError> {
    let mut classes = [false; FAST_PACKET_CLASSES];
    for (index, entry) in entries.iter().enumerate() {
        if index > 0 {
            match entries[index - 1].key().cmp(&entry.key()) {
                Ordering::Less => {}
                Ordering::Equal => return Err(CatalogError::Duplicate { pgn: entry.pgn }),
                Ordering::Greater => return Err(CatalogError::Unsorted { index }),
            }
        }
        entry
            .descriptor
            .validate()
            .map_err(|error| CatalogError::Descriptor {
                pgn: entry.pgn,
                error,
            })?;
        if let Some(class) = entry.fast_packet_class {
            let seen = classes
                .get_mut(class as usize)
                .ok_or(CatalogError::FastPacketClassOutOfRange { class })?;
            if *seen {
                return Err(CatalogError::DuplicateFastPacketClass { class });
            }
            *seen = true;
        }
    }
    Ok(())
}

#[cfg(test)]
#[path = "tests.rs"]
mod tests;
