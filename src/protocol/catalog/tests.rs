//! Catalogue validation and lookup.
use super::*;
use crate::core::{FieldDescriptor, FieldKind, GroupFunctionField, PartDescriptor};
use crate::error::DescriptorError;

static GF_FIELDS: [FieldDescriptor; 2] = [
    FieldDescriptor::number("function", FieldKind::UChar, 0, 0),
    FieldDescriptor::number("value", FieldKind::UInt, 8, 2),
];

/// Command-style message selected by its first byte.
static COMMAND: MessageDescriptor = MessageDescriptor {
    fixed: PartDescriptor {
        wire_len: 3,
        record_size: 4,
        fields: &GF_FIELDS,
    },
    variable: None,
    priority: 3,
    group_function: Some(GroupFunctionField {
        bit_offset: 0,
        bits: 8,
    }),
};

static PLAIN_FIELDS: [FieldDescriptor; 1] = [FieldDescriptor::number("level", FieldKind::UInt, 0, 0)];

static PLAIN: MessageDescriptor = MessageDescriptor {
    fixed: PartDescriptor {
        wire_len: 2,
        record_size: 2,
        fields: &PLAIN_FIELDS,
    },
    variable: None,
    priority: 6,
    group_function: None,
};

static BROKEN_FIELDS: [FieldDescriptor; 1] = [FieldDescriptor::number("level", FieldKind::ULong, 0, 0)];

/// Four-byte field squeezed into a two-byte record.
static BROKEN: MessageDescriptor = MessageDescriptor {
    fixed: PartDescriptor {
        wire_len: 4,
        record_size: 2,
        fields: &BROKEN_FIELDS,
    },
    variable: None,
    priority: 6,
    group_function: None,
};

const RX_TX: EntryFlags = EntryFlags::RX.union(EntryFlags::TX);

static APPLICATION: [CatalogEntry; 4] = [
    CatalogEntry::new(126_208, RX_TX, &COMMAND),
    CatalogEntry::new(126_208, RX_TX, &COMMAND).with_group_function(1),
    CatalogEntry::new(126_208, RX_TX, &COMMAND).with_group_function(2),
    CatalogEntry::new(127_505, RX_TX, &PLAIN).with_fast_packet(3),
];

#[test]
/// A sorted application table is accepted and chained with the system one.
fn test_catalog_accepts_sorted_entries() {
    let catalog = Catalog::new(&APPLICATION).unwrap();
    assert_eq!(catalog.entries().count(), 4 + system::ENTRIES.len());
    assert_eq!(catalog.fast_packet_class(127_505), Some(3));
    assert_eq!(catalog.fast_packet_class(126_208), None);
    assert!(catalog.lookup(pgn::ADDRESS_CLAIM, GroupFunction::DontCare).is_some());
}

#[test]
/// Lookup tolerates `DontCare` on either side.
fn test_lookup_dont_care() {
    let catalog = Catalog::new(&APPLICATION).unwrap();
    let specific = catalog.lookup(126_208, GroupFunction::Code(2)).unwrap();
    assert_eq!(specific.group_function, GroupFunction::Code(2));

    let fallback = catalog.lookup(126_208, GroupFunction::Code(9)).unwrap();
    assert_eq!(fallback.group_function, GroupFunction::DontCare);

    let plain = catalog.lookup(127_505, GroupFunction::Code(4)).unwrap();
    assert_eq!(plain.pgn, 127_505);
    assert!(catalog.lookup(1_000, GroupFunction::DontCare).is_none());
}

#[test]
/// Receivability covers every group function and the system table.
fn test_receives() {
    static SEND_ONLY: [CatalogEntry; 1] = [CatalogEntry::new(127_505, EntryFlags::TX, &PLAIN)];
    let catalog = Catalog::new(&APPLICATION).unwrap();
    assert!(catalog.receives(126_208));
    assert!(catalog.receives(pgn::ADDRESS_CLAIM));
    assert!(!catalog.receives(pgn::TP_DT));
    assert!(!catalog.receives(65_400));

    let catalog = Catalog::new(&SEND_ONLY).unwrap();
    assert!(!catalog.receives(127_505));
}

#[test]
/// The selector byte read from the payload picks the specific entry.
fn test_resolve_reads_group_function() {
    let catalog = Catalog::new(&APPLICATION).unwrap();
    let entry = catalog.resolve(126_208, &[0x01, 0x34, 0x12]).unwrap();
    assert_eq!(entry.group_function, GroupFunction::Code(1));
    let entry = catalog.resolve(126_208, &[0x07, 0x34, 0x12]).unwrap();
    assert_eq!(entry.group_function, GroupFunction::DontCare);
}

#[test]
/// Out-of-order and duplicate keys are refused.
fn test_catalog_rejects_bad_order() {
    static UNSORTED: [CatalogEntry; 2] = [
        CatalogEntry::new(127_505, EntryFlags::RX, &PLAIN),
        CatalogEntry::new(126_208, EntryFlags::RX, &COMMAND),
    ];
    static DUPLICATE: [CatalogEntry; 2] = [
        CatalogEntry::new(127_505, EntryFlags::RX, &PLAIN),
        CatalogEntry::new(127_505, EntryFlags::TX, &PLAIN),
    ];
    static SYSTEM_CLASH: [CatalogEntry; 1] =
        [CatalogEntry::new(pgn::ADDRESS_CLAIM, EntryFlags::RX, &PLAIN)];

    assert_eq!(
        Catalog::new(&UNSORTED).unwrap_err(),
        CatalogError::Unsorted { index: 1 }
    );
    assert_eq!(
        Catalog::new(&DUPLICATE).unwrap_err(),
        CatalogError::Duplicate { pgn: 127_505 }
    );
    assert_eq!(
        Catalog::new(&SYSTEM_CLASH).unwrap_err(),
        CatalogError::Duplicate {
            pgn: pgn::ADDRESS_CLAIM
        }
    );
}

#[test]
/// Descriptor faults and reused fast-packet classes are caught at build time.
fn test_catalog_rejects_bad_entries() {
    static BAD_DESCRIPTOR: [CatalogEntry; 1] = [CatalogEntry::new(127_000, EntryFlags::RX, &BROKEN)];
    static SHARED_CLASS: [CatalogEntry; 2] = [
        CatalogEntry::new(127_000, EntryFlags::RX, &PLAIN).with_fast_packet(1),
        CatalogEntry::new(127_001, EntryFlags::RX, &PLAIN).with_fast_packet(1),
    ];
    static CLASS_RANGE: [CatalogEntry; 1] =
        [CatalogEntry::new(127_000, EntryFlags::RX, &PLAIN).with_fast_packet(64)];

    assert_eq!(
        Catalog::new(&BAD_DESCRIPTOR).unwrap_err(),
        CatalogError::Descriptor {
            pgn: 127_000,
            error: DescriptorError::RecordSizeMismatch { field: "level" },
        }
    );
    assert_eq!(
        Catalog::new(&SHARED_CLASS).unwrap_err(),
        CatalogError::DuplicateFastPacketClass { class: 1 }
    );
    assert_eq!(
        Catalog::new(&CLASS_RANGE).unwrap_err(),
        CatalogError::FastPacketClassOutOfRange { class: 64 }
    );
}

#[test]
/// Network-management descriptors are self-consistent.
fn test_system_entries_valid() {
    for entry in system::ENTRIES.iter() {
        entry.descriptor.validate().unwrap();
    }
}

#[test]
/// Flag sets combine and test like bit masks.
fn test_entry_flags() {
    let flags = EntryFlags::RX | EntryFlags::REQUEST;
    assert!(flags.contains(EntryFlags::RX));
    assert!(!flags.contains(EntryFlags::TX));
    assert!(flags.contains(EntryFlags::NONE));
    assert_eq!(GroupFunction::from_byte(0xFF), GroupFunction::DontCare);
    assert!(GroupFunction::Code(3).matches(GroupFunction::DontCare));
    assert!(!GroupFunction::Code(3).matches(GroupFunction::Code(4)));
}
