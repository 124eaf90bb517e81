//! Network-management messages the engine speaks on its own: ISO
//! acknowledgement, ISO request, transport control/data and address claim.
//! Sorted by PGN.
use super::{pgn, CatalogEntry, EntryFlags};
use crate::core::{FieldDescriptor, FieldKind, MessageDescriptor, PartDescriptor};

/// ISO acknowledgement control codes (first byte of PGN 59392).
pub mod ack_control {
    pub const ACK: u8 = 0;
    pub const NAK: u8 = 1;
    pub const ACCESS_DENIED: u8 = 2;
    pub const CANNOT_RESPOND: u8 = 3;
}

static ISO_ACK_FIELDS: [FieldDescriptor; 4] = [
    FieldDescriptor::number("control", FieldKind::UChar, 0, 0),
    FieldDescriptor::number("group_function", FieldKind::UChar, 8, 1),
    FieldDescriptor::number("address", FieldKind::UChar, 32, 2),
    FieldDescriptor::bits("pgn", 40, 24, 4, 4),
];

pub static ISO_ACK: MessageDescriptor = MessageDescriptor {
    fixed: PartDescriptor {
        wire_len: 8,
        record_size: 8,
        fields: &ISO_ACK_FIELDS,
    },
    variable: None,
    priority: 6,
    group_function: None,
};

static ISO_REQUEST_FIELDS: [FieldDescriptor; 1] = [FieldDescriptor::bits("pgn", 0, 24, 0, 4)];

pub static ISO_REQUEST: MessageDescriptor = MessageDescriptor {
    fixed: PartDescriptor {
        wire_len: 3,
        record_size: 4,
        fields: &ISO_REQUEST_FIELDS,
    },
    variable: None,
    priority: 6,
    group_function: None,
};

static TP_DT_FIELDS: [FieldDescriptor; 2] = [
    FieldDescriptor::number("sequence", FieldKind::UChar, 0, 0),
    FieldDescriptor::string("data", 8, 7, 1),
];

pub static TP_DT: MessageDescriptor = MessageDescriptor {
    fixed: PartDescriptor {
        wire_len: 8,
        record_size: 8,
        fields: &TP_DT_FIELDS,
    },
    variable: None,
    priority: 7,
    group_function: None,
};

static TP_CM_FIELDS: [FieldDescriptor; 5] = [
    FieldDescriptor::number("control", FieldKind::UChar, 0, 0),
    FieldDescriptor::number("size", FieldKind::UInt, 8, 2),
    FieldDescriptor::number("packets", FieldKind::UChar, 24, 4),
    FieldDescriptor::number("max_per_cts", FieldKind::UChar, 32, 5),
    FieldDescriptor::bits("pgn", 40, 24, 8, 4),
];

pub static TP_CM: MessageDescriptor = MessageDescriptor {
    fixed: PartDescriptor {
        wire_len: 8,
        record_size: 12,
        fields: &TP_CM_FIELDS,
    },
    variable: None,
    priority: 7,
    group_function: None,
};

static ADDRESS_CLAIM_FIELDS: [FieldDescriptor; 9] = [
    FieldDescriptor::bits("unique_number", 0, 21, 0, 4),
    FieldDescriptor::bits("manufacturer_code", 21, 11, 4, 2),
    FieldDescriptor::bits("device_instance_lower", 32, 3, 6, 1),
    FieldDescriptor::bits("device_instance_upper", 35, 5, 7, 1),
    FieldDescriptor::number("device_function", FieldKind::UChar, 40, 8),
    FieldDescriptor::bits("device_class", 49, 7, 9, 1),
    FieldDescriptor::bits("system_instance", 56, 4, 10, 1),
    FieldDescriptor::bits("industry_group", 60, 3, 11, 1),
    FieldDescriptor::bits("arbitrary_address_capable", 63, 1, 12, 1),
];

pub static ADDRESS_CLAIM: MessageDescriptor = MessageDescriptor {
    fixed: PartDescriptor {
        wire_len: 8,
        record_size: 13,
        fields: &ADDRESS_CLAIM_FIELDS,
    },
    variable: None,
    priority: 6,
    group_function: None,
};

const MANAGEMENT: EntryFlags = EntryFlags::RX
    .union(EntryFlags::TX)
    .union(EntryFlags::PDU1)
    .union(EntryFlags::IGNORE_UNHANDLED);

/// Consumed by the transport layer before routing.
const TRANSPORT: EntryFlags = EntryFlags::TX
    .union(EntryFlags::PDU1)
    .union(EntryFlags::IGNORE_UNHANDLED);

pub static ENTRIES: [CatalogEntry; 5] = [
    CatalogEntry::new(pgn::ISO_ACK, MANAGEMENT, &ISO_ACK),
    CatalogEntry::new(pgn::ISO_REQUEST, MANAGEMENT, &ISO_REQUEST),
    CatalogEntry::new(pgn::TP_DT, TRANSPORT, &TP_DT),
    CatalogEntry::new(pgn::TP_CM, TRANSPORT, &TP_CM),
    CatalogEntry::new(
        pgn::ADDRESS_CLAIM,
        MANAGEMENT.union(EntryFlags::REQUEST),
        &ADDRESS_CLAIM,
    ),
];
