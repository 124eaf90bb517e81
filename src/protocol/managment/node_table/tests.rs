use super::*;
use alloc::vec::Vec;

const LOW: IsoName = IsoName::from_raw(0x10);
const MID: IsoName = IsoName::from_raw(0x20);
const HIGH: IsoName = IsoName::from_raw(0x30);

fn observe<const N: usize>(
    table: &mut NodeTable<N>,
    stats: &mut CommStats,
    address: u8,
    name: IsoName,
) -> Vec<NodeChange> {
    let mut changes = Vec::new();
    table.observe(address, name, 5, stats, |change| changes.push(change));
    changes
}

fn change(event: NodeEvent, address: u8, name: IsoName) -> NodeChange {
    NodeChange {
        event,
        address,
        name,
    }
}

#[test]
/// A first claim adds the node, a repeat only refreshes it.
fn test_new_node() {
    let mut table: NodeTable = NodeTable::new(4);
    let mut stats = CommStats::new();
    assert_eq!(
        observe(&mut table, &mut stats, 40, MID),
        [change(NodeEvent::NewNode, 40, MID)]
    );
    assert!(observe(&mut table, &mut stats, 40, MID).is_empty());
    assert_eq!(table.name_of(40), Some(MID));
    assert_eq!(table.len(), 1);
}

#[test]
/// A known NAME claiming another free address is moved.
fn test_address_changed() {
    let mut table: NodeTable = NodeTable::new(4);
    let mut stats = CommStats::new();
    observe(&mut table, &mut stats, 40, MID);
    assert_eq!(
        observe(&mut table, &mut stats, 41, MID),
        [change(NodeEvent::AddressChanged, 41, MID)]
    );
    assert_eq!(table.address_of(MID), Some(41));
    assert!(!table.contains_address(40));
}

#[test]
/// A lower NAME takes the address, a higher one is ignored.
fn test_contested_address() {
    let mut table: NodeTable = NodeTable::new(4);
    let mut stats = CommStats::new();
    observe(&mut table, &mut stats, 40, MID);

    assert!(observe(&mut table, &mut stats, 40, HIGH).is_empty());
    assert_eq!(table.name_of(40), Some(MID));
    assert_eq!(table.address_of(HIGH), None);

    assert_eq!(
        observe(&mut table, &mut stats, 40, LOW),
        [
            change(NodeEvent::BumpedOff, 40, MID),
            change(NodeEvent::NewNode, 40, LOW)
        ]
    );
    assert_eq!(table.name_of(40), Some(LOW));
    assert_eq!(table.len(), 1);
}

#[test]
/// Nodes past `max_nodes` are dropped and counted.
fn test_table_full() {
    let mut table: NodeTable<8> = NodeTable::new(2);
    let mut stats = CommStats::new();
    observe(&mut table, &mut stats, 1, LOW);
    observe(&mut table, &mut stats, 2, MID);
    assert!(observe(&mut table, &mut stats, 3, HIGH).is_empty());
    assert_eq!(stats.node_table_full, 1);
    assert_eq!(table.max_nodes(), 2);
}

#[test]
/// Silent nodes time out; traffic keeps them alive.
fn test_liveness() {
    let mut table: NodeTable = NodeTable::new(4);
    let mut stats = CommStats::new();
    observe(&mut table, &mut stats, 1, LOW);
    observe(&mut table, &mut stats, 2, MID);

    let mut expired = Vec::new();
    for _ in 0..4 {
        table.tick(|change| expired.push(change));
    }
    assert!(table.refresh(2, 5));
    table.tick(|change| expired.push(change));
    assert_eq!(expired, [change(NodeEvent::TimedOut, 1, LOW)]);
    assert_eq!(table.len(), 1);
    assert!(!table.refresh(1, 5));
}
