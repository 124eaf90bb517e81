use super::*;

#[test]
/// Insertion fails closed once the limit is reached and hands the value back.
fn test_insert_fails_closed() {
    let mut table: SlotTable<u8, 4> = SlotTable::with_limit(2);
    assert_eq!(table.insert(1), Ok(0));
    assert_eq!(table.insert(2), Ok(1));
    assert_eq!(table.insert(3), Err(3));
    assert_eq!(table.len(), 2);
    assert!(table.is_full());
}

#[test]
/// Freed slots are reused in index order.
fn test_slot_reuse() {
    let mut table: SlotTable<&str, 3> = SlotTable::new();
    table.insert("a").unwrap();
    table.insert("b").unwrap();
    assert_eq!(table.remove(0), Some("a"));
    assert_eq!(table.insert("c"), Ok(0));
    assert_eq!(table.position(|v| *v == "b"), Some(1));
}

#[test]
/// Retain drops rejected entries only.
fn test_retain() {
    let mut table: SlotTable<u16, 5> = SlotTable::new();
    for value in 1..=5 {
        table.insert(value).unwrap();
    }
    table.retain(|value| *value % 2 == 0);
    let kept: [u16; 2] = [2, 4];
    assert!(table.iter().map(|(_, v)| *v).eq(kept.iter().copied()));
}
