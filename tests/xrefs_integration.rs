use reanal::{Xref, XrefKind, XrefStore};

fn sample() -> XrefStore {
    let mut store = XrefStore::new();
    store.set(0x1000, 0x2000, XrefKind::Call);
    store.set(0x1010, 0x2000, XrefKind::Call);
    store.set(0x1010, 0x2000, XrefKind::Code);
    store.set(0x1020, 0x3000, XrefKind::Data);
    store
}

#[test]
fn both_directions_agree() {
    let store = sample();
    for x in store.list() {
        assert!(store.get(x.to).contains(&x), "{} missing from reverse index", x);
        assert!(store.get_from(x.from).contains(&x), "{} missing from forward index", x);
    }
    assert_eq!(store.count(), 4);
    assert_eq!(store.get(0x2000).len(), 3);
    assert_eq!(store.get_kind(0x2000, XrefKind::Call).len(), 2);
    assert_eq!(
        store.get_from(0x1010),
        vec![
            Xref::new(0x1010, 0x2000, XrefKind::Code),
            Xref::new(0x1010, 0x2000, XrefKind::Call),
        ]
    );
}

#[test]
fn duplicates_and_unknown_kinds() {
    let mut store = sample();
    assert!(store.set(0x1000, 0x2000, XrefKind::Call));
    assert_eq!(store.count(), 4);
    assert!(!store.set(0x1030, 0x2000, XrefKind::Unknown));
    assert!(store.get_from(0x1030).is_empty());
}

#[test]
fn delete_updates_both_indices() {
    let mut store = sample();
    assert!(store.delete(0x1010, 0x2000, XrefKind::Call));
    assert!(!store.delete(0x1010, 0x2000, XrefKind::Call));
    assert!(!store.contains(0x1010, 0x2000, XrefKind::Call));
    assert!(store.contains(0x1010, 0x2000, XrefKind::Code));
    assert_eq!(store.get_kind(0x2000, XrefKind::Call).len(), 1);

    store.delete(0x1020, 0x3000, XrefKind::Data);
    assert!(store.get(0x3000).is_empty());
    assert!(store.get_from(0x1020).is_empty());
    store.clear();
    assert!(store.is_empty());
}

#[test]
fn serde_preserves_edges() {
    let store = sample();
    let json = serde_json::to_string(&store).unwrap();
    let back: XrefStore = serde_json::from_str(&json).unwrap();
    assert_eq!(back, store);

    let mut merged = XrefStore::new();
    merged.extend(store.list());
    assert_eq!(merged.count(), store.count());
}
