use cardcat_types::{EntryKind, EntryStat, Header, LogEntry, Node, ARCHIVE_FORMAT};
use pretty_assertions::assert_eq;

fn stat(offset: u64, blocks: u64) -> EntryStat {
    EntryStat {
        size: blocks * 1024,
        blocks,
        offset,
        ..Default::default()
    }
}

// ── Header ───────────────────────────────────────────────────────

#[test]
fn archive_header_is_recognised() {
    let header = Header::archive(None);
    assert_eq!(header.kind, ARCHIVE_FORMAT);
    assert!(header.is_archive());

    let decoded = Header::decode(&header.encode().unwrap()).unwrap();
    assert!(decoded.is_archive());
}

#[test]
fn foreign_header_is_not_an_archive() {
    let decoded = Header::decode(br#"{"type":"hypertrie"}"#).unwrap();
    assert_eq!(decoded.kind, "hypertrie");
    assert!(!decoded.is_archive());
}

#[test]
fn header_decode_rejects_garbage() {
    assert!(Header::decode(b"\x00\x01not json").is_err());
}

// ── Node ─────────────────────────────────────────────────────────

#[test]
fn node_with_value_is_put() {
    let node = Node {
        path: "/Austen/Emma/emma.epub".into(),
        value: Some(stat(0, 3)),
    };
    assert_eq!(node.kind(), EntryKind::Put);

    let entry = node.into_entry(4);
    assert_eq!(entry, LogEntry::put(4, "/Austen/Emma/emma.epub", stat(0, 3)));
}

#[test]
fn node_without_value_is_del() {
    let node = Node::decode(br#"{"path":"/gone.txt"}"#).unwrap();
    assert_eq!(node.kind(), EntryKind::Del);
    assert_eq!(node.into_entry(9), LogEntry::del(9, "/gone.txt"));
}

#[test]
fn node_from_entry_keeps_stat() {
    let entry = LogEntry::put(2, "/a.txt", stat(5, 2));
    let node = Node::from(&entry);
    let decoded = Node::decode(&node.encode().unwrap()).unwrap();
    assert_eq!(decoded.into_entry(2), entry);
}

// ── EntryStat ────────────────────────────────────────────────────

#[test]
fn block_range_is_inclusive() {
    let s = stat(10, 10);
    assert_eq!(s.block_range(), Some((10, 19)));
    assert!(s.contains_block(10));
    assert!(s.contains_block(19));
    assert!(!s.contains_block(20));
    assert!(!s.contains_block(9));
}

#[test]
fn empty_file_has_no_blocks() {
    let s = stat(4, 0);
    assert_eq!(s.block_range(), None);
    assert!(!s.contains_block(4));
}

#[test]
fn overflowing_range_is_rejected() {
    let s = stat(u64::MAX, 2);
    assert_eq!(s.block_range(), None);
    assert!(!s.contains_block(u64::MAX));

    assert_eq!(stat(u64::MAX, 1).block_range(), Some((u64::MAX, u64::MAX)));
}

#[test]
fn entry_serializes_kind_as_type() {
    let json = serde_json::to_value(LogEntry::del(1, "/x")).unwrap();
    assert_eq!(json["type"], "del");
    assert!(json.get("stat").is_none());
}
