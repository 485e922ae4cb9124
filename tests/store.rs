//! Document store semantics: CRUD, scans, transactions, id handling.

use std::collections::BTreeMap;

use semstore::error::Error;
use semstore::store::DocumentStore;

fn meta(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

fn open_store(tmp: &tempfile::TempDir) -> DocumentStore {
    DocumentStore::open(&tmp.path().join("store.db")).expect("open")
}

#[test]
fn add_then_get_returns_what_was_written() {
    let tmp = tempfile::TempDir::new().unwrap();
    let mut store = open_store(&tmp);

    let id = store
        .add("hello world", &meta(&[("topic", "greeting")]), None)
        .unwrap();
    assert!(id.starts_with("doc_"));

    let doc = store.get(&id).unwrap().expect("document exists");
    assert_eq!(doc.text, "hello world");
    assert_eq!(doc.metadata.get("topic").map(String::as_str), Some("greeting"));
    assert!(doc.created_at > 0);
    assert!(doc.updated_at >= doc.created_at);
}

#[test]
fn custom_id_is_respected_and_conflicts_fail() {
    let tmp = tempfile::TempDir::new().unwrap();
    let mut store = open_store(&tmp);

    let id = store.add("a", &BTreeMap::new(), Some("k")).unwrap();
    assert_eq!(id, "k");

    let err = store.add("a", &BTreeMap::new(), Some("k")).unwrap_err();
    assert!(matches!(err, Error::IdConflict(_)));
    assert_eq!(store.count().unwrap(), 1);
}

#[test]
fn empty_custom_id_falls_back_to_generated() {
    let tmp = tempfile::TempDir::new().unwrap();
    let mut store = open_store(&tmp);

    let id = store.add("a", &BTreeMap::new(), Some("")).unwrap();
    assert!(id.starts_with("doc_"));
}

#[test]
fn upsert_preserves_created_at_and_replaces_metadata() {
    let tmp = tempfile::TempDir::new().unwrap();
    let mut store = open_store(&tmp);

    let existed = store
        .upsert("doc_x", "foo", &meta(&[("a", "1"), ("b", "2")]))
        .unwrap();
    assert!(!existed);
    let first = store.get("doc_x").unwrap().unwrap();

    let existed = store.upsert("doc_x", "bar", &meta(&[("c", "3")])).unwrap();
    assert!(existed);
    let second = store.get("doc_x").unwrap().unwrap();

    assert_eq!(second.text, "bar");
    assert_eq!(second.created_at, first.created_at);
    // Old metadata is gone wholesale, not merged.
    assert_eq!(second.metadata, meta(&[("c", "3")]));
    assert_eq!(store.count().unwrap(), 1);
}

#[test]
fn update_of_unknown_id_is_a_noop() {
    let tmp = tempfile::TempDir::new().unwrap();
    let mut store = open_store(&tmp);

    assert!(!store.update("missing", "text", &BTreeMap::new()).unwrap());
    assert_eq!(store.count().unwrap(), 0);
}

#[test]
fn delete_cascades_metadata() {
    let tmp = tempfile::TempDir::new().unwrap();
    let mut store = open_store(&tmp);

    let id = store
        .add("tagged", &meta(&[("topic", "nature")]), None)
        .unwrap();
    assert_eq!(store.get_by_metadata("topic", "nature").unwrap().len(), 1);

    assert!(store.delete(&id).unwrap());
    assert!(store.get(&id).unwrap().is_none());
    assert!(store.get_by_metadata("topic", "nature").unwrap().is_empty());
    assert!(!store.delete(&id).unwrap());
}

#[test]
fn substring_search_is_literal_and_ordered() {
    let tmp = tempfile::TempDir::new().unwrap();
    let mut store = open_store(&tmp);

    store.add("the ocean waves", &BTreeMap::new(), Some("b")).unwrap();
    store.add("ocean currents", &BTreeMap::new(), Some("a")).unwrap();
    store.add("dry land", &BTreeMap::new(), Some("c")).unwrap();
    store.add("100% ocean", &BTreeMap::new(), Some("d")).unwrap();

    let hits = store.search_substring("ocean").unwrap();
    let ids: Vec<&str> = hits.iter().map(|d| d.id.as_str()).collect();
    assert_eq!(ids, vec!["a", "b", "d"]);

    // LIKE wildcards must not be interpreted.
    let hits = store.search_substring("100%").unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].id, "d");
    assert!(store.search_substring("10x").unwrap().is_empty());
}

#[test]
fn metadata_scan_is_distinct_and_ordered() {
    let tmp = tempfile::TempDir::new().unwrap();
    let mut store = open_store(&tmp);

    store
        .add("one", &meta(&[("topic", "nature"), ("lang", "en")]), Some("b"))
        .unwrap();
    store
        .add("two", &meta(&[("topic", "nature")]), Some("a"))
        .unwrap();
    store
        .add("three", &meta(&[("topic", "tech")]), Some("c"))
        .unwrap();

    let hits = store.get_by_metadata("topic", "nature").unwrap();
    let ids: Vec<&str> = hits.iter().map(|d| d.id.as_str()).collect();
    assert_eq!(ids, vec!["a", "b"]);
    assert!(store.get_by_metadata("topic", "space").unwrap().is_empty());
}

#[test]
fn rollback_discards_writes() {
    let tmp = tempfile::TempDir::new().unwrap();
    let mut store = open_store(&tmp);

    store.begin().unwrap();
    store.add("ephemeral", &BTreeMap::new(), Some("gone")).unwrap();
    assert_eq!(store.count().unwrap(), 1);
    store.rollback().unwrap();

    assert_eq!(store.count().unwrap(), 0);
    assert!(!store.exists("gone").unwrap());
}

#[test]
fn commit_makes_writes_durable() {
    let tmp = tempfile::TempDir::new().unwrap();
    let db_path = tmp.path().join("store.db");

    {
        let mut store = DocumentStore::open(&db_path).unwrap();
        store.begin().unwrap();
        store.add("kept", &BTreeMap::new(), Some("stays")).unwrap();
        store.commit().unwrap();
    }

    let store = DocumentStore::open(&db_path).unwrap();
    assert!(store.exists("stays").unwrap());
}

#[test]
fn nested_transactions_are_rejected() {
    let tmp = tempfile::TempDir::new().unwrap();
    let mut store = open_store(&tmp);

    store.begin().unwrap();
    assert!(store.begin().is_err());
    store.rollback().unwrap();
    assert!(store.rollback().is_err());
}

#[test]
fn all_ids_are_sorted() {
    let tmp = tempfile::TempDir::new().unwrap();
    let mut store = open_store(&tmp);

    for id in ["m", "a", "z", "k"] {
        store.add("text", &BTreeMap::new(), Some(id)).unwrap();
    }
    assert_eq!(store.all_ids().unwrap(), vec!["a", "k", "m", "z"]);
}
