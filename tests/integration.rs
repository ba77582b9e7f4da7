//! Integration tests for runtara-document-store
//!
//! Run against in-memory SQLite; file-backed tests use unique paths in the
//! system temp directory. Set `RUST_LOG=runtara_document_store=debug` to see
//! the compiled SQL.

use std::path::PathBuf;

use runtara_document_store::{
    AddOptions, DeletedPolicy, DocumentStore, DocumentTarget, EncryptionKey, FieldType,
    FindOptions, ProvisionOptions, Query, QueryOperator, QueryPart, QueryPartItem, RemoveOptions,
    Replacement, Schema, SortSpec, StoreConfig, StoreManager, SyncOperation, TransactionOutcome,
    map_document, normalize,
};
use serde_json::json;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Unique database path for this test run
fn temp_db_path() -> PathBuf {
    std::env::temp_dir().join(format!("test_{}.db", uuid::Uuid::new_v4().simple()))
}

fn people_schema() -> Schema {
    Schema::builder()
        .field("name", FieldType::String)
        .field("age", FieldType::Integer)
        .build()
        .unwrap()
}

fn open_people() -> (StoreManager, DocumentStore) {
    init_tracing();
    let manager = StoreManager::open(StoreConfig::in_memory().build()).unwrap();
    let people = manager
        .provision("people", people_schema(), ProvisionOptions::default())
        .unwrap();
    (manager, people)
}

fn row_count(store: &DocumentStore) -> u64 {
    store.count(&Query::all(), DeletedPolicy::Both).unwrap()
}

// ==================== Query Scenarios ====================

#[test]
fn test_fuzzy_and_range_query_with_sort() {
    let (_manager, people) = open_people();
    people
        .add(&[json!({"name": "hayata", "age": 1})], &AddOptions::default())
        .unwrap();

    let query = Query::new(vec![
        QueryPart::new()
            .fuzzy_equals("name", "hayata")
            .unwrap()
            .less_than("age", 99)
            .unwrap(),
    ]);
    let options = FindOptions::new()
        .with_limit(10)
        .with_offset(0)
        .with_sort(vec![SortSpec::asc("name"), SortSpec::desc("age")]);

    let found = people.find(&query, &options).unwrap();

    assert_eq!(found.len(), 1);
    assert_eq!(found[0].json["name"], json!("hayata"));
    assert_eq!(found[0].json["age"], json!(1));
}

#[test]
fn test_wire_shape_query() {
    let (_manager, people) = open_people();
    people
        .add(
            &[
                json!({"name": "ann", "age": 20}),
                json!({"name": "bob", "age": 40}),
                json!({"name": "cid", "age": 60}),
            ],
            &AddOptions::default(),
        )
        .unwrap();

    let query = Query::from_json(&json!([
        [{"key": "age", "operator": "$greaterThan", "value": 30}],
        [{"key": "name", "operator": "EQUALS", "value": "ann"}]
    ]))
    .unwrap();
    let found = people
        .find(&query, &FindOptions::new().with_sort(vec![SortSpec::asc("age")]))
        .unwrap();
    let names: Vec<_> = found.iter().map(|d| d.json["name"].clone()).collect();
    assert_eq!(names, vec![json!("ann"), json!("bob"), json!("cid")]);

    let query = Query::from_json(&json!([
        [{"key": "age", "operator": "between", "value": [30, 50]}]
    ]))
    .unwrap();
    assert_eq!(people.count(&query, DeletedPolicy::Standard).unwrap(), 1);

    let query = Query::from_json(&json!([
        [{"key": "name", "operator": "not-in", "value": ["ann", "bob"]}]
    ]))
    .unwrap();
    assert_eq!(people.count(&query, DeletedPolicy::Standard).unwrap(), 1);
}

#[test]
fn test_malformed_value_shape_is_rejected() {
    let err = Query::from_json(&json!([
        [{"key": "age", "operator": "between", "value": [1]}]
    ]))
    .unwrap_err();
    assert_eq!(err.code(), "MALFORMED_QUERY");

    let err = Query::from_json(&json!([
        [{"key": "age", "operator": "in", "value": 3}]
    ]))
    .unwrap_err();
    assert_eq!(err.code(), "MALFORMED_QUERY");
}

#[test]
fn test_negative_limit_returns_last_rows_by_id() {
    let (_manager, people) = open_people();
    let ids = people
        .add(
            &[
                json!({"name": "a", "age": 3}),
                json!({"name": "b", "age": 2}),
                json!({"name": "c", "age": 1}),
            ],
            &AddOptions::default(),
        )
        .unwrap();

    let found = people
        .find_all(
            &FindOptions::new()
                .with_limit(-2)
                .with_sort(vec![SortSpec::asc("name")]),
        )
        .unwrap();

    let found_ids: Vec<i64> = found.iter().map(|d| d.id).collect();
    assert_eq!(found_ids, vec![ids[2], ids[1]]);
}

#[test]
fn test_array_equals_matches_single_element() {
    init_tracing();
    let manager = StoreManager::open(StoreConfig::in_memory().build()).unwrap();
    let tagged = manager
        .provision(
            "tagged",
            Schema::builder()
                .field("tags", FieldType::String)
                .build()
                .unwrap(),
            ProvisionOptions::default(),
        )
        .unwrap();
    tagged
        .add(&[json!({"tags": ["a", "b", "c"]})], &AddOptions::default())
        .unwrap();

    for (value, expected) in [("a", 1), ("b", 1), ("c", 1), ("z", 0)] {
        let query = Query::new(vec![QueryPart::new().equals("tags", value).unwrap()]);
        assert_eq!(
            tagged.count(&query, DeletedPolicy::Standard).unwrap(),
            expected,
            "equals {}",
            value
        );
    }

    let query = Query::new(vec![QueryPart::new().not_equals("tags", "z").unwrap()]);
    assert_eq!(tagged.count(&query, DeletedPolicy::Standard).unwrap(), 1);
}

fn provision_tagged(manager: &StoreManager) -> DocumentStore {
    manager
        .provision(
            "tagged",
            Schema::builder()
                .field("tags", FieldType::String)
                .build()
                .unwrap(),
            ProvisionOptions::default(),
        )
        .unwrap()
}

fn count_where(store: &DocumentStore, operator: QueryOperator, value: &str) -> u64 {
    let item = QueryPartItem::new("tags", operator, json!(value)).unwrap();
    store
        .count(
            &Query::new(vec![QueryPart::new().item(item)]),
            DeletedPolicy::Standard,
        )
        .unwrap()
}

#[test]
fn test_array_equals_is_literal_and_case_sensitive() {
    init_tracing();
    let manager = StoreManager::open(StoreConfig::in_memory().build()).unwrap();
    let tagged = provision_tagged(&manager);
    tagged
        .add(&[json!({"tags": ["abc", "x"]})], &AddOptions::default())
        .unwrap();

    assert_eq!(count_where(&tagged, QueryOperator::Equals, "abc"), 1);
    assert_eq!(count_where(&tagged, QueryOperator::Equals, "a_c"), 0);
    assert_eq!(count_where(&tagged, QueryOperator::Equals, "a%"), 0);
    assert_eq!(count_where(&tagged, QueryOperator::Equals, "a*"), 0);
    assert_eq!(count_where(&tagged, QueryOperator::Equals, "ABC"), 0);

    // Scalar and array rows agree on case
    tagged
        .add(&[json!({"tags": "abc"})], &AddOptions::default())
        .unwrap();
    assert_eq!(count_where(&tagged, QueryOperator::Equals, "abc"), 2);
    assert_eq!(count_where(&tagged, QueryOperator::Equals, "ABC"), 0);

    // Wildcards inside fuzzy values are literal too
    assert_eq!(count_where(&tagged, QueryOperator::FuzzyEquals, "b"), 2);
    assert_eq!(count_where(&tagged, QueryOperator::FuzzyEquals, "a_c"), 0);
}

#[test]
fn test_left_and_right_fuzzy_match_array_elements() {
    init_tracing();
    let manager = StoreManager::open(StoreConfig::in_memory().build()).unwrap();
    let tagged = provision_tagged(&manager);
    tagged
        .add(&[json!({"tags": ["alpha", "beta"]})], &AddOptions::default())
        .unwrap();

    // Suffix of the last element, then of a leading element
    assert_eq!(count_where(&tagged, QueryOperator::FuzzyLeftEquals, "ta"), 1);
    assert_eq!(count_where(&tagged, QueryOperator::FuzzyLeftEquals, "ha"), 1);
    assert_eq!(count_where(&tagged, QueryOperator::FuzzyLeftEquals, "alp"), 0);
    assert_eq!(count_where(&tagged, QueryOperator::FuzzyNotLeftEquals, "ta"), 0);
    assert_eq!(count_where(&tagged, QueryOperator::FuzzyNotLeftEquals, "alp"), 1);

    // Prefix of the first element, then of a trailing element
    assert_eq!(count_where(&tagged, QueryOperator::FuzzyRightEquals, "al"), 1);
    assert_eq!(count_where(&tagged, QueryOperator::FuzzyRightEquals, "be"), 1);
    assert_eq!(count_where(&tagged, QueryOperator::FuzzyRightEquals, "eta"), 0);
    assert_eq!(count_where(&tagged, QueryOperator::FuzzyNotRightEquals, "al"), 0);
    assert_eq!(count_where(&tagged, QueryOperator::FuzzyNotRightEquals, "be"), 0);
    assert_eq!(count_where(&tagged, QueryOperator::FuzzyNotRightEquals, "eta"), 1);
}

#[test]
fn test_mapping_ignores_nesting_form_and_case() {
    let schema = Schema::builder()
        .field("address.city", FieldType::String)
        .field("name", FieldType::String)
        .build()
        .unwrap();

    let nested = map_document(&schema, &json!({"Address": {"City": "Kyoto"}, "NAME": "x"}), None);
    let flat = map_document(&schema, &json!({"address.city": "Kyoto", "name": "x"}), None);

    assert_eq!(nested, flat);
    assert_eq!(nested.len(), 2);
}

#[test]
fn test_mapping_agrees_with_normalized_form_on_case_collisions() {
    let schema = Schema::builder()
        .field("name", FieldType::String)
        .field("address.city", FieldType::String)
        .build()
        .unwrap();

    for document in [
        json!({"Name": "x", "name": "y"}),
        json!({"name": "y", "Name": "x"}),
        json!({"NAME": "x", "Name": "z"}),
        json!({"Address": {"city": "a"}, "address": {"city": "b"}}),
        json!({"name": null, "Name": "x"}),
    ] {
        let flat = serde_json::Value::Object(normalize(&document));
        assert_eq!(
            map_document(&schema, &flat, None),
            map_document(&schema, &document, None),
            "{}",
            document
        );
    }
}

// ==================== Sync State ====================

#[test]
fn test_soft_delete_under_each_policy() {
    let (_manager, people) = open_people();
    let ids = people
        .add(
            &[json!({"name": "keep"}), json!({"name": "drop"})],
            &AddOptions::local_only(),
        )
        .unwrap();

    people
        .remove(&[DocumentTarget::Id(ids[1])], &RemoveOptions::default())
        .unwrap();

    let base = Query::all();
    let find = |deleted| {
        people
            .find(&base, &FindOptions::new().with_deleted(deleted))
            .unwrap()
            .into_iter()
            .map(|d| d.id)
            .collect::<Vec<_>>()
    };

    assert_eq!(find(DeletedPolicy::Standard), vec![ids[0]]);
    assert_eq!(find(DeletedPolicy::DeletedOnly), vec![ids[1]]);
    assert_eq!(find(DeletedPolicy::Both), ids);
}

#[test]
fn test_removing_pending_add_is_hard_delete() {
    let (_manager, people) = open_people();
    let ids = people
        .add(
            &[json!({"name": "one"}), json!({"name": "two"})],
            &AddOptions::default(),
        )
        .unwrap();
    assert_eq!(row_count(&people), 2);

    let affected = people
        .delete_if_required(&DocumentTarget::Id(ids[0]), false, false)
        .unwrap();

    assert_eq!(affected, 1);
    assert_eq!(row_count(&people), 1);
    assert_eq!(
        people
            .count(&Query::all(), DeletedPolicy::DeletedOnly)
            .unwrap(),
        0
    );
}

#[test]
fn test_sync_round_trip() {
    let (_manager, people) = open_people();
    let id = people
        .add_one(&json!({"name": "sync", "age": 5}), &AddOptions::default())
        .unwrap();

    let pending = people.find_all_dirty().unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].operation, SyncOperation::Add);

    people.mark_clean(&[DocumentTarget::Id(id)]).unwrap();
    assert_eq!(people.count_all_dirty().unwrap(), 0);

    // Confirming a push leaves the pending operation as it was
    people
        .replace(&[Replacement::new(id, json!({"name": "sync", "age": 6}))], true)
        .unwrap();
    let pending = people.find_all_dirty().unwrap();
    assert_eq!(pending[0].operation, SyncOperation::Add);
}

#[test]
fn test_local_document_edit_then_remove() {
    let (_manager, people) = open_people();
    let id = people
        .add_one(&json!({"name": "local", "age": 5}), &AddOptions::local_only())
        .unwrap();
    assert_eq!(people.count_all_dirty().unwrap(), 0);

    people
        .replace(&[Replacement::new(id, json!({"name": "local", "age": 6}))], true)
        .unwrap();
    let pending = people.find_all_dirty().unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].operation, SyncOperation::Replace);

    people.mark_clean(&[DocumentTarget::Id(id)]).unwrap();
    let removed = people
        .remove(&[DocumentTarget::Id(id)], &RemoveOptions::default())
        .unwrap();
    assert_eq!(removed, 1);

    let pending = people.find_all_dirty().unwrap();
    assert_eq!(pending[0].operation, SyncOperation::Remove);
    assert_eq!(row_count(&people), 1);

    let err = people
        .replace(&[Replacement::new(id, json!({"name": "late"}))], true)
        .unwrap_err();
    assert_eq!(err.code(), "UPDATE_ON_MISSING_OR_REMOVED_DOCUMENT");
}

// ==================== Provisioning ====================

#[test]
fn test_reopen_with_extra_field_is_schema_mismatch() {
    init_tracing();
    let path = temp_db_path();
    let config = StoreConfig::builder(&path).build();

    let manager = StoreManager::open(config.clone()).unwrap();
    let people = manager
        .provision("people", people_schema(), ProvisionOptions::default())
        .unwrap();
    people
        .add(&[json!({"name": "persisted", "age": 9})], &AddOptions::default())
        .unwrap();
    manager.close().unwrap();

    let manager = StoreManager::open(config.clone()).unwrap();
    let wider = Schema::builder()
        .field("name", FieldType::String)
        .field("age", FieldType::Integer)
        .field("email", FieldType::String)
        .build()
        .unwrap();
    let err = manager
        .provision("people", wider, ProvisionOptions::default())
        .unwrap_err();
    assert_eq!(err.code(), "SCHEMA_MISMATCH");

    // The table was left untouched
    let people = manager
        .provision("people", people_schema(), ProvisionOptions::default())
        .unwrap();
    assert_eq!(row_count(&people), 1);

    manager.close().unwrap();
    StoreManager::destroy(&config).unwrap();
    assert!(!path.exists());
}

#[test]
fn test_destroy_reports_partial_failure_once() {
    let path = temp_db_path();
    let config = StoreConfig::builder(&path).build();

    let manager = StoreManager::open(config.clone()).unwrap();
    manager.close().unwrap();

    // A directory where a side file is expected cannot be removed as a file
    let mut blocker = path.as_os_str().to_owned();
    blocker.push("-journal");
    let blocker = PathBuf::from(blocker);
    std::fs::create_dir(&blocker).unwrap();

    let err = StoreManager::destroy(&config).unwrap_err();
    assert_eq!(err.code(), "PARTIAL_MAINTENANCE_FAILURE");
    assert!(!path.exists());

    std::fs::remove_dir(&blocker).unwrap();
}

// ==================== Transactions ====================

#[test]
fn test_transaction_spans_collections() {
    let (manager, people) = open_people();
    let pets = manager
        .provision(
            "pets",
            Schema::builder()
                .field("species", FieldType::String)
                .build()
                .unwrap(),
            ProvisionOptions::default(),
        )
        .unwrap();

    manager.begin_transaction().unwrap();
    people
        .add(&[json!({"name": "owner"})], &AddOptions::default())
        .unwrap();
    pets.add(&[json!({"species": "cat"})], &AddOptions::default())
        .unwrap();
    manager.rollback_transaction().unwrap();

    assert_eq!(row_count(&people), 0);
    assert_eq!(row_count(&pets), 0);

    manager.begin_transaction().unwrap();
    pets.add(&[json!({"species": "dog"})], &AddOptions::default())
        .unwrap();
    manager.mark_transaction_successful().unwrap();
    assert_eq!(
        manager.commit_transaction().unwrap(),
        TransactionOutcome::Committed
    );
    assert_eq!(row_count(&pets), 1);
}

#[test]
fn test_failed_batch_in_transaction_leaves_no_partial_writes() {
    let (manager, people) = open_people();
    let id = people
        .add_one(&json!({"name": "original"}), &AddOptions::default())
        .unwrap();

    manager.begin_transaction().unwrap();
    let err = people
        .replace(
            &[
                Replacement::new(id, json!({"name": "changed"})),
                Replacement::new(999, json!({"name": "ghost"})),
            ],
            true,
        )
        .unwrap_err();
    assert_eq!(err.code(), "UPDATE_ON_MISSING_OR_REMOVED_DOCUMENT");
    manager.mark_transaction_successful().unwrap();
    assert_eq!(
        manager.commit_transaction().unwrap(),
        TransactionOutcome::Committed
    );

    let docs = people.find_by_ids(&[id], DeletedPolicy::Standard).unwrap();
    assert_eq!(docs[0].json, json!({"name": "original"}));
}

// ==================== Encryption ====================

#[test]
fn test_encrypted_store_never_writes_plaintext() {
    init_tracing();
    let path = temp_db_path();
    let config = StoreConfig::builder(&path)
        .encryption_key(EncryptionKey::from_bytes(vec![0x2d; 32]))
        .build();

    let manager = match StoreManager::open(config.clone()) {
        Ok(manager) => manager,
        Err(e) => {
            // Without SQLCipher the open is refused rather than downgraded
            assert_eq!(e.code(), "DATABASE");
            assert!(e.to_string().contains("SQLCipher"));
            let _ = StoreManager::destroy(&config);
            return;
        }
    };

    let people = manager
        .provision("people", people_schema(), ProvisionOptions::default())
        .unwrap();
    people
        .add(&[json!({"name": "TOPSECRETVALUE"})], &AddOptions::default())
        .unwrap();
    manager.close().unwrap();

    let raw = std::fs::read(&path).unwrap();
    assert!(!raw.starts_with(b"SQLite format 3\0"));
    assert!(!raw.windows(14).any(|w| w == b"TOPSECRETVALUE"));

    StoreManager::destroy(&config).unwrap();
}
