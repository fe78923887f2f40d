use std::sync::Arc;

use matchbook_core::{Configuration, ExactComparator, Property, Record};
use matchbook_index::keys::{FirstLongerThan, LongestToken};
use matchbook_index::{
    BlockingIndex, CandidateIndex, IndexError, KeyFunction, TokenIndex, TokenIndexSettings,
};

fn config() -> Arc<Configuration> {
    Arc::new(
        Configuration::builder()
            .property(Property::identity("ID"))
            .property(Property::new("NAME", Arc::new(ExactComparator), 0.3, 0.9))
            .property(Property::new("ADDRESS", Arc::new(ExactComparator), 0.4, 0.7))
            .threshold(0.85)
            .build()
            .unwrap(),
    )
}

fn company(id: &str, name: &str, address: &str) -> Arc<Record> {
    Arc::new(Record::builder().value("ID", id).value("NAME", name).value("ADDRESS", address).build())
}

fn dataset() -> Vec<Arc<Record>> {
    vec![
        company("1", "acme holding", "storgata 1 oslo"),
        company("2", "acme holding", "storgata 1 oslo"),
        company("3", "globex", "kirkegata 9 bergen"),
        company("4", "initech", "dronningens gate 4 trondheim"),
        company("5", "umbrella corp", "havnegata 2 tromso"),
        company("6", "acme ltd", "storgata 3 oslo"),
        company("7", "hooli", "parkveien 12 oslo"),
        company("8", "vehement capital", "kongens gate 8 oslo"),
    ]
}

fn key_functions() -> Vec<Arc<dyn KeyFunction>> {
    vec![Arc::new(FirstLongerThan::new("NAME", 2)), Arc::new(LongestToken::new("ADDRESS"))]
}

fn contains(found: &[Arc<Record>], id: &str) -> bool {
    found.iter().any(|r| r.value("ID") == Some(id))
}

fn assert_recall_floor(index: &dyn CandidateIndex) {
    let records = dataset();
    let (a, b) = (&records[0], &records[1]);
    assert!(contains(&index.find_candidates(a).unwrap(), "2"));
    assert!(contains(&index.find_candidates(b).unwrap(), "1"));
}

fn load(index: &mut dyn CandidateIndex) {
    for r in dataset() {
        index.index(r).unwrap();
    }
    index.commit().unwrap();
}

#[test]
fn token_index_recall_floor() {
    let mut index = TokenIndex::in_memory(config(), TokenIndexSettings::default());
    load(&mut index);
    assert_recall_floor(&index);
}

#[test]
fn token_index_recall_floor_with_tight_limits() {
    let settings = TokenIndexSettings { max_results: 2, min_relevance: 0.05, ..Default::default() };
    let mut index = TokenIndex::in_memory(config(), settings);
    load(&mut index);
    assert_recall_floor(&index);
}

#[test]
fn token_index_recall_floor_on_a_single_token() {
    let settings = TokenIndexSettings { min_relevance: 0.1, ..Default::default() };
    let mut index = TokenIndex::in_memory(config(), settings);
    let one = Arc::new(Record::builder().value("ID", "1").value("NAME", "acme").build());
    let two = Arc::new(Record::builder().value("ID", "2").value("NAME", "acme").build());
    index.index(one.clone()).unwrap();
    index.index(two.clone()).unwrap();
    index.commit().unwrap();

    assert!(contains(&index.find_candidates(&one).unwrap(), "2"));
    assert!(contains(&index.find_candidates(&two).unwrap(), "1"));
}

#[test]
fn token_index_recall_floor_in_a_common_bucket() {
    // every record shares "acme"; the bucket scores 1/20 absolute
    let settings = TokenIndexSettings { min_relevance: 0.5, ..Default::default() };
    let mut index = TokenIndex::in_memory(config(), settings);
    for i in 0..20 {
        let name = if i < 2 { "acme".to_string() } else { format!("acme branch{i}") };
        index.index(Arc::new(Record::builder().value("ID", i.to_string()).value("NAME", name).build())).unwrap();
    }
    index.commit().unwrap();

    let query = Record::builder().value("ID", "0").value("NAME", "acme").build();
    assert!(contains(&index.find_candidates(&query).unwrap(), "1"));
}

#[test]
fn blocking_index_recall_floor() {
    let mut index = BlockingIndex::in_memory(config(), 5, key_functions());
    load(&mut index);
    assert_recall_floor(&index);
}

#[test]
fn blocking_index_recall_floor_without_window() {
    let mut index = BlockingIndex::in_memory(config(), 0, key_functions());
    load(&mut index);
    assert_recall_floor(&index);
}

#[test]
fn token_index_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tokens.db");

    let mut index = TokenIndex::open(&path, config(), TokenIndexSettings::default()).unwrap();
    assert!(!index.is_in_memory());
    load(&mut index);
    // uncommitted work is not durable
    index.index(company("9", "phantom", "nowhere")).unwrap();
    drop(index);

    let mut index = TokenIndex::open(&path, config(), TokenIndexSettings::default()).unwrap();
    assert_eq!(index.len(), 8);
    assert!(index.find_by_id("9").unwrap().is_none());
    assert_recall_floor(&index);

    // re-indexing after reopen replaces the stored record
    index.index(company("3", "globex intl", "kirkegata 9 bergen")).unwrap();
    index.close().unwrap();

    let index = TokenIndex::open(&path, config(), TokenIndexSettings::default()).unwrap();
    assert_eq!(index.len(), 8);
    assert_eq!(index.find_by_id("3").unwrap().unwrap().value("NAME"), Some("globex intl"));
}

#[test]
fn blocking_index_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("blocks.db");

    let mut index = BlockingIndex::open(&path, config(), 5, key_functions()).unwrap();
    load(&mut index);
    index.close().unwrap();

    let index = BlockingIndex::open(&path, config(), 5, key_functions()).unwrap();
    assert_eq!(index.len(), 8);
    assert_recall_floor(&index);
}

#[test]
fn index_file_kinds_do_not_mix() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("index.db");
    drop(TokenIndex::open(&path, config(), TokenIndexSettings::default()).unwrap());
    let err = BlockingIndex::open(&path, config(), 5, key_functions()).err().unwrap();
    assert!(matches!(err, IndexError::KindMismatch { .. }));
}
