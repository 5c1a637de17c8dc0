use assert_matches::assert_matches;
use camino::Utf8PathBuf;
use serde_json::{Value, json};

use catalog_harvester::error::HarvestError;
use catalog_harvester::store::Store;
use catalog_harvester::tags::{TagCollector, TagDictionary, partition_labeled};

fn temp_store() -> (tempfile::TempDir, Store) {
    let temp = tempfile::tempdir().unwrap();
    let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
    (temp, Store::new(root))
}

fn write_dataset(store: &Store, id: &str, metadata: Value) {
    store.ensure_dataset_dir(id).unwrap();
    Store::write_json(&store.metadata_path(id), &metadata).unwrap();
}

#[test]
fn collects_tags_in_directory_order() {
    let (_temp, store) = temp_store();
    write_dataset(&store, "bob.rain", json!({"tags": ["weather", "rain"]}));
    write_dataset(&store, "alice.bikes", json!({"tags": [{"name": "weather"}]}));
    write_dataset(&store, "carol.empty", json!({"title": "No tags"}));
    std::fs::create_dir_all(store.root().join(".cache").as_std_path()).unwrap();
    std::fs::create_dir_all(store.labeled().root().join("x").as_std_path()).unwrap();

    let (dictionary, summary) = TagCollector::default().collect(&store).unwrap();

    let ids = dictionary.iter().map(|(id, _)| id).collect::<Vec<_>>();
    assert_eq!(ids, vec!["alice.bikes", "bob.rain"]);
    assert_eq!(dictionary.get("bob.rain").unwrap(), ["weather", "rain"]);
    assert_eq!(summary.datasets_scanned, 3);
    assert_eq!(summary.labeled_datasets, 2);
    assert_eq!(summary.distinct_tags, 2);
    assert_eq!(summary.assignments, 3);
    assert_eq!(summary.top_tags[0].tag, "weather");
    assert_eq!(summary.top_tags[0].count, 2);

    let saved = TagDictionary::load(&store).unwrap();
    assert_eq!(saved, dictionary);
    let raw = std::fs::read_to_string(store.tag_dictionary_path().as_std_path()).unwrap();
    assert!(raw.find("alice.bikes").unwrap() < raw.find("bob.rain").unwrap());
}

#[test]
fn directory_without_metadata_is_a_violation() {
    let (_temp, store) = temp_store();
    write_dataset(&store, "a.ok", json!({"tags": ["x"]}));
    store.ensure_dataset_dir("b.broken").unwrap();

    let result = TagCollector::default().collect(&store);
    assert_matches!(
        result,
        Err(HarvestError::StructuralViolation { ref path, .. }) if path.ends_with("b.broken")
    );
    assert!(!store.tag_dictionary_path().as_std_path().exists());
}

#[test]
fn directory_with_two_metadata_files_is_a_violation() {
    let (_temp, store) = temp_store();
    write_dataset(&store, "a.twice", json!({"tags": ["x"]}));
    Store::write_json(
        &store.dataset_dir("a.twice").join("other_metadata.json"),
        &json!({"tags": ["y"]}),
    )
    .unwrap();

    assert_matches!(
        TagCollector::default().collect(&store),
        Err(HarvestError::StructuralViolation { .. })
    );
}

#[test]
fn partition_moves_tagged_datasets() {
    let (_temp, store) = temp_store();
    write_dataset(&store, "a.tagged", json!({"tags": ["x"]}));
    Store::write_json(&store.tags_path("a.tagged"), &["x"]).unwrap();
    write_dataset(&store, "b.untagged", json!({}));
    write_dataset(&store, "c.empty-tags", json!({}));
    Store::write_json(&store.tags_path("c.empty-tags"), &Vec::<String>::new()).unwrap();

    let summary = partition_labeled(&store).unwrap();
    assert_eq!(summary.moved, 1);
    assert_eq!(summary.unlabeled, 2);
    assert_eq!(summary.conflicts, 0);

    let labeled = store.labeled();
    assert!(Store::is_present(&labeled.metadata_path("a.tagged")));
    assert!(!store.dataset_dir("a.tagged").as_std_path().exists());
    assert!(store.dataset_dir("b.untagged").as_std_path().exists());

    let dirs = store.dataset_dirs().unwrap();
    assert_eq!(dirs.len(), 2);
}

#[test]
fn partition_leaves_conflicts_in_place() {
    let (_temp, store) = temp_store();
    write_dataset(&store, "a.tagged", json!({}));
    Store::write_json(&store.tags_path("a.tagged"), &["x"]).unwrap();
    store.labeled().ensure_dataset_dir("a.tagged").unwrap();

    let summary = partition_labeled(&store).unwrap();
    assert_eq!(summary.conflicts, 1);
    assert!(store.dataset_dir("a.tagged").as_std_path().exists());
}
