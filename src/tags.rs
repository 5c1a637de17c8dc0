use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::domain::extract_tags;
use crate::error::HarvestError;
use crate::store::Store;

/// Dataset identifier → tags, in the order datasets were walked. Backed by
/// an insertion-ordered JSON object, which is also the file format.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TagDictionary(Map<String, Value>);

impl TagDictionary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a dataset; an identifier already present is replaced in place.
    pub fn insert(&mut self, dataset: impl Into<String>, tags: Vec<String>) {
        self.0.insert(dataset.into(), Value::from(tags));
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Vec<&str>)> {
        self.0.iter().map(|(id, tags)| (id.as_str(), tag_list(tags)))
    }

    pub fn get(&self, dataset: &str) -> Option<Vec<&str>> {
        self.0.get(dataset).map(tag_list)
    }

    pub fn load(store: &Store) -> Result<Self, HarvestError> {
        Store::read_json(&store.tag_dictionary_path())
    }

    pub fn save(&self, store: &Store) -> Result<(), HarvestError> {
        Store::write_json(&store.tag_dictionary_path(), self)
    }
}

impl<S: Into<String>> FromIterator<(S, Vec<String>)> for TagDictionary {
    fn from_iter<I: IntoIterator<Item = (S, Vec<String>)>>(iter: I) -> Self {
        let mut dictionary = Self::new();
        for (dataset, tags) in iter {
            dictionary.insert(dataset, tags);
        }
        dictionary
    }
}

fn tag_list(tags: &Value) -> Vec<&str> {
    tags.as_array()
        .map(|tags| tags.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TagCount {
    pub tag: String,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TagSummary {
    pub datasets_scanned: usize,
    pub labeled_datasets: usize,
    pub distinct_tags: usize,
    pub assignments: usize,
    pub top_tags: Vec<TagCount>,
    pub dictionary_path: String,
}

/// Walks the harvest tree once and rebuilds the tag dictionary.
pub struct TagCollector {
    top_n: usize,
}

impl Default for TagCollector {
    fn default() -> Self {
        Self { top_n: 25 }
    }
}

impl TagCollector {
    pub fn new(top_n: usize) -> Self {
        Self { top_n }
    }

    /// Reads every dataset's metadata file. A directory with zero or several
    /// `*_metadata.json` files means the tree is corrupt and stops the walk.
    pub fn collect(&self, store: &Store) -> Result<(TagDictionary, TagSummary), HarvestError> {
        let mut dictionary = TagDictionary::new();
        let mut frequency = HashMap::<String, usize>::new();
        let mut assignments = 0usize;
        let mut scanned = 0usize;

        for dir in store.dataset_dirs()? {
            scanned += 1;
            let files = Store::metadata_files(&dir)?;
            if files.len() != 1 {
                return Err(HarvestError::StructuralViolation {
                    path: dir.to_string(),
                    message: format!(
                        "expected exactly one *_metadata.json file, found {}",
                        files.len()
                    ),
                });
            }
            let metadata: Value = Store::read_json(&files[0])?;
            let tags = extract_tags(&metadata);
            let Some(id) = dir.file_name() else {
                continue;
            };
            if tags.is_empty() {
                debug!(dataset = id, "no tags");
                continue;
            }

            for tag in &tags {
                *frequency.entry(tag.clone()).or_default() += 1;
            }
            assignments += tags.len();
            dictionary.insert(id, tags);
        }

        let distinct_tags = frequency.len();
        let top_tags = rank(frequency, self.top_n);
        for entry in &top_tags {
            debug!(tag = %entry.tag, count = entry.count, "top tag");
        }

        dictionary.save(store)?;
        let dictionary_path = store.tag_dictionary_path();
        info!(
            datasets = scanned,
            labeled = dictionary.len(),
            distinct_tags,
            path = %dictionary_path,
            "wrote tag dictionary"
        );

        let summary = TagSummary {
            datasets_scanned: scanned,
            labeled_datasets: dictionary.len(),
            distinct_tags,
            assignments,
            top_tags,
            dictionary_path: dictionary_path.to_string(),
        };
        Ok((dictionary, summary))
    }
}

/// Most frequent first; equal counts in tag order.
fn rank(frequency: HashMap<String, usize>, top_n: usize) -> Vec<TagCount> {
    let mut counts = frequency
        .into_iter()
        .map(|(tag, count)| TagCount { tag, count })
        .collect::<Vec<_>>();
    counts.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.tag.cmp(&b.tag)));
    counts.truncate(top_n);
    counts
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PartitionSummary {
    pub moved: usize,
    pub unlabeled: usize,
    pub conflicts: usize,
}

/// Moves every dataset directory with a non-empty tags file under
/// `<root>/labeled/`.
pub fn partition_labeled(store: &Store) -> Result<PartitionSummary, HarvestError> {
    let labeled = store.labeled();
    let mut summary = PartitionSummary::default();

    for dir in store.dataset_dirs()? {
        let Some(id) = dir.file_name() else {
            continue;
        };
        let tags_path = store.tags_path(id);
        let has_tags = Store::is_present(&tags_path)
            && Store::read_json::<Value>(&tags_path)?
                .as_array()
                .is_some_and(|tags| !tags.is_empty());
        if !has_tags {
            debug!(dataset = id, "no tag file");
            summary.unlabeled += 1;
            continue;
        }

        let target = labeled.dataset_dir(id);
        if target.as_std_path().exists() {
            warn!(dataset = id, target = %target, "labeled copy already exists");
            summary.conflicts += 1;
            continue;
        }
        Store::move_dir(&dir, &target)?;
        info!(dataset = id, target = %target, "moved labeled dataset");
        summary.moved += 1;
    }
    Ok(summary)
}
