use std::fs;
use std::io::Write;

use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tempfile::Builder;

use crate::error::HarvestError;

pub const METADATA_SUFFIX: &str = "_metadata.json";
pub const TAGS_SUFFIX: &str = "_tags.json";
pub const TAG_DICTIONARY_FILE: &str = "tags_dict.json";
pub const LABELED_DIR: &str = "labeled";

/// On-disk harvest tree: one directory per dataset under `root`.
#[derive(Debug, Clone)]
pub struct Store {
    root: Utf8PathBuf,
}

impl Store {
    pub fn new(root: impl Into<Utf8PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    /// Store rooted at a sub directory, e.g. one CKAN instance.
    pub fn child(&self, name: &str) -> Self {
        Self::new(self.root.join(name))
    }

    pub fn dataset_dir(&self, id: &str) -> Utf8PathBuf {
        self.root.join(id)
    }

    pub fn metadata_path(&self, id: &str) -> Utf8PathBuf {
        self.dataset_dir(id).join(format!("{id}{METADATA_SUFFIX}"))
    }

    pub fn tags_path(&self, id: &str) -> Utf8PathBuf {
        self.dataset_dir(id).join(format!("{id}{TAGS_SUFFIX}"))
    }

    pub fn resource_path(&self, id: &str, file_name: &str) -> Utf8PathBuf {
        self.dataset_dir(id).join(file_name)
    }

    pub fn tag_dictionary_path(&self) -> Utf8PathBuf {
        self.root.join(TAG_DICTIONARY_FILE)
    }

    pub fn labeled(&self) -> Self {
        self.child(LABELED_DIR)
    }

    pub fn ensure_root(&self) -> Result<(), HarvestError> {
        fs::create_dir_all(self.root.as_std_path())
            .map_err(|err| HarvestError::Filesystem(err.to_string()))
    }

    pub fn ensure_dataset_dir(&self, id: &str) -> Result<Utf8PathBuf, HarvestError> {
        let dir = self.dataset_dir(id);
        fs::create_dir_all(dir.as_std_path())
            .map_err(|err| HarvestError::Filesystem(format!("create {dir}: {err}")))?;
        Ok(dir)
    }

    /// A file counts as present only when it is non-empty.
    pub fn is_present(path: &Utf8Path) -> bool {
        fs::metadata(path.as_std_path())
            .map(|meta| meta.is_file() && meta.len() > 0)
            .unwrap_or(false)
    }

    pub fn write_json<T: Serialize + ?Sized>(path: &Utf8Path, value: &T) -> Result<(), HarvestError> {
        let content = serde_json::to_vec_pretty(value)
            .map_err(|err| HarvestError::Encode(format!("{path}: {err}")))?;
        Self::write_bytes_atomic(path, &content)
    }

    pub fn read_json<T: DeserializeOwned>(path: &Utf8Path) -> Result<T, HarvestError> {
        let content = fs::read_to_string(path.as_std_path())
            .map_err(|err| HarvestError::Filesystem(format!("read {path}: {err}")))?;
        serde_json::from_str(&content)
            .map_err(|err| HarvestError::Filesystem(format!("parse {path}: {err}")))
    }

    /// Writes through a uniquely named sibling temp file, so concurrent
    /// writers of the same path never interleave.
    pub fn write_bytes_atomic(path: &Utf8Path, content: &[u8]) -> Result<(), HarvestError> {
        let parent = path
            .parent()
            .ok_or_else(|| HarvestError::Filesystem("invalid destination path".to_string()))?;
        fs::create_dir_all(parent.as_std_path())
            .map_err(|err| HarvestError::Filesystem(err.to_string()))?;
        let mut temp = Builder::new()
            .prefix(".tmp-")
            .tempfile_in(parent.as_std_path())
            .map_err(|err| HarvestError::Filesystem(err.to_string()))?;
        temp.write_all(content)
            .map_err(|err| HarvestError::Filesystem(err.to_string()))?;
        temp.persist(path.as_std_path())
            .map_err(|err| HarvestError::Filesystem(err.to_string()))?;
        Ok(())
    }

    /// Dataset directories in name order, skipping hidden entries and the
    /// `labeled` partition.
    pub fn dataset_dirs(&self) -> Result<Vec<Utf8PathBuf>, HarvestError> {
        if !self.root.as_std_path().exists() {
            return Ok(Vec::new());
        }
        let mut dirs = Vec::new();
        for entry in read_dir(&self.root)? {
            let Some(name) = entry.file_name() else {
                continue;
            };
            if name.starts_with('.') || name == LABELED_DIR {
                continue;
            }
            if entry.as_std_path().is_dir() {
                dirs.push(entry);
            }
        }
        dirs.sort();
        Ok(dirs)
    }

    /// Files in `dir` whose name ends in `_metadata.json`.
    pub fn metadata_files(dir: &Utf8Path) -> Result<Vec<Utf8PathBuf>, HarvestError> {
        let mut files = read_dir(dir)?
            .into_iter()
            .filter(|path| {
                path.file_name()
                    .map(|name| name.ends_with(METADATA_SUFFIX) && !name.starts_with('.'))
                    .unwrap_or(false)
                    && path.as_std_path().is_file()
            })
            .collect::<Vec<_>>();
        files.sort();
        Ok(files)
    }

    pub fn move_dir(from: &Utf8Path, to: &Utf8Path) -> Result<(), HarvestError> {
        if let Some(parent) = to.parent() {
            fs::create_dir_all(parent.as_std_path())
                .map_err(|err| HarvestError::Filesystem(err.to_string()))?;
        }
        fs::rename(from.as_std_path(), to.as_std_path())
            .map_err(|err| HarvestError::Filesystem(format!("move {from} to {to}: {err}")))
    }
}

fn read_dir(dir: &Utf8Path) -> Result<Vec<Utf8PathBuf>, HarvestError> {
    let entries = fs::read_dir(dir.as_std_path())
        .map_err(|err| HarvestError::Filesystem(format!("read {dir}: {err}")))?;
    let mut items = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|err| HarvestError::Filesystem(err.to_string()))?;
        let path = Utf8PathBuf::from_path_buf(entry.path())
            .map_err(|path| HarvestError::Filesystem(format!("non-utf8 path {}", path.display())))?;
        items.push(path);
    }
    Ok(items)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_paths() {
        let store = Store::new("data/ckan");
        assert!(
            store
                .metadata_path("road-counts")
                .ends_with("road-counts/road-counts_metadata.json")
        );
        assert!(store.tags_path("a.b").ends_with("a.b/a.b_tags.json"));
        assert!(store.labeled().root().ends_with("data/ckan/labeled"));
    }

    #[test]
    fn empty_file_is_not_present() {
        let temp = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
        let path = root.join("empty.csv");
        fs::write(path.as_std_path(), b"").unwrap();
        assert!(!Store::is_present(&path));
        fs::write(path.as_std_path(), b"x").unwrap();
        assert!(Store::is_present(&path));
        assert!(!Store::is_present(&root));
    }
}
