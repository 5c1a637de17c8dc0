use std::collections::HashMap;

use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;
use tracing::info;

use crate::error::HarvestError;
use crate::npy::{self, NpyArray};
use crate::store::Store;
use crate::tags::TagDictionary;

/// Binary sparse matrix in compressed sparse row form. Every stored entry
/// has value 1; column indices within a row are sorted and unique.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncidenceMatrix {
    rows: usize,
    cols: usize,
    indptr: Vec<usize>,
    indices: Vec<usize>,
}

impl IncidenceMatrix {
    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    pub fn nnz(&self) -> usize {
        self.indices.len()
    }

    pub fn indptr(&self) -> &[usize] {
        &self.indptr
    }

    pub fn indices(&self) -> &[usize] {
        &self.indices
    }

    /// Column indices set in `row`.
    pub fn row(&self, row: usize) -> &[usize] {
        &self.indices[self.indptr[row]..self.indptr[row + 1]]
    }

    pub fn get(&self, row: usize, col: usize) -> u8 {
        if row >= self.rows {
            return 0;
        }
        u8::from(self.row(row).binary_search(&col).is_ok())
    }
}

/// Matrix plus the labels of its rows and columns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetMatrix {
    pub matrix: IncidenceMatrix,
    pub tags: Vec<String>,
    pub dataset_ids: Vec<String>,
}

impl TargetMatrix {
    /// Rows follow dictionary order; columns follow first appearance of each
    /// tag while walking the dictionary.
    pub fn build(dictionary: &TagDictionary) -> Self {
        let mut tag_index = HashMap::<&str, usize>::new();
        let mut tags = Vec::new();
        let mut dataset_ids = Vec::with_capacity(dictionary.len());
        let mut indptr = Vec::with_capacity(dictionary.len() + 1);
        let mut indices = Vec::new();
        indptr.push(0);

        for (dataset, dataset_tags) in dictionary.iter() {
            dataset_ids.push(dataset.to_string());
            let mut cols = dataset_tags
                .into_iter()
                .map(|tag| {
                    *tag_index.entry(tag).or_insert_with(|| {
                        tags.push(tag.to_string());
                        tags.len() - 1
                    })
                })
                .collect::<Vec<_>>();
            cols.sort_unstable();
            cols.dedup();
            indices.extend(cols);
            indptr.push(indices.len());
        }

        let matrix = IncidenceMatrix {
            rows: dataset_ids.len(),
            cols: tags.len(),
            indptr,
            indices,
        };
        Self {
            matrix,
            tags,
            dataset_ids,
        }
    }

    pub fn row_of(&self, dataset: &str) -> Option<usize> {
        self.dataset_ids.iter().position(|id| id == dataset)
    }

    pub fn col_of(&self, tag: &str) -> Option<usize> {
        self.tags.iter().position(|candidate| candidate == tag)
    }

    /// Writes the three artifacts of one generation into `dir`.
    pub fn persist(&self, dir: &Utf8Path, timestamp: &str) -> Result<MatrixArtifacts, HarvestError> {
        std::fs::create_dir_all(dir.as_std_path())
            .map_err(|err| HarvestError::Filesystem(err.to_string()))?;
        let artifacts = MatrixArtifacts::paths(dir, timestamp);

        let (rows, cols) = self.matrix.shape();
        let shape = [rows as i64, cols as i64];
        let indices = to_i64(self.matrix.indices());
        let indptr = to_i64(self.matrix.indptr());
        let data = vec![1i64; self.matrix.nnz()];
        npy::save_npz(
            &artifacts.matrix_path,
            &[
                ("indices", NpyArray::Int64 { shape: &[indices.len()], data: &indices }),
                ("indptr", NpyArray::Int64 { shape: &[indptr.len()], data: &indptr }),
                ("format", NpyArray::Bytes(b"csr")),
                ("shape", NpyArray::Int64 { shape: &[2], data: &shape }),
                ("data", NpyArray::Int64 { shape: &[data.len()], data: &data }),
            ],
        )?;
        npy::save_npy(&artifacts.tags_path, NpyArray::Unicode(&self.tags))?;
        npy::save_npy(&artifacts.dataset_ids_path, NpyArray::Unicode(&self.dataset_ids))?;

        info!(
            rows,
            cols,
            nnz = self.matrix.nnz(),
            path = %artifacts.matrix_path,
            "saved target matrix"
        );
        Ok(artifacts)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MatrixArtifacts {
    pub timestamp: String,
    pub matrix_path: Utf8PathBuf,
    pub tags_path: Utf8PathBuf,
    pub dataset_ids_path: Utf8PathBuf,
}

impl MatrixArtifacts {
    pub fn paths(dir: &Utf8Path, timestamp: &str) -> Self {
        Self {
            timestamp: timestamp.to_string(),
            matrix_path: dir.join(format!("target-matrix_{timestamp}.npz")),
            tags_path: dir.join(format!("tags_{timestamp}.npy")),
            dataset_ids_path: dir.join(format!("dataset-ids_{timestamp}.npy")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MatrixSummary {
    pub rows: usize,
    pub cols: usize,
    pub nnz: usize,
    pub artifacts: MatrixArtifacts,
}

/// Loads the persisted tag dictionary of `store` and writes a new matrix
/// generation next to it.
pub fn build_target_matrix(store: &Store) -> Result<(TargetMatrix, MatrixSummary), HarvestError> {
    let dictionary = TagDictionary::load(store)?;
    let target = TargetMatrix::build(&dictionary);
    let artifacts = target.persist(store.root(), &timestamp())?;
    let (rows, cols) = target.matrix.shape();
    let summary = MatrixSummary {
        rows,
        cols,
        nnz: target.matrix.nnz(),
        artifacts,
    };
    Ok((target, summary))
}

pub fn timestamp() -> String {
    chrono::Local::now().format("%Y-%m-%d_%H-%M-%S").to_string()
}

fn to_i64(values: &[usize]) -> Vec<i64> {
    values.iter().map(|&value| value as i64).collect()
}
