use serde::Serialize;
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::domain::{Dataset, FormatFilter, ObjectKey, extract_tags};
use crate::error::HarvestError;
use crate::fetch::ResourceFetcher;
use crate::mirror::{DatasetApi, ObjectStore};
use crate::sanitize::sanitize;
use crate::store::Store;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestStatus {
    /// No resource passed the format filter; nothing was written.
    NoEligibleResources,
    Ingested,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    pub dataset: String,
    pub status: IngestStatus,
    pub downloaded: usize,
    pub already_present: usize,
    pub failed: usize,
}

impl IngestReport {
    fn new(dataset: impl Into<String>, status: IngestStatus) -> Self {
        Self {
            dataset: dataset.into(),
            status,
            downloaded: 0,
            already_present: 0,
            failed: 0,
        }
    }
}

/// Writes one catalog dataset into the harvest tree: metadata first, then
/// every accepted resource not already on disk.
pub struct Ingestor<F: ResourceFetcher> {
    store: Store,
    fetcher: F,
    formats: FormatFilter,
}

impl<F: ResourceFetcher> Ingestor<F> {
    pub fn new(store: Store, fetcher: F, formats: FormatFilter) -> Self {
        Self {
            store,
            fetcher,
            formats,
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn ingest(&self, dataset: &Dataset) -> Result<IngestReport, HarvestError> {
        let accepted = dataset.accepted_resources(&self.formats);
        if accepted.is_empty() {
            debug!(dataset = %dataset.title, "no resources in accepted formats");
            return Ok(IngestReport::new(
                dataset.name.clone(),
                IngestStatus::NoEligibleResources,
            ));
        }

        let id = dataset.identifier().inspect_err(|err| {
            error!(dataset = %dataset.name, error = %err, "cannot name dataset");
        })?;
        self.ingest_resources(&id, dataset)
            .inspect_err(|err| error!(dataset = %id, error = %err, "dataset ingestion failed"))
    }

    fn ingest_resources(&self, id: &str, dataset: &Dataset) -> Result<IngestReport, HarvestError> {
        self.store.ensure_dataset_dir(id)?;

        let metadata = sanitize(dataset.metadata.clone())?;
        Store::write_json(&self.store.metadata_path(id), &metadata)?;
        if !dataset.tags.is_empty() {
            Store::write_json(&self.store.tags_path(id), &dataset.tags)?;
        }

        let mut report = IngestReport::new(id, IngestStatus::Ingested);
        for resource in dataset.accepted_resources(&self.formats) {
            let Some(file_name) = resource.file_name() else {
                warn!(dataset = %id, url = %resource.url, "resource URL has no file name");
                report.failed += 1;
                continue;
            };
            let destination = self.store.resource_path(id, &file_name);
            if Store::is_present(&destination) {
                debug!(path = %destination, "resource already present");
                report.already_present += 1;
                continue;
            }

            match self.fetcher.download(&resource.url, destination.as_std_path()) {
                Ok(bytes) => {
                    info!(path = %destination, bytes, "saved resource");
                    report.downloaded += 1;
                }
                Err(err) if err.is_request_failure() => {
                    warn!(dataset = %id, url = %resource.url, error = %err, "resource skipped");
                    report.failed += 1;
                }
                Err(err) => return Err(err),
            }
        }
        Ok(report)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectStatus {
    Downloaded,
    AlreadyPresent,
    FormatRejected,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ObjectReport {
    pub dataset: String,
    pub file_name: String,
    pub status: ObjectStatus,
}

/// Mirrors one object of the storage mirror, fetching its dataset's
/// metadata the first time the dataset is seen.
pub struct ObjectIngestor<S: ObjectStore, A: DatasetApi> {
    store: Store,
    objects: S,
    api: A,
    formats: FormatFilter,
}

impl<S: ObjectStore, A: DatasetApi> ObjectIngestor<S, A> {
    pub fn new(store: Store, objects: S, api: A, formats: FormatFilter) -> Self {
        Self {
            store,
            objects,
            api,
            formats,
        }
    }

    pub fn objects(&self) -> &S {
        &self.objects
    }

    pub fn ingest(&self, key: &ObjectKey) -> Result<ObjectReport, HarvestError> {
        let id = key.dataset_id();

        // The dataset directory appears only once its metadata is on disk.
        let metadata_path = self.store.metadata_path(&id);
        if !Store::is_present(&metadata_path) {
            self.fetch_metadata(key, &id).inspect_err(|err| {
                error!(path = %metadata_path, error = %err, "metadata fetch failed");
            })?;
        }
        self.store.ensure_dataset_dir(&id)?;

        let destination = self.store.resource_path(&id, key.file_name());
        let status = if Store::is_present(&destination) {
            debug!(path = %destination, "file already present");
            ObjectStatus::AlreadyPresent
        } else if !self.formats.accepts_file_name(key.file_name()) {
            ObjectStatus::FormatRejected
        } else {
            match self.objects.download(key, destination.as_std_path()) {
                Ok(bytes) => {
                    info!(path = %destination, bytes, "saved object");
                    ObjectStatus::Downloaded
                }
                Err(err) => {
                    warn!(key = %key, error = %err, "object download failed");
                    ObjectStatus::Failed
                }
            }
        };

        Ok(ObjectReport {
            dataset: id,
            file_name: key.file_name().to_string(),
            status,
        })
    }

    fn fetch_metadata(&self, key: &ObjectKey, id: &str) -> Result<(), HarvestError> {
        let raw = self.api.dataset_metadata(key.owner(), key.dataset())?;
        write_api_metadata(&self.store, id, raw).map(|_| ())
    }
}

/// Sanitizes API metadata and writes it, with its tags file when the tag
/// list is non-empty. Returns the number of tags written.
pub fn write_api_metadata(store: &Store, id: &str, raw: Value) -> Result<usize, HarvestError> {
    let metadata = sanitize(raw)?;
    let tags = extract_tags(&metadata);
    if !tags.is_empty() {
        Store::write_json(&store.tags_path(id), &tags)?;
    }
    Store::write_json(&store.metadata_path(id), &metadata)?;
    Ok(tags.len())
}
