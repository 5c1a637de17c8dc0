use serde::Serialize;
use tracing::{error, info, warn};

use crate::catalog::{CatalogWalker, CkanHttpClient, PagedListing, batched};
use crate::config::ResolvedConfig;
use crate::dispatch::{DispatchOutcome, DispatchSummary, Dispatcher};
use crate::domain::Dataset;
use crate::error::HarvestError;
use crate::fetch::{HttpFetcher, ResourceFetcher};
use crate::ingest::{
    IngestReport, IngestStatus, Ingestor, ObjectIngestor, ObjectReport, ObjectStatus,
    write_api_metadata,
};
use crate::matrix::{MatrixSummary, build_target_matrix};
use crate::mirror::{BucketClient, DataWorldClient, DatasetApi, ObjectStore};
use crate::store::Store;
use crate::tags::{PartitionSummary, TagCollector, TagSummary, partition_labeled};

pub const CKAN_DIR: &str = "ckan";
pub const MIRROR_DIR: &str = "mirror";
pub const PROJECT_DIR: &str = "projects";

#[derive(Debug, Clone, Default, Serialize)]
pub struct CatalogRunResult {
    pub instance: String,
    pub url: String,
    pub dispatch: DispatchSummary,
    pub datasets_ingested: usize,
    pub datasets_without_formats: usize,
    pub resources_downloaded: usize,
    pub resources_present: usize,
    pub resources_failed: usize,
}

impl CatalogRunResult {
    fn from_outcome(instance: &str, url: &str, outcome: DispatchOutcome<IngestReport>) -> Self {
        let mut result = Self {
            instance: instance.to_string(),
            url: url.to_string(),
            dispatch: outcome.summary,
            ..Self::default()
        };
        for report in &outcome.reports {
            match report.status {
                IngestStatus::NoEligibleResources => result.datasets_without_formats += 1,
                IngestStatus::Ingested => result.datasets_ingested += 1,
            }
            result.resources_downloaded += report.downloaded;
            result.resources_present += report.already_present;
            result.resources_failed += report.failed;
        }
        result
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct MirrorRunResult {
    pub dispatch: DispatchSummary,
    pub downloaded: usize,
    pub already_present: usize,
    pub format_rejected: usize,
    pub failed: usize,
}

impl MirrorRunResult {
    fn from_outcome(outcome: DispatchOutcome<ObjectReport>) -> Self {
        let mut result = Self {
            dispatch: outcome.summary,
            ..Self::default()
        };
        for report in &outcome.reports {
            match report.status {
                ObjectStatus::Downloaded => result.downloaded += 1,
                ObjectStatus::AlreadyPresent => result.already_present += 1,
                ObjectStatus::FormatRejected => result.format_rejected += 1,
                ObjectStatus::Failed => result.failed += 1,
            }
        }
        result
    }
}

/// Reachability of one CKAN instance: its first listing page was read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstanceCheck {
    pub instance: String,
    pub url: String,
    pub ok: bool,
    pub datasets_on_first_page: usize,
    pub error: Option<String>,
}

impl InstanceCheck {
    /// Reads the first page of `listing`.
    pub fn run<L: PagedListing>(instance: &str, url: &str, listing: &L) -> Self {
        let (ok, datasets_on_first_page, error) = match listing.page(None) {
            Ok(page) => (true, page.items.len(), None),
            Err(err) => {
                warn!(instance, url, error = %err, "instance check failed");
                (false, 0, Some(err.to_string()))
            }
        };
        Self {
            instance: instance.to_string(),
            url: url.to_string(),
            ok,
            datasets_on_first_page,
            error,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ProjectRunResult {
    pub project: String,
    pub dispatch: DispatchSummary,
    pub linked_datasets: usize,
    pub tagged: usize,
    pub untagged: usize,
}

/// One harvesting run: configuration plus the worker pool shared by every
/// catalog it walks.
pub struct Harvester {
    config: ResolvedConfig,
    dispatcher: Dispatcher,
}

impl Harvester {
    pub fn new(config: ResolvedConfig) -> Self {
        let dispatcher = Dispatcher::new(config.workers, config.cooldown);
        Self { config, dispatcher }
    }

    pub fn config(&self) -> &ResolvedConfig {
        &self.config
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn ckan_store(&self) -> Store {
        Store::new(self.config.data_dir.join(CKAN_DIR))
    }

    pub fn mirror_store(&self) -> Store {
        Store::new(self.config.data_dir.join(MIRROR_DIR))
    }

    pub fn project_store(&self, owner: &str, project: &str) -> Store {
        Store::new(
            self.config
                .data_dir
                .join(PROJECT_DIR)
                .join(format!("{owner}.{project}")),
        )
    }

    /// Tree read by `tags` and `matrix` when no directory is given: the
    /// mirror's `labeled/` partition once it exists, the mirror root before.
    pub fn labeled_tree(&self) -> Store {
        let mirror = self.mirror_store();
        let labeled = mirror.labeled();
        if labeled.root().as_std_path().is_dir() {
            labeled
        } else {
            mirror
        }
    }

    fn instances(&self, instance: Option<&str>) -> Result<Vec<(String, String)>, HarvestError> {
        let instances = match instance {
            Some(name) => {
                let url = self
                    .config
                    .ckan_instances
                    .get(name)
                    .ok_or_else(|| HarvestError::UnknownInstance(name.to_string()))?;
                vec![(name.to_string(), url.clone())]
            }
            None => self
                .config
                .ckan_instances
                .iter()
                .map(|(name, url)| (name.clone(), url.clone()))
                .collect(),
        };
        if instances.is_empty() {
            return Err(HarvestError::MissingConfig(
                "no ckan_instances configured".to_string(),
            ));
        }
        Ok(instances)
    }

    /// Walks `listing` page by page and ingests each page on the pool.
    pub fn harvest_catalog<L, F>(
        &self,
        listing: &L,
        ingestor: &Ingestor<F>,
    ) -> Result<DispatchOutcome<IngestReport>, HarvestError>
    where
        L: PagedListing<Item = Dataset>,
        F: ResourceFetcher,
    {
        ingestor.store().ensure_root()?;
        Ok(self
            .dispatcher
            .run(CatalogWalker::new(listing), |dataset| ingestor.ingest(dataset)))
    }

    /// Slices the object listing into fixed-size batches and mirrors them.
    pub fn harvest_mirror<S, A>(
        &self,
        ingestor: &ObjectIngestor<S, A>,
        store: &Store,
    ) -> Result<MirrorRunResult, HarvestError>
    where
        S: ObjectStore,
        A: DatasetApi,
    {
        store.ensure_root()?;
        let keys = CatalogWalker::new(ingestor.objects()).items();
        let outcome = self
            .dispatcher
            .run(batched(keys, self.config.batch_size), |key| ingestor.ingest(key));
        Ok(MirrorRunResult::from_outcome(outcome))
    }

    /// Harvests the named CKAN instance, or every configured one, each into
    /// its own subdirectory.
    pub fn harvest_ckan(
        &self,
        instance: Option<&str>,
    ) -> Result<Vec<CatalogRunResult>, HarvestError> {
        let instances = self.instances(instance)?;
        let fetcher = HttpFetcher::new(self.config.retry, self.config.timeout)?;
        let mut results = Vec::with_capacity(instances.len());
        for (name, url) in instances {
            if self.dispatcher.is_cancelled() {
                break;
            }
            info!(instance = %name, url = %url, "scraping ckan instance");
            results.push(self.harvest_ckan_url(&name, &url, fetcher.clone())?);
        }
        Ok(results)
    }

    pub fn harvest_ckan_url(
        &self,
        name: &str,
        url: &str,
        fetcher: HttpFetcher,
    ) -> Result<CatalogRunResult, HarvestError> {
        let client = CkanHttpClient::new(url, self.config.timeout, self.config.retry)?;
        let ingestor = Ingestor::new(
            self.ckan_store().child(name),
            fetcher,
            self.config.formats.clone(),
        );
        let outcome = self.harvest_catalog(&client, &ingestor)?;
        if outcome.summary.listing_errors > 0 {
            error!(instance = name, url, "catalog listing incomplete");
        }
        Ok(CatalogRunResult::from_outcome(name, url, outcome))
    }

    /// Reads the first listing page of each selected instance and reports
    /// which ones answer.
    pub fn check_ckan_instances(
        &self,
        instance: Option<&str>,
    ) -> Result<Vec<InstanceCheck>, HarvestError> {
        self.instances(instance)?
            .into_iter()
            .map(|(name, url)| self.check_ckan_url(&name, &url))
            .collect()
    }

    pub fn check_ckan_url(&self, name: &str, url: &str) -> Result<InstanceCheck, HarvestError> {
        let client = CkanHttpClient::new(url, self.config.timeout, self.config.retry)?;
        let check = InstanceCheck::run(name, url, &client);
        info!(instance = name, url, ok = check.ok, "checked ckan instance");
        Ok(check)
    }

    /// Mirrors the configured object store, looking metadata up through the
    /// dataset API.
    pub fn harvest_object_store(&self) -> Result<MirrorRunResult, HarvestError> {
        let settings = self
            .config
            .object_store
            .as_ref()
            .ok_or_else(|| HarvestError::MissingConfig("object_store".to_string()))?;
        let objects = BucketClient::new(settings, self.config.timeout, &self.config.retry)?;
        let api = self.dataset_api()?;
        let store = self.mirror_store();
        let ingestor = ObjectIngestor::new(store.clone(), objects, api, self.config.formats.clone());
        self.harvest_mirror(&ingestor, &store)
    }

    pub fn dataset_api(&self) -> Result<DataWorldClient, HarvestError> {
        DataWorldClient::new(
            &self.config.dataset_api,
            self.config.timeout,
            self.config.retry,
        )
    }

    /// Writes metadata and tags for every dataset linked from a project into
    /// its own tree under `projects/<owner>.<project>/`.
    pub fn harvest_project<A: DatasetApi>(
        &self,
        api: &A,
        owner: &str,
        project: &str,
    ) -> Result<ProjectRunResult, HarvestError> {
        let linked = api.linked_datasets(owner, project)?;
        info!(owner, project, datasets = linked.len(), "scraping project");
        let store = self.project_store(owner, project);
        store.ensure_root()?;

        let batches = batched(linked.into_iter().map(Ok), self.config.batch_size);
        let outcome = self.dispatcher.run(batches, |(dataset_owner, id)| {
            let raw = api.dataset_metadata(dataset_owner, id)?;
            write_api_metadata(&store, &format!("{dataset_owner}.{id}"), raw)
        });

        let mut result = ProjectRunResult {
            project: format!("{owner}/{project}"),
            linked_datasets: outcome.summary.items,
            dispatch: outcome.summary,
            ..ProjectRunResult::default()
        };
        for tags in outcome.reports {
            if tags > 0 {
                result.tagged += 1;
            } else {
                result.untagged += 1;
            }
        }
        Ok(result)
    }

    pub fn collect_tags(&self, store: &Store, top_n: usize) -> Result<TagSummary, HarvestError> {
        let (_, summary) = TagCollector::new(top_n).collect(store)?;
        Ok(summary)
    }

    pub fn partition(&self, store: &Store) -> Result<PartitionSummary, HarvestError> {
        partition_labeled(store)
    }

    pub fn build_matrix(&self, store: &Store) -> Result<MatrixSummary, HarvestError> {
        let (_, summary) = build_target_matrix(store)?;
        Ok(summary)
    }
}
