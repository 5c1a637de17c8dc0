use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use futures::{StreamExt, TryStreamExt};
use object_store::aws::{AmazonS3Builder, AmazonS3ConfigKey};
use object_store::path::Path as StorePath;
use object_store::{
    BackoffConfig, ClientOptions, DynObjectStore, ObjectMeta, ObjectStore as _, RetryConfig,
};
use reqwest::blocking::Client;
use reqwest::header::{AUTHORIZATION, HeaderValue};
use serde::Deserialize;
use serde_json::Value;
use tokio::runtime::{Builder, Runtime};
use tracing::{debug, warn};

use crate::catalog::{Page, PagedListing};
use crate::config::{DatasetApiSettings, ObjectStoreSettings};
use crate::domain::ObjectKey;
use crate::error::HarvestError;
use crate::fetch::{PartialFile, RetryPolicy, default_headers, send_retrying};

/// Keys pulled from the bucket listing per page.
pub const LIST_PAGE_SIZE: usize = 1000;

/// Object-storage mirror: a paged key listing plus per-object download.
pub trait ObjectStore: PagedListing<Item = ObjectKey> + Send + Sync {
    fn download(&self, key: &ObjectKey, destination: &Path) -> Result<u64, HarvestError>;
}

/// Per-dataset metadata lookup for datasets discovered through the mirror.
pub trait DatasetApi: Send + Sync {
    fn dataset_metadata(&self, owner: &str, dataset: &str) -> Result<Value, HarvestError>;

    /// Datasets linked from a project, as `(owner, id)` pairs.
    fn linked_datasets(
        &self,
        owner: &str,
        project: &str,
    ) -> Result<Vec<(String, String)>, HarvestError>;
}

/// Bucket mirror backed by the `object_store` crate. Calls are driven to
/// completion on a private runtime so the harvester stays synchronous.
pub struct BucketClient {
    store: Arc<DynObjectStore>,
    runtime: Runtime,
    prefix: StorePath,
    page_size: usize,
}

impl BucketClient {
    /// Builds an S3 client from the config, with `AWS_*` environment values
    /// as fallback. Without any access key the requests go out unsigned.
    pub fn new(
        settings: &ObjectStoreSettings,
        timeout: Duration,
        policy: &RetryPolicy,
    ) -> Result<Self, HarvestError> {
        let mut builder = AmazonS3Builder::from_env()
            .with_bucket_name(settings.bucket.as_str())
            .with_region(settings.region.as_str())
            .with_client_options(ClientOptions::new().with_timeout(timeout))
            .with_retry(retry_config(policy));
        if let Some(endpoint) = &settings.endpoint {
            builder = builder
                .with_endpoint(endpoint.as_str())
                .with_allow_http(endpoint.starts_with("http://"));
        }
        if let Some(credentials) = &settings.credentials {
            builder = builder
                .with_access_key_id(credentials.access_key_id.as_str())
                .with_secret_access_key(credentials.secret_access_key.as_str());
        }
        if builder
            .get_config_value(&AmazonS3ConfigKey::AccessKeyId)
            .is_none()
        {
            debug!(bucket = %settings.bucket, "no access key, sending unsigned requests");
            builder = builder.with_skip_signature(true);
        }
        let store = builder
            .build()
            .map_err(|err| HarvestError::ConfigParse(format!("object_store: {err}")))?;
        Self::from_store(Arc::new(store), &settings.prefix)
    }

    /// Wraps an already configured store; keys are listed under `prefix`.
    pub fn from_store(store: Arc<DynObjectStore>, prefix: &str) -> Result<Self, HarvestError> {
        let runtime = Builder::new_multi_thread()
            .enable_all()
            .build()
            .map_err(|err| HarvestError::ObjectStoreHttp(format!("runtime: {err}")))?;
        Ok(Self {
            store,
            runtime,
            prefix: StorePath::from(prefix),
            page_size: LIST_PAGE_SIZE,
        })
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }
}

impl PagedListing for BucketClient {
    type Item = ObjectKey;

    /// The cursor is the last key of the previous page; listing resumes
    /// strictly after it.
    fn page(&self, cursor: Option<&str>) -> Result<Page<ObjectKey>, HarvestError> {
        debug!(prefix = %self.prefix, cursor, "listing objects");
        let listing = match cursor {
            Some(offset) => {
                let offset = StorePath::parse(offset)
                    .map_err(|err| HarvestError::InvalidObjectKey(err.to_string()))?;
                self.store.list_with_offset(Some(&self.prefix), &offset)
            }
            None => self.store.list(Some(&self.prefix)),
        };
        let metas = self
            .runtime
            .block_on(listing.take(self.page_size).try_collect::<Vec<ObjectMeta>>())
            .map_err(object_error)?;

        let next = if metas.len() == self.page_size {
            metas.last().map(|meta| meta.location.to_string())
        } else {
            None
        };
        let items = metas
            .into_iter()
            .filter_map(|meta| match meta.location.to_string().parse::<ObjectKey>() {
                Ok(key) => Some(key),
                Err(_) => {
                    warn!(key = %meta.location, "skipping object outside <prefix>/<owner>/<dataset>/<file>");
                    None
                }
            })
            .collect();
        Ok(Page { items, next })
    }
}

impl ObjectStore for BucketClient {
    fn download(&self, key: &ObjectKey, destination: &Path) -> Result<u64, HarvestError> {
        let location = StorePath::parse(key.as_str())
            .map_err(|err| HarvestError::InvalidObjectKey(err.to_string()))?;
        self.runtime.block_on(async {
            let result = self.store.get(&location).await.map_err(object_error)?;
            let expected = result.meta.size as u64;
            let mut chunks = result.into_stream();
            let mut partial = PartialFile::create(destination)?;
            while let Some(chunk) = chunks.next().await {
                partial.write_chunk(&chunk.map_err(object_error)?)?;
            }
            partial.finish(key.as_str(), Some(expected), destination)
        })
    }
}

fn retry_config(policy: &RetryPolicy) -> RetryConfig {
    RetryConfig {
        backoff: BackoffConfig {
            init_backoff: policy.min_wait,
            max_backoff: policy.max_wait,
            base: 2.0,
        },
        max_retries: policy
            .max_attempts
            .map(|attempts| attempts.saturating_sub(1) as usize)
            .unwrap_or(usize::MAX),
        retry_timeout: Duration::from_secs(24 * 60 * 60),
    }
}

fn object_error(err: object_store::Error) -> HarvestError {
    HarvestError::ObjectStoreHttp(err.to_string())
}

#[derive(Debug, Deserialize)]
struct ProjectRecord {
    #[serde(default, rename = "linkedDatasets")]
    linked_datasets: Vec<LinkedDataset>,
}

#[derive(Debug, Deserialize)]
struct LinkedDataset {
    owner: String,
    id: String,
}

/// data.world style REST API, authenticated with a bearer token.
#[derive(Clone)]
pub struct DataWorldClient {
    client: Client,
    base_url: String,
    policy: RetryPolicy,
}

impl DataWorldClient {
    pub fn new(
        settings: &DatasetApiSettings,
        timeout: Duration,
        policy: RetryPolicy,
    ) -> Result<Self, HarvestError> {
        let mut headers = default_headers()?;
        if let Some(token) = &settings.token {
            let mut value = HeaderValue::from_str(&format!("Bearer {}", token.trim()))
                .map_err(|err| HarvestError::ConfigParse(err.to_string()))?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }
        let client = Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .map_err(|err| HarvestError::Http(err.to_string()))?;
        Ok(Self {
            client,
            base_url: settings.base_url.clone(),
            policy,
        })
    }

    fn get_json(&self, url: String) -> Result<Value, HarvestError> {
        let response = send_retrying(&self.policy, &url, || self.client.get(&url))?;
        if !response.status().is_success() {
            return Err(HarvestError::Status {
                url,
                status: response.status().as_u16(),
            });
        }
        response
            .json()
            .map_err(|err| HarvestError::Http(err.to_string()))
    }
}

impl DatasetApi for DataWorldClient {
    fn dataset_metadata(&self, owner: &str, dataset: &str) -> Result<Value, HarvestError> {
        self.get_json(format!("{}/datasets/{owner}/{dataset}", self.base_url))
    }

    fn linked_datasets(
        &self,
        owner: &str,
        project: &str,
    ) -> Result<Vec<(String, String)>, HarvestError> {
        let url = format!("{}/projects/{owner}/{project}", self.base_url);
        let record: ProjectRecord = serde_json::from_value(self.get_json(url.clone())?)
            .map_err(|err| HarvestError::Http(format!("{url}: {err}")))?;
        Ok(record
            .linked_datasets
            .into_iter()
            .map(|linked| (linked.owner, linked.id))
            .collect())
    }
}
