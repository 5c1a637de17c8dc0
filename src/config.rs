use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::time::Duration;

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};

use crate::domain::FormatFilter;
use crate::error::HarvestError;
use crate::fetch::RetryPolicy;

pub const DEFAULT_CONFIG_FILE: &str = "harvest.json";
pub const DEFAULT_DATA_DIR: &str = "data";
pub const DEFAULT_BATCH_SIZE: usize = 64;
pub const DEFAULT_COOLDOWN_SECS: u64 = 2;
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_OBJECT_PREFIX: &str = "derived";
pub const DEFAULT_OBJECT_REGION: &str = "us-east-1";
pub const DEFAULT_DATASET_API: &str = "https://api.data.world/v0";

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct HarvestConfig {
    #[serde(default)]
    pub schema_version: Option<u32>,
    #[serde(default)]
    pub data_dir: Option<String>,
    #[serde(default)]
    pub formats: Option<Vec<String>>,
    #[serde(default)]
    pub batch_size: Option<usize>,
    #[serde(default)]
    pub workers: Option<usize>,
    #[serde(default)]
    pub cooldown_secs: Option<u64>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub retry: Option<RetryEntry>,
    #[serde(default)]
    pub ckan_instances: BTreeMap<String, String>,
    #[serde(default)]
    pub object_store: Option<ObjectStoreEntry>,
    #[serde(default)]
    pub dataset_api: Option<DatasetApiEntry>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct RetryEntry {
    #[serde(default)]
    pub min_wait_secs: Option<u64>,
    #[serde(default)]
    pub max_wait_secs: Option<u64>,
    /// `null` keeps retrying forever at the capped interval.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: Option<u32>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct ObjectStoreEntry {
    pub bucket: String,
    /// S3-compatible endpoint; AWS itself when absent.
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub prefix: Option<String>,
    #[serde(default)]
    pub access_key_id: Option<String>,
    #[serde(default)]
    pub secret_access_key: Option<String>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct DatasetApiEntry {
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub token: Option<String>,
}

#[derive(Clone)]
pub struct ObjectStoreCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
}

impl fmt::Debug for ObjectStoreCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectStoreCredentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct ObjectStoreSettings {
    pub bucket: String,
    pub endpoint: Option<String>,
    pub region: String,
    pub prefix: String,
    /// `None` falls back to the `AWS_*` environment, then to unsigned requests.
    pub credentials: Option<ObjectStoreCredentials>,
}

#[derive(Debug, Clone)]
pub struct DatasetApiSettings {
    pub base_url: String,
    pub token: Option<String>,
}

/// Everything one harvesting run needs, with defaults applied.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub schema_version: u32,
    pub data_dir: Utf8PathBuf,
    pub formats: FormatFilter,
    pub batch_size: usize,
    pub workers: usize,
    pub cooldown: Duration,
    pub timeout: Duration,
    pub retry: RetryPolicy,
    pub ckan_instances: BTreeMap<String, String>,
    pub object_store: Option<ObjectStoreSettings>,
    pub dataset_api: DatasetApiSettings,
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Loads `path`, or `harvest.json` in the working directory when present.
    /// A missing default file resolves to the built-in defaults.
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, HarvestError> {
        let config_path = Utf8PathBuf::from(path.unwrap_or(DEFAULT_CONFIG_FILE));

        if path.is_none() && !config_path.as_std_path().exists() {
            return Self::resolve_config(HarvestConfig::default());
        }

        let content = fs::read_to_string(config_path.as_std_path())
            .map_err(|_| HarvestError::ConfigRead(config_path.to_string()))?;
        let config: HarvestConfig = serde_json::from_str(&content)
            .map_err(|err| HarvestError::ConfigParse(err.to_string()))?;

        Self::resolve_config(config)
    }

    pub fn resolve_config(config: HarvestConfig) -> Result<ResolvedConfig, HarvestError> {
        let schema_version = config.schema_version.unwrap_or(1);

        let formats = match config.formats {
            Some(formats) if formats.is_empty() => {
                return Err(HarvestError::ConfigParse(
                    "formats must not be empty".to_string(),
                ));
            }
            Some(formats) => FormatFilter::new(formats),
            None => FormatFilter::harvest_default(),
        };

        let batch_size = config.batch_size.unwrap_or(DEFAULT_BATCH_SIZE);
        if batch_size == 0 {
            return Err(HarvestError::ConfigParse(
                "batch_size must be at least 1".to_string(),
            ));
        }

        let workers = config
            .workers
            .filter(|workers| *workers > 0)
            .unwrap_or_else(default_workers);

        let retry = match config.retry {
            Some(entry) => {
                let defaults = RetryPolicy::default();
                let policy = RetryPolicy {
                    min_wait: entry
                        .min_wait_secs
                        .map(Duration::from_secs)
                        .unwrap_or(defaults.min_wait),
                    max_wait: entry
                        .max_wait_secs
                        .map(Duration::from_secs)
                        .unwrap_or(defaults.max_wait),
                    max_attempts: entry.max_attempts,
                };
                if policy.min_wait > policy.max_wait {
                    return Err(HarvestError::ConfigParse(
                        "retry.min_wait_secs exceeds retry.max_wait_secs".to_string(),
                    ));
                }
                policy
            }
            None => RetryPolicy::default(),
        };

        let object_store = config
            .object_store
            .map(resolve_object_store)
            .transpose()?;

        let dataset_api = config.dataset_api.unwrap_or_default();
        let dataset_api = DatasetApiSettings {
            base_url: dataset_api
                .base_url
                .unwrap_or_else(|| DEFAULT_DATASET_API.to_string())
                .trim_end_matches('/')
                .to_string(),
            token: dataset_api.token.filter(|token| !token.trim().is_empty()),
        };

        Ok(ResolvedConfig {
            schema_version,
            data_dir: Utf8PathBuf::from(
                config
                    .data_dir
                    .unwrap_or_else(|| DEFAULT_DATA_DIR.to_string()),
            ),
            formats,
            batch_size,
            workers,
            cooldown: Duration::from_secs(config.cooldown_secs.unwrap_or(DEFAULT_COOLDOWN_SECS)),
            timeout: Duration::from_secs(config.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS)),
            retry,
            ckan_instances: config.ckan_instances,
            object_store,
            dataset_api,
        })
    }
}

fn resolve_object_store(entry: ObjectStoreEntry) -> Result<ObjectStoreSettings, HarvestError> {
    let non_empty = |value: Option<String>| value.filter(|value| !value.trim().is_empty());
    let credentials = match (
        non_empty(entry.access_key_id),
        non_empty(entry.secret_access_key),
    ) {
        (Some(access_key_id), Some(secret_access_key)) => Some(ObjectStoreCredentials {
            access_key_id,
            secret_access_key,
        }),
        (None, None) => None,
        _ => {
            return Err(HarvestError::ConfigParse(
                "object_store.access_key_id and secret_access_key must be set together"
                    .to_string(),
            ));
        }
    };
    Ok(ObjectStoreSettings {
        bucket: entry.bucket,
        endpoint: non_empty(entry.endpoint)
            .map(|endpoint| endpoint.trim_end_matches('/').to_string()),
        region: non_empty(entry.region).unwrap_or_else(|| DEFAULT_OBJECT_REGION.to_string()),
        prefix: entry
            .prefix
            .unwrap_or_else(|| DEFAULT_OBJECT_PREFIX.to_string())
            .trim_matches('/')
            .to_string(),
        credentials,
    })
}

pub fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|count| count.get())
        .unwrap_or(1)
}

fn default_max_attempts() -> Option<u32> {
    RetryPolicy::default().max_attempts
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_uses_defaults() {
        let resolved = ConfigLoader::resolve_config(HarvestConfig::default()).unwrap();
        assert_eq!(resolved.schema_version, 1);
        assert_eq!(resolved.batch_size, DEFAULT_BATCH_SIZE);
        assert_eq!(resolved.cooldown, Duration::from_secs(2));
        assert_eq!(resolved.data_dir, Utf8PathBuf::from("data"));
        assert!(resolved.formats.accepts_token("json"));
        assert!(resolved.workers >= 1);
        assert_eq!(resolved.dataset_api.base_url, DEFAULT_DATASET_API);
    }
}
