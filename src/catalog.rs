use std::time::Duration;

use reqwest::blocking::Client;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::domain::Dataset;
use crate::error::HarvestError;
use crate::fetch::{RetryPolicy, default_headers, send_retrying};

/// One page of a remote listing; `next` is the cursor of the following page.
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub next: Option<String>,
}

/// A remote listing that can be read page by page from the start.
pub trait PagedListing {
    type Item;

    fn page(&self, cursor: Option<&str>) -> Result<Page<Self::Item>, HarvestError>;
}

/// Lazily walks a listing, yielding one page at a time. A failed page ends
/// the walk after its error is yielded.
pub struct CatalogWalker<'a, L: PagedListing> {
    listing: &'a L,
    cursor: Option<String>,
    done: bool,
}

impl<'a, L: PagedListing> CatalogWalker<'a, L> {
    pub fn new(listing: &'a L) -> Self {
        Self {
            listing,
            cursor: None,
            done: false,
        }
    }

    /// Flattens the pages into individual items.
    pub fn items(self) -> impl Iterator<Item = Result<L::Item, HarvestError>> + 'a
    where
        L::Item: 'a,
    {
        self.flat_map(|page| match page {
            Ok(items) => items.into_iter().map(Ok).collect::<Vec<_>>(),
            Err(err) => vec![Err(err)],
        })
    }
}

impl<L: PagedListing> Iterator for CatalogWalker<'_, L> {
    type Item = Result<Vec<L::Item>, HarvestError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.listing.page(self.cursor.as_deref()) {
            Ok(page) => {
                match page.next {
                    Some(next) => self.cursor = Some(next),
                    None => self.done = true,
                }
                if page.items.is_empty() && self.done {
                    return None;
                }
                Some(Ok(page.items))
            }
            Err(err) => {
                self.done = true;
                Some(Err(err))
            }
        }
    }
}

/// Groups a fallible item stream into batches of at most `size`. Items read
/// before an error are flushed as a batch ahead of the error itself.
pub struct Batches<I, T> {
    inner: I,
    size: usize,
    pending_error: Option<HarvestError>,
    _item: std::marker::PhantomData<T>,
}

pub fn batched<I, T>(inner: I, size: usize) -> Batches<I, T>
where
    I: Iterator<Item = Result<T, HarvestError>>,
{
    Batches {
        inner,
        size: size.max(1),
        pending_error: None,
        _item: std::marker::PhantomData,
    }
}

impl<I, T> Iterator for Batches<I, T>
where
    I: Iterator<Item = Result<T, HarvestError>>,
{
    type Item = Result<Vec<T>, HarvestError>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(err) = self.pending_error.take() {
            return Some(Err(err));
        }
        let mut batch = Vec::with_capacity(self.size);
        while batch.len() < self.size {
            match self.inner.next() {
                Some(Ok(item)) => batch.push(item),
                Some(Err(err)) => {
                    if batch.is_empty() {
                        return Some(Err(err));
                    }
                    self.pending_error = Some(err);
                    break;
                }
                None => break,
            }
        }
        (!batch.is_empty()).then_some(Ok(batch))
    }
}

#[derive(Debug, Deserialize)]
struct CkanResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    result: Option<Vec<Value>>,
    #[serde(default)]
    error: Option<Value>,
}

/// CKAN action API, read through `current_package_list_with_resources`.
#[derive(Clone)]
pub struct CkanHttpClient {
    client: Client,
    base_url: String,
    policy: RetryPolicy,
}

impl CkanHttpClient {
    pub fn new(
        base_url: &str,
        timeout: Duration,
        policy: RetryPolicy,
    ) -> Result<Self, HarvestError> {
        let client = Client::builder()
            .default_headers(default_headers()?)
            .timeout(timeout)
            .build()
            .map_err(|err| HarvestError::CatalogHttp(err.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            policy,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn listing_url(&self) -> String {
        format!(
            "{}/api/3/action/current_package_list_with_resources",
            self.base_url
        )
    }
}

impl PagedListing for CkanHttpClient {
    type Item = Dataset;

    fn page(&self, cursor: Option<&str>) -> Result<Page<Dataset>, HarvestError> {
        let offset = cursor
            .map(|value| {
                value
                    .parse::<usize>()
                    .map_err(|_| HarvestError::CatalogHttp(format!("bad page cursor {value}")))
            })
            .transpose()?
            .unwrap_or(0);
        let url = self.listing_url();
        debug!(url, offset, "listing datasets");
        let response = send_retrying(&self.policy, &url, || {
            self.client.get(&url).query(&[("offset", offset)])
        })
        .map_err(|err| match err {
            HarvestError::Http(message) => HarvestError::CatalogHttp(message),
            other => other,
        })?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response
                .text()
                .unwrap_or_else(|_| "catalog request failed".to_string());
            return Err(HarvestError::CatalogStatus { status, message });
        }
        let body: CkanResponse = response
            .json()
            .map_err(|err| HarvestError::CatalogHttp(err.to_string()))?;
        parse_ckan_page(body, offset)
    }
}

fn parse_ckan_page(body: CkanResponse, offset: usize) -> Result<Page<Dataset>, HarvestError> {
    if !body.success {
        let message = body
            .error
            .map(|error| error.to_string())
            .unwrap_or_else(|| "success=false".to_string());
        return Err(HarvestError::CatalogHttp(message));
    }
    let records = body.result.unwrap_or_default();
    let count = records.len();
    let items = records
        .into_iter()
        .filter_map(|record| match Dataset::from_record(record) {
            Ok(dataset) => Some(dataset),
            Err(err) => {
                warn!(error = %err, "skipping catalog record");
                None
            }
        })
        .collect();
    Ok(Page {
        items,
        next: (count > 0).then(|| (offset + count).to_string()),
    })
}
