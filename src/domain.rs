use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use reqwest::Url;
use serde::Serialize;
use serde_json::Value;

use crate::error::HarvestError;

static HYPHEN_RUN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"-{2,}").unwrap());

/// Derives a directory-safe identifier from a human-readable title.
///
/// Lowercases, turns whitespace into hyphens, keeps ASCII alphanumerics plus
/// `-`, `.` and `_`, then collapses hyphen runs. Distinct titles may map to the
/// same identifier; callers do not detect that.
pub fn normalize_name(title: &str) -> String {
    let filtered: String = title
        .to_lowercase()
        .chars()
        .map(|ch| if ch.is_whitespace() { '-' } else { ch })
        .filter(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '-' | '.' | '_'))
        .collect();
    HYPHEN_RUN.replace_all(&filtered, "-").into_owned()
}

fn usable_name(name: &str) -> bool {
    !name.is_empty() && !name.chars().all(|ch| ch == '.')
}

/// Case-insensitive allow-list of resource formats.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FormatFilter {
    formats: BTreeSet<String>,
}

impl FormatFilter {
    pub fn new<I, S>(formats: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            formats: formats
                .into_iter()
                .map(|format| format.as_ref().to_lowercase())
                .collect(),
        }
    }

    /// Spreadsheet formats only.
    pub fn ckan_default() -> Self {
        Self::new(["xls", "xlsx", "csv"])
    }

    pub fn harvest_default() -> Self {
        Self::new(["xls", "xlsx", "csv", "json", "txt"])
    }

    pub fn accepts_token(&self, token: &str) -> bool {
        !token.is_empty() && self.formats.contains(&token.to_lowercase())
    }

    /// Decides on the declared format; a resource without one is rejected.
    pub fn accepts(&self, resource: &Resource) -> bool {
        resource
            .format
            .as_deref()
            .map(|format| self.accepts_token(format))
            .unwrap_or(false)
    }

    /// Decides on the extension of the final path segment.
    pub fn accepts_file_name(&self, file_name: &str) -> bool {
        file_name
            .rsplit_once('.')
            .map(|(_, ext)| self.accepts_token(ext))
            .unwrap_or(false)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.formats.iter().map(String::as_str)
    }
}

impl fmt::Display for FormatFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.iter().collect::<Vec<_>>().join(","))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Resource {
    pub url: String,
    pub format: Option<String>,
}

impl Resource {
    pub fn new(url: impl Into<String>, format: Option<&str>) -> Self {
        Self {
            url: url.into(),
            format: format.map(str::to_string),
        }
    }

    /// Local file name: the last segment of the URL path.
    pub fn file_name(&self) -> Option<String> {
        let segment = match Url::parse(&self.url) {
            Ok(url) => url
                .path_segments()
                .and_then(|mut segments| segments.next_back())
                .map(str::to_string),
            Err(_) => self
                .url
                .split(['?', '#'])
                .next()
                .and_then(|path| path.rsplit('/').next())
                .map(str::to_string),
        }?;
        usable_name(&segment).then_some(segment)
    }
}

/// One catalog record as discovered by a listing call.
#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    pub name: String,
    pub title: String,
    pub resources: Vec<Resource>,
    pub tags: Vec<String>,
    pub metadata: Value,
}

impl Dataset {
    pub fn from_record(record: Value) -> Result<Self, HarvestError> {
        let object = record
            .as_object()
            .ok_or_else(|| HarvestError::InvalidRecord("record is not an object".to_string()))?;

        let name = object
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let title = object
            .get("title")
            .and_then(Value::as_str)
            .filter(|title| !title.trim().is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| name.clone());
        if title.is_empty() {
            return Err(HarvestError::InvalidRecord(
                "record has neither title nor name".to_string(),
            ));
        }

        let resources = object
            .get("resources")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| {
                        let url = item.get("url").and_then(Value::as_str)?;
                        let format = item.get("format").and_then(Value::as_str);
                        Some(Resource::new(url, format))
                    })
                    .collect()
            })
            .unwrap_or_default();

        let tags = extract_tags(&record);

        Ok(Self {
            name,
            title,
            resources,
            tags,
            metadata: record,
        })
    }

    /// Normalized title, falling back to the catalog key.
    pub fn identifier(&self) -> Result<String, HarvestError> {
        [self.title.as_str(), self.name.as_str()]
            .into_iter()
            .map(normalize_name)
            .find(|name| usable_name(name))
            .ok_or_else(|| HarvestError::InvalidDatasetName(self.title.clone()))
    }

    pub fn accepted_resources<'a>(&'a self, filter: &FormatFilter) -> Vec<&'a Resource> {
        self.resources
            .iter()
            .filter(|resource| filter.accepts(resource))
            .collect()
    }
}

/// Reads the `tags` field: plain strings, or objects carrying
/// `display_name` (CKAN) or `name`.
pub fn extract_tags(metadata: &Value) -> Vec<String> {
    metadata
        .get("tags")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| match item {
                    Value::String(tag) => Some(tag.as_str()),
                    Value::Object(map) => map
                        .get("display_name")
                        .or_else(|| map.get("name"))
                        .and_then(Value::as_str),
                    _ => None,
                })
                .filter(|tag| !tag.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// `<prefix>/<owner>/<dataset>/<file...>` as listed by the object-storage mirror.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObjectKey {
    key: String,
    owner: String,
    dataset: String,
    file_name: String,
}

impl ObjectKey {
    pub fn as_str(&self) -> &str {
        &self.key
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn dataset(&self) -> &str {
        &self.dataset
    }

    /// Nested path segments joined with `.`.
    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn dataset_id(&self) -> String {
        format!("{}.{}", self.owner, self.dataset)
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.key)
    }
}

impl FromStr for ObjectKey {
    type Err = HarvestError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let parts = value.split('/').collect::<Vec<_>>();
        if parts.len() < 4 || parts[1..].iter().any(|part| part.is_empty()) {
            return Err(HarvestError::InvalidObjectKey(value.to_string()));
        }
        let file_name = parts[3..].join(".");
        if !usable_name(&file_name) || !usable_name(parts[1]) || !usable_name(parts[2]) {
            return Err(HarvestError::InvalidObjectKey(value.to_string()));
        }
        Ok(Self {
            key: value.to_string(),
            owner: parts[1].to_string(),
            dataset: parts[2].to_string(),
            file_name,
        })
    }
}
