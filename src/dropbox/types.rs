//! Dropbox API types
//!
//! Request and response shapes for the folder listing, download and file
//! properties endpoints, and the `RemoteEntry` snapshot handed to the rest
//! of the crate.

use chrono::{DateTime, NaiveDateTime, SecondsFormat, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Property field names written on every synced document
pub const FIELD_TITLE: &str = "title";
pub const FIELD_PUBLISHED: &str = "published";
pub const FIELD_HASH: &str = "hash";

/// File or folder metadata from list_folder and the `Dropbox-API-Result` header
#[derive(Debug, Clone, Deserialize)]
pub struct EntryMetadata {
    /// "file", "folder" or "deleted" (absent in download results)
    #[serde(rename = ".tag", default)]
    pub tag: String,
    pub name: String,
    #[serde(default)]
    pub path_lower: Option<String>,
    #[serde(default)]
    pub client_modified: Option<DateTime<Utc>>,
    #[serde(default)]
    pub server_modified: Option<DateTime<Utc>>,
    #[serde(default)]
    pub content_hash: Option<String>,
    #[serde(default)]
    pub property_groups: Option<Vec<PropertyGroup>>,
}

impl EntryMetadata {
    /// Folders and deleted markers are never documents
    pub fn is_file(&self) -> bool {
        self.tag.is_empty() || self.tag == "file"
    }
}

/// One page of a folder listing
#[derive(Debug, Deserialize)]
pub struct ListFolderResult {
    pub entries: Vec<EntryMetadata>,
    pub cursor: String,
    pub has_more: bool,
}

/// A named group of properties attached to a file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyGroup {
    pub template_id: String,
    pub fields: Vec<PropertyField>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyField {
    pub name: String,
    pub value: String,
}

impl PropertyField {
    fn new(name: &str, value: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            value: value.into(),
        }
    }
}

/// Body for properties/update
#[derive(Debug, Serialize)]
pub struct PropertyGroupUpdate {
    pub template_id: String,
    pub add_or_update_fields: Vec<PropertyField>,
}

/// Filter selecting which property templates list_folder includes
#[derive(Debug, Serialize)]
pub struct TemplateFilter {
    #[serde(rename = ".tag")]
    pub tag: &'static str,
    pub filter_some: Vec<String>,
}

/// Request body for list_folder
#[derive(Debug, Serialize)]
pub struct ListFolderArg {
    pub path: String,
    pub include_property_groups: TemplateFilter,
    pub include_non_downloadable_files: bool,
    pub include_deleted: bool,
}

/// Request body for list_folder/continue
#[derive(Debug, Serialize)]
pub struct ListFolderContinueArg {
    pub cursor: String,
}

/// `Dropbox-API-Arg` header payload for download
#[derive(Debug, Serialize)]
pub struct DownloadArg {
    pub path: String,
}

/// Request body for properties/add
#[derive(Debug, Serialize)]
pub struct AddPropertiesArg {
    pub path: String,
    pub property_groups: Vec<PropertyGroup>,
}

/// Request body for properties/update
#[derive(Debug, Serialize)]
pub struct UpdatePropertiesArg {
    pub path: String,
    pub update_property_groups: Vec<PropertyGroupUpdate>,
}

/// Properties the sync loop keeps on each document
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RemoteProperties {
    pub title: String,
    pub published: Option<DateTime<Utc>>,
    /// Content hash the title/published pair was extracted from
    pub hash: String,
}

impl RemoteProperties {
    /// Read the properties for `template_id` out of an entry's groups
    ///
    /// Returns None when the entry carries no group for the template. A group
    /// with an unreadable publish date keeps an empty hash so the next sync
    /// rewrites it.
    pub fn from_groups(groups: &[PropertyGroup], template_id: &str) -> Option<Self> {
        let group = groups.iter().find(|g| g.template_id == template_id)?;
        let mut props = RemoteProperties::default();
        let mut published_raw = None;

        for field in &group.fields {
            match field.name.as_str() {
                FIELD_TITLE => props.title = field.value.clone(),
                FIELD_PUBLISHED => published_raw = Some(field.value.as_str()),
                FIELD_HASH => props.hash = field.value.clone(),
                _ => {}
            }
        }

        if let Some(raw) = published_raw.filter(|raw| !raw.is_empty()) {
            props.published = parse_published(raw);
            if props.published.is_none() {
                tracing::warn!(value = raw, "Stored publish date is unreadable, forcing refresh");
                props.hash.clear();
            }
        }

        Some(props)
    }

    /// Field list in the order Dropbox echoes it back
    pub fn to_fields(&self) -> Vec<PropertyField> {
        let published = self
            .published
            .map(|p| p.to_rfc3339_opts(SecondsFormat::Secs, true))
            .unwrap_or_default();
        vec![
            PropertyField::new(FIELD_TITLE, self.title.clone()),
            PropertyField::new(FIELD_PUBLISHED, published),
            PropertyField::new(FIELD_HASH, self.hash.clone()),
        ]
    }
}

/// Parse a stored publish date
///
/// RFC 3339 is what this crate writes. Older deployments stored the
/// `2006-01-02 15:04:05 +0000 UTC` form, which is still accepted.
pub fn parse_published(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(date) = DateTime::parse_from_rfc3339(raw) {
        return Some(date.with_timezone(&Utc));
    }
    let legacy = raw.strip_suffix(" +0000 UTC")?;
    NaiveDateTime::parse_from_str(legacy, "%Y-%m-%d %H:%M:%S%.f")
        .ok()
        .map(|naive| Utc.from_utc_datetime(&naive))
}

/// Snapshot of one document as seen by a single listing or download
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteEntry {
    /// Lower-cased full path, e.g. `/blog/hello-world.md`
    pub path: String,
    /// Provider content hash of the current revision
    pub content_hash: String,
    pub modified: DateTime<Utc>,
    pub properties: Option<RemoteProperties>,
}

impl RemoteEntry {
    /// Hash recorded at the last successful sync, empty if never synced
    pub fn stored_hash(&self) -> &str {
        self.properties
            .as_ref()
            .map(|p| p.hash.as_str())
            .unwrap_or("")
    }
}
