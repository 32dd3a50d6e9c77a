//! Source units: SQL text located on a backend, possibly expanded from a template

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Storage backend tag
///
/// Serialized as its tag (`fs`, `gcs`, `s3`). Tags this crate does not know are
/// kept verbatim so graphs written by other tools still load.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum BackendKind {
    /// Local filesystem
    Fs,

    /// Google Cloud Storage (or an emulator speaking its JSON API)
    Gcs,

    /// Amazon S3 (or a compatible store such as MinIO)
    S3,

    /// Any other backend tag
    Other(String),
}

impl BackendKind {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Fs => "fs",
            Self::Gcs => "gcs",
            Self::S3 => "s3",
            Self::Other(tag) => tag,
        }
    }

    /// Object storage units carry a bucket name
    pub fn is_object_storage(&self) -> bool {
        matches!(self, Self::Gcs | Self::S3)
    }
}

impl From<String> for BackendKind {
    fn from(tag: String) -> Self {
        match tag.to_lowercase().as_str() {
            "fs" | "file" => Self::Fs,
            "gcs" => Self::Gcs,
            "s3" => Self::S3,
            _ => Self::Other(tag),
        }
    }
}

impl From<&str> for BackendKind {
    fn from(tag: &str) -> Self {
        Self::from(tag.to_string())
    }
}

impl From<BackendKind> for String {
    fn from(kind: BackendKind) -> Self {
        kind.as_str().to_string()
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Name resolution settings of the backend a unit came from
///
/// Passed explicitly from the locator to the resolver; there is no
/// process-wide default prefix.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolutionContext {
    /// Prefix (`project` or `project.dataset`) for names with at most one dot
    pub default_table_prefix: Option<String>,
}

impl ResolutionContext {
    pub fn new(default_table_prefix: Option<String>) -> Self {
        Self { default_table_prefix }
    }

    /// Complete a table name with the default prefix when it has at most one dot
    pub fn qualify(&self, table: &str) -> String {
        match &self.default_table_prefix {
            Some(prefix) if !prefix.is_empty() && table.matches('.').count() <= 1 => {
                format!("{}.{}", prefix.trim_end_matches('.'), table)
            }
            _ => table.to_string(),
        }
    }
}

/// One SQL text blob, after template expansion
#[derive(Debug, Clone, PartialEq)]
pub struct SourceUnit {
    /// Backend the text was fetched from
    pub kind: BackendKind,

    /// Logical path: relative to the backend root, or the object key
    pub key: String,

    /// Resolved access URI
    pub uri: String,

    /// Bucket name for object storage
    pub bucket: Option<String>,

    /// Parameter set used for expansion (empty when unparametrized)
    pub params: BTreeMap<String, serde_json::Value>,

    /// Rendered SQL text
    pub text: String,

    /// Name resolution settings of the originating backend
    pub context: ResolutionContext,
}

impl SourceUnit {
    /// File stem of the key, used as a placeholder output table name
    pub fn stem(&self) -> &str {
        key_stem(&self.key)
    }
}

/// `main/test_a.sql` -> `test_a`
pub fn key_stem(key: &str) -> &str {
    let name = key.rsplit('/').next().unwrap_or(key);
    name.split('.').next().unwrap_or(name)
}
