//! Undefined-reference report consumed by `check`
//!
//! The `mapping` section mirrors the mapping file so a completed report can
//! be merged back into configuration as is.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use stairlight_core::{BackendKind, ConfigError, MappingEntry, MappingTable};
use stairlight_sql::{UndefinedReason, UndefinedReference};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// One reference that was kept out of the graph
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UndefinedEntry {
    #[serde(rename = "type")]
    pub kind: BackendKind,

    pub file: String,
    pub uri: String,

    /// Mapped output table of the unit, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub table_name: Option<String>,

    /// Referenced table as parsed (or as declared)
    pub table: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<usize>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub line_str: Option<String>,

    pub reason: UndefinedReason,
}

/// Skeleton mapping entries plus the undefined references behind them
#[derive(Debug, Clone, Default, Serialize)]
pub struct CheckReport {
    pub mapping: Vec<MappingEntry>,
    pub undefined: Vec<UndefinedEntry>,
}

impl CheckReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.mapping.is_empty() && self.undefined.is_empty()
    }

    /// Add a skeleton table for the file at (`kind`, `key`)
    ///
    /// Tables for the same file share one entry.
    pub fn add_skeleton(
        &mut self,
        kind: &BackendKind,
        key: &str,
        table_name: &str,
        parameters: BTreeMap<String, Value>,
    ) {
        let mut table = MappingTable::new(table_name);
        table.parameters = parameters;

        let existing = self
            .mapping
            .iter_mut()
            .find(|entry| entry.kind.as_ref() == Some(kind) && entry.file_suffix.as_deref() == Some(key));
        match existing {
            Some(entry) => {
                if !entry.tables.contains(&table) {
                    entry.tables.push(table);
                }
            }
            None => self.mapping.push(MappingEntry {
                kind: Some(kind.clone()),
                file_suffix: Some(key.to_string()),
                uri: None,
                tables: vec![table],
            }),
        }
    }

    pub fn add_undefined(
        &mut self,
        kind: &BackendKind,
        file: &str,
        uri: &str,
        table_name: Option<&str>,
        reference: &UndefinedReference,
    ) {
        self.undefined.push(UndefinedEntry {
            kind: kind.clone(),
            file: file.to_string(),
            uri: uri.to_string(),
            table_name: table_name.map(str::to_string),
            table: reference.table.clone(),
            line: reference.line,
            line_str: reference.line_str.clone(),
            reason: reference.reason,
        });
    }

    pub fn to_yaml(&self) -> Result<String, ConfigError> {
        serde_yaml::to_string(self).map_err(|e| ConfigError::SerializeError(e.to_string()))
    }

    /// `<prefix>_<UTC timestamp>.yaml`
    pub fn file_name(prefix: &str, now: DateTime<Utc>) -> String {
        format!("{}_{}.yaml", prefix, now.format("%Y%m%d%H%M%S"))
    }

    /// Write the report into `dir` under a timestamped name
    pub fn save(&self, dir: &Path, prefix: &str) -> Result<PathBuf, ConfigError> {
        let path = dir.join(Self::file_name(prefix, Utc::now()));
        let yaml = self.to_yaml()?;
        std::fs::write(&path, yaml).map_err(|e| ConfigError::IoError(format!("{}: {}", path.display(), e)))?;
        Ok(path)
    }
}
