//! Mapping configuration (mapping.toml / mapping.yaml)
//!
//! Declares, per source file, which table the SQL produces, with which
//! template parameters, and how parsed references are confirmed or
//! overridden. Read-only to the pipeline.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use crate::config::{is_yaml, ConfigError};
use crate::source::BackendKind;

/// Parameters applied to every parameter set
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GlobalSection {
    #[serde(default)]
    pub parameters: BTreeMap<String, serde_json::Value>,
}

/// One parameter set of a mapped file and the table it produces
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MappingTable {
    /// Output (downstream) table
    pub table_name: String,

    /// Template parameters for this expansion
    #[serde(default)]
    pub parameters: BTreeMap<String, serde_json::Value>,

    /// Placeholders rendered as the literal `ignored`
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ignore_parameters: Vec<String>,

    /// Labels attached to every edge produced by this table
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,

    /// Input tables declared to be read by the SQL
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub upstream: Vec<String>,

    /// Parsed identifier -> authoritative identifier
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub overrides: BTreeMap<String, String>,
}

impl MappingTable {
    pub fn new(table_name: impl Into<String>) -> Self {
        Self {
            table_name: table_name.into(),
            parameters: BTreeMap::new(),
            ignore_parameters: Vec::new(),
            labels: BTreeMap::new(),
            upstream: Vec::new(),
            overrides: BTreeMap::new(),
        }
    }
}

/// Correspondence between a source file and the tables it produces
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MappingEntry {
    /// Restrict the entry to one backend kind
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<BackendKind>,

    /// Matches units whose key ends with this suffix
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_suffix: Option<String>,

    /// Matches the unit with exactly this URI
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,

    /// One parameter set per element, in expansion order
    #[serde(default)]
    pub tables: Vec<MappingTable>,
}

impl MappingEntry {
    /// Whether this entry describes the unit at (`kind`, `key`, `uri`)
    pub fn matches(&self, kind: &BackendKind, key: &str, uri: &str) -> bool {
        if self.kind.as_ref().is_some_and(|k| k != kind) {
            return false;
        }
        let by_suffix = self
            .file_suffix
            .as_deref()
            .is_some_and(|suffix| !suffix.is_empty() && key.ends_with(suffix));
        let by_uri = self.uri.as_deref().is_some_and(|u| u == uri);
        by_suffix || by_uri
    }

    /// Human-readable selector for diagnostics
    pub fn selector(&self) -> String {
        match (&self.file_suffix, &self.uri) {
            (Some(suffix), _) => suffix.clone(),
            (None, Some(uri)) => uri.clone(),
            (None, None) => "<empty>".to_string(),
        }
    }
}

/// Labels for tables no mapping entry produces (typically sources)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtraLabel {
    pub table_name: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

/// Mapping file contents
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MappingConfig {
    #[serde(default)]
    pub global: GlobalSection,

    #[serde(default)]
    pub mapping: Vec<MappingEntry>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extra_labels: Vec<ExtraLabel>,
}

impl MappingConfig {
    /// Load from a TOML or YAML file, chosen by extension
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(format!("{}: {}", path.display(), e)))?;
        let mapping = if is_yaml(path) {
            Self::from_yaml(&contents)?
        } else {
            Self::from_toml(&contents)?
        };
        mapping.validate()?;
        Ok(mapping)
    }

    pub fn from_toml(toml: &str) -> Result<Self, ConfigError> {
        toml::from_str(toml).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(yaml).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    pub fn to_yaml(&self) -> Result<String, ConfigError> {
        serde_yaml::to_string(self).map_err(|e| ConfigError::SerializeError(e.to_string()))
    }

    /// Every entry needs a selector, every table a name
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (idx, entry) in self.mapping.iter().enumerate() {
            if entry.file_suffix.is_none() && entry.uri.is_none() {
                return Err(ConfigError::Invalid(format!(
                    "mapping[{}]: either 'file_suffix' or 'uri' is required",
                    idx
                )));
            }
            if let Some(pos) = entry.tables.iter().position(|t| t.table_name.trim().is_empty()) {
                return Err(ConfigError::Invalid(format!(
                    "mapping[{}].tables[{}]: 'table_name' is empty",
                    idx, pos
                )));
            }
        }
        Ok(())
    }

    /// First entry describing the unit, with its index
    pub fn find_entry(&self, kind: &BackendKind, key: &str, uri: &str) -> Option<(usize, &MappingEntry)> {
        self.mapping
            .iter()
            .enumerate()
            .find(|(_, entry)| entry.matches(kind, key, uri))
    }

    /// Extra labels configured for `table`
    pub fn extra_labels_for(&self, table: &str) -> BTreeMap<String, String> {
        self.extra_labels
            .iter()
            .filter(|extra| extra.table_name == table)
            .flat_map(|extra| extra.labels.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    const MAPPING_YAML: &str = r#"
global:
  parameters:
    DESTINATION_PROJECT: dest-project
    params:
      PROJECT: g_project
mapping:
  - type: fs
    file_suffix: sql/main/test_a.sql
    tables:
      - table_name: PROJECT_D.DATASET_E.TABLE_F
        parameters:
          params:
            PROJECT: PROJECT_J
            DATASET: DATASET_K
        ignore_parameters:
          - execution_date.add
        labels:
          Source: fs
          Test: a
  - file_suffix: sql/main/test_b.sql
    tables:
      - table_name: proj.ds.b
        upstream: [proj.ds.declared]
        overrides:
          tmp_source: proj.ds.real_source
  - type: gcs
    uri: gs://stairlight/sql/cte/cte_multi_line.sql
    tables:
      - table_name: PROJECT_G.DATASET_H.TABLE_I
extra_labels:
  - table_name: PROJECT_J.DATASET_K.TABLE_L
    labels:
      Test: b
"#;

    #[test]
    fn parse_mapping_yaml() {
        let mapping = MappingConfig::from_yaml(MAPPING_YAML).unwrap();
        assert!(mapping.validate().is_ok());
        assert_eq!(mapping.mapping.len(), 3);
        assert_eq!(mapping.global.parameters["DESTINATION_PROJECT"], json!("dest-project"));

        let table = &mapping.mapping[0].tables[0];
        assert_eq!(table.parameters["params"], json!({"PROJECT": "PROJECT_J", "DATASET": "DATASET_K"}));
        assert_eq!(table.ignore_parameters, vec!["execution_date.add".to_string()]);
        assert_eq!(table.labels.get("Test").map(String::as_str), Some("a"));

        let b = &mapping.mapping[1].tables[0];
        assert_eq!(b.upstream, vec!["proj.ds.declared".to_string()]);
        assert_eq!(b.overrides["tmp_source"], "proj.ds.real_source");
    }

    #[test]
    fn first_matching_entry_wins() {
        let mut mapping = MappingConfig::from_yaml(MAPPING_YAML).unwrap();
        let mut duplicate = mapping.mapping[0].clone();
        duplicate.tables[0].table_name = "other.ds.t".to_string();
        mapping.mapping.push(duplicate);

        let (idx, entry) = mapping
            .find_entry(&BackendKind::Fs, "tests/sql/main/test_a.sql", "/abs/tests/sql/main/test_a.sql")
            .unwrap();
        assert_eq!(idx, 0);
        assert_eq!(entry.tables[0].table_name, "PROJECT_D.DATASET_E.TABLE_F");
    }

    #[test]
    fn kind_and_uri_matching() {
        let mapping = MappingConfig::from_yaml(MAPPING_YAML).unwrap();

        // Entry 0 is restricted to fs
        assert!(mapping
            .find_entry(&BackendKind::Gcs, "sql/main/test_a.sql", "gs://b/sql/main/test_a.sql")
            .is_none());

        let (idx, _) = mapping
            .find_entry(
                &BackendKind::Gcs,
                "sql/cte/cte_multi_line.sql",
                "gs://stairlight/sql/cte/cte_multi_line.sql",
            )
            .unwrap();
        assert_eq!(idx, 2);
    }

    #[test]
    fn extra_labels_lookup() {
        let mapping = MappingConfig::from_yaml(MAPPING_YAML).unwrap();
        let labels = mapping.extra_labels_for("PROJECT_J.DATASET_K.TABLE_L");
        assert_eq!(labels.get("Test").map(String::as_str), Some("b"));
        assert!(mapping.extra_labels_for("unknown.ds.t").is_empty());
    }

    #[test]
    fn entry_without_selector_is_invalid() {
        let mapping = MappingConfig::from_toml(
            r#"
[[mapping]]
type = "fs"

[[mapping.tables]]
table_name = "proj.ds.t"
"#,
        )
        .unwrap();
        assert!(matches!(mapping.validate(), Err(ConfigError::Invalid(_))));
    }
}
