//! Seed tables selected by `key:value` labels

use stairlight_core::MappingConfig;
use std::collections::{BTreeMap, HashSet};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LabelError {
    #[error("Invalid label '{0}': expected key:value")]
    Malformed(String),
}

/// Parse `key:value`; the value may itself contain `:`
pub fn parse_label(label: &str) -> Result<(String, String), LabelError> {
    match label.split_once(':') {
        Some((key, value)) if !key.trim().is_empty() && !value.trim().is_empty() => {
            Ok((key.trim().to_string(), value.trim().to_string()))
        }
        _ => Err(LabelError::Malformed(label.to_string())),
    }
}

fn matches_all(labels: &BTreeMap<String, String>, targets: &[(String, String)]) -> bool {
    !labels.is_empty()
        && targets
            .iter()
            .all(|(key, value)| labels.get(key).is_some_and(|v| v == value))
}

/// Tables whose labels match every target pair
///
/// Mapped output tables come first (mapping order), then `extra_labels`
/// tables. Each table is listed once.
pub fn find_tables_by_labels(mapping: &MappingConfig, targets: &[(String, String)]) -> Vec<String> {
    if targets.is_empty() {
        return Vec::new();
    }

    let mapped = mapping
        .mapping
        .iter()
        .flat_map(|entry| entry.tables.iter())
        .filter(|table| matches_all(&table.labels, targets))
        .map(|table| table.table_name.as_str());
    let extra = mapping
        .extra_labels
        .iter()
        .filter(|extra| matches_all(&extra.labels, targets))
        .map(|extra| extra.table_name.as_str());

    let mut seen = HashSet::new();
    mapped
        .chain(extra)
        .filter(|table| seen.insert(*table))
        .map(str::to_string)
        .collect()
}
