//! Graph assembly from reconciled units
//!
//! Pure aggregation: units are fed in a deterministic order and every edge
//! record is appended. No cycle detection, no ordering of tables.

use crate::graph::{DependencyGraph, EdgeAnnotation};
use stairlight_core::{BackendKind, SourceUnit};
use std::collections::BTreeMap;
use tracing::debug;

/// Where a unit's text came from, shared by all of its edges
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Provenance {
    pub kind: BackendKind,
    pub file: String,
    pub uri: String,
    pub bucket: Option<String>,
}

impl Provenance {
    pub fn from_unit(unit: &SourceUnit) -> Self {
        Self {
            kind: unit.kind.clone(),
            file: unit.key.clone(),
            uri: unit.uri.clone(),
            bucket: unit.bucket.clone(),
        }
    }

    /// Annotation for a reference at `line`
    pub fn annotate(&self, input: &UpstreamInput) -> EdgeAnnotation {
        EdgeAnnotation {
            kind: self.kind.clone(),
            file: self.file.clone(),
            uri: self.uri.clone(),
            line: input.line,
            line_str: input.line_str.clone(),
            bucket: if self.kind.is_object_storage() {
                self.bucket.clone()
            } else {
                None
            },
            labels: input.labels.clone(),
        }
    }
}

/// One graph-eligible reference of a unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamInput {
    pub table: String,
    pub line: usize,
    pub line_str: String,
    pub labels: BTreeMap<String, String>,
}

/// Accumulates units into a [`DependencyGraph`]
#[derive(Debug, Default)]
pub struct GraphBuilder {
    graph: DependencyGraph,
    units: usize,
}

impl GraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one unit producing `downstream`
    ///
    /// The downstream table becomes a node even without inputs. Returns the
    /// number of annotation records appended.
    pub fn add_unit(&mut self, downstream: &str, provenance: &Provenance, inputs: &[UpstreamInput]) -> usize {
        self.units += 1;
        self.graph.add_node(downstream);

        let mut added = 0;
        for input in inputs.iter().filter(|input| !input.table.trim().is_empty()) {
            self.graph
                .add_edge(downstream, &input.table, provenance.annotate(input));
            added += 1;
        }

        debug!(
            "{} <- {} record(s) from {}",
            downstream, added, provenance.file
        );
        added
    }

    /// Units added so far
    pub fn unit_count(&self) -> usize {
        self.units
    }

    pub fn finish(self) -> DependencyGraph {
        self.graph
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn provenance(file: &str) -> Provenance {
        Provenance {
            kind: BackendKind::Fs,
            file: file.to_string(),
            uri: format!("/repo/{}", file),
            bucket: None,
        }
    }

    fn input(table: &str, line: usize) -> UpstreamInput {
        UpstreamInput {
            table: table.to_string(),
            line,
            line_str: format!("FROM {}", table),
            labels: BTreeMap::new(),
        }
    }

    #[test]
    fn same_pair_from_two_files_keeps_both_records() {
        let mut builder = GraphBuilder::new();
        builder.add_unit("p.d.x", &provenance("a.sql"), &[input("p.d.y", 3)]);
        builder.add_unit("p.d.x", &provenance("b.sql"), &[input("p.d.y", 9)]);
        let graph = builder.finish();

        let records: Vec<(&str, usize)> = graph
            .annotations("p.d.x", "p.d.y")
            .iter()
            .map(|a| (a.file.as_str(), a.line))
            .collect();
        assert_eq!(records, vec![("a.sql", 3), ("b.sql", 9)]);
    }

    #[test]
    fn self_edges_and_empty_units() {
        let mut builder = GraphBuilder::new();
        builder.add_unit("p.d.t", &provenance("merge.sql"), &[input("p.d.t", 1)]);
        let added = builder.add_unit("p.d.empty", &provenance("empty.sql"), &[]);
        assert_eq!(added, 0);
        assert_eq!(builder.unit_count(), 2);

        let graph = builder.finish();
        assert_eq!(graph.annotations("p.d.t", "p.d.t").len(), 1);
        assert!(graph.upstreams("p.d.empty").is_some_and(|ups| ups.is_empty()));
    }

    #[test]
    fn bucket_only_on_object_storage() {
        let fs = Provenance {
            bucket: Some("ignored".to_string()),
            ..provenance("a.sql")
        };
        assert_eq!(fs.annotate(&input("p.d.y", 1)).bucket, None);

        let gcs = Provenance {
            kind: BackendKind::Gcs,
            file: "sql/a.sql".to_string(),
            uri: "gs://b/sql/a.sql".to_string(),
            bucket: Some("b".to_string()),
        };
        let mut labelled = input("p.d.y", 2);
        labelled.labels.insert("Source".to_string(), "gcs".to_string());
        let annotation = gcs.annotate(&labelled);
        assert_eq!(annotation.bucket.as_deref(), Some("b"));
        assert_eq!(annotation.labels["Source"], "gcs");
    }
}
