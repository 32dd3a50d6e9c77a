//! Dependency graph and its persisted JSON form
//!
//! Outer key: downstream table. Inner key: upstream table. Value: every
//! annotation record that established the edge, in build order.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use stairlight_core::{BackendKind, Diagnostic, DiagnosticCode, Location, Severity};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

/// Upstream table -> annotations of the edge
pub type Upstreams = BTreeMap<String, Vec<EdgeAnnotation>>;

/// Provenance of one edge: where the upstream table is read
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EdgeAnnotation {
    /// Backend tag (`fs`, `gcs`, ...)
    #[serde(rename = "type")]
    pub kind: BackendKind,

    /// Source key
    pub file: String,

    pub uri: String,

    /// 1-based line of the reference
    pub line: usize,

    /// Literal line text
    pub line_str: String,

    /// Bucket name (object storage only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bucket: Option<String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
}

/// Persisted graph could not be loaded
#[derive(Debug, thiserror::Error)]
pub enum GraphSerializationError {
    #[error("Failed to read graph {path}: {message}")]
    Io { path: String, message: String },

    #[error("Malformed graph JSON at line {line}, column {column}: {message}")]
    Json {
        message: String,
        line: usize,
        column: usize,
    },

    #[error("Empty table identifier in graph (downstream '{downstream}')")]
    EmptyIdentifier { downstream: String },

    #[error("Invalid annotation for edge {downstream} -> {upstream}: {message}")]
    InvalidAnnotation {
        downstream: String,
        upstream: String,
        message: String,
    },
}

impl GraphSerializationError {
    /// Convert to a diagnostic pointing at `file`
    pub fn to_diagnostic(&self, file: &str) -> Diagnostic {
        let location = match self {
            GraphSerializationError::Json { line, .. } => Location::with_line(file, *line),
            _ => Location::new(file),
        };
        Diagnostic::new(DiagnosticCode::GraphSerializationError, Severity::Error, self.to_string())
            .with_location(location)
    }
}

impl From<serde_json::Error> for GraphSerializationError {
    fn from(error: serde_json::Error) -> Self {
        GraphSerializationError::Json {
            message: error.to_string(),
            line: error.line(),
            column: error.column(),
        }
    }
}

/// An edge value on disk: a list of annotations, or one bare annotation
#[derive(Deserialize)]
#[serde(untagged)]
enum StoredAnnotations {
    Many(Vec<EdgeAnnotation>),
    One(EdgeAnnotation),
}

/// Table-level lineage: downstream -> upstream -> annotations
///
/// May contain cycles and self-edges.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct DependencyGraph {
    edges: BTreeMap<String, Upstreams>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `downstream` as a node, with no upstream yet
    pub fn add_node(&mut self, downstream: &str) {
        self.edges.entry(downstream.to_string()).or_default();
    }

    /// Append an annotation to `downstream -> upstream`; nothing is overwritten
    pub fn add_edge(&mut self, downstream: &str, upstream: &str, annotation: EdgeAnnotation) {
        self.edges
            .entry(downstream.to_string())
            .or_default()
            .entry(upstream.to_string())
            .or_default()
            .push(annotation);
    }

    /// Direct upstream tables of `downstream`
    pub fn upstreams(&self, downstream: &str) -> Option<&Upstreams> {
        self.edges.get(downstream)
    }

    /// Annotations of one edge
    pub fn annotations(&self, downstream: &str, upstream: &str) -> &[EdgeAnnotation] {
        self.edges
            .get(downstream)
            .and_then(|ups| ups.get(upstream))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Iterate over downstream tables and their upstreams, sorted
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Upstreams)> {
        self.edges.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    /// Whether `table` appears as a downstream or an upstream
    pub fn contains(&self, table: &str) -> bool {
        self.edges.contains_key(table) || self.edges.values().any(|ups| ups.contains_key(table))
    }

    /// Every table identifier, sorted
    pub fn tables(&self) -> Vec<String> {
        self.edges
            .iter()
            .flat_map(|(downstream, ups)| std::iter::once(downstream).chain(ups.keys()))
            .cloned()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Every source file establishing an edge, sorted
    pub fn files(&self) -> Vec<String> {
        self.collect_annotations(|a| a.file.clone())
    }

    /// Every source URI establishing an edge, sorted
    pub fn uris(&self) -> Vec<String> {
        self.collect_annotations(|a| a.uri.clone())
    }

    fn collect_annotations(&self, field: impl Fn(&EdgeAnnotation) -> String) -> Vec<String> {
        self.edges
            .values()
            .flat_map(|ups| ups.values().flatten())
            .map(field)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Number of distinct (downstream, upstream) pairs
    pub fn edge_count(&self) -> usize {
        self.edges.values().map(|ups| ups.len()).sum()
    }

    /// Number of annotation records across all edges
    pub fn annotation_count(&self) -> usize {
        self.edges
            .values()
            .flat_map(|ups| ups.values())
            .map(Vec::len)
            .sum()
    }

    /// Fold `other` into this graph
    ///
    /// Annotations already present on an edge are not repeated, so merging
    /// the same graph twice is a no-op.
    pub fn merge(&mut self, other: DependencyGraph) {
        for (downstream, ups) in other.edges {
            let target = self.edges.entry(downstream).or_default();
            for (upstream, annotations) in ups {
                let existing = target.entry(upstream).or_default();
                for annotation in annotations {
                    if !existing.contains(&annotation) {
                        existing.push(annotation);
                    }
                }
            }
        }
    }

    /// Same keys, nested keys and annotations, ignoring annotation order
    pub fn equivalent(&self, other: &DependencyGraph) -> bool {
        fn normalized(graph: &DependencyGraph) -> BTreeMap<&str, BTreeMap<&str, Vec<&EdgeAnnotation>>> {
            graph
                .edges
                .iter()
                .map(|(downstream, ups)| {
                    let ups = ups
                        .iter()
                        .map(|(upstream, annotations)| {
                            let mut sorted: Vec<&EdgeAnnotation> = annotations.iter().collect();
                            sorted.sort();
                            (upstream.as_str(), sorted)
                        })
                        .collect();
                    (downstream.as_str(), ups)
                })
                .collect()
        }
        normalized(self) == normalized(other)
    }

    /// Pretty JSON; byte-identical for identical graphs
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Load and validate a persisted graph
    pub fn from_json(json: &str) -> Result<Self, GraphSerializationError> {
        let stored: BTreeMap<String, BTreeMap<String, StoredAnnotations>> = serde_json::from_str(json)?;

        let mut graph = DependencyGraph::new();
        for (downstream, ups) in stored {
            if downstream.trim().is_empty() {
                return Err(GraphSerializationError::EmptyIdentifier { downstream });
            }
            graph.add_node(&downstream);

            for (upstream, annotations) in ups {
                if upstream.trim().is_empty() {
                    return Err(GraphSerializationError::EmptyIdentifier { downstream });
                }
                let annotations = match annotations {
                    StoredAnnotations::Many(list) => list,
                    StoredAnnotations::One(single) => vec![single],
                };
                for annotation in annotations {
                    if annotation.line == 0 {
                        return Err(GraphSerializationError::InvalidAnnotation {
                            downstream,
                            upstream,
                            message: "line numbers are 1-based".to_string(),
                        });
                    }
                    graph.add_edge(&downstream, &upstream, annotation);
                }
            }
        }
        Ok(graph)
    }

    pub fn from_file(path: &Path) -> Result<Self, GraphSerializationError> {
        let contents = std::fs::read_to_string(path).map_err(|e| GraphSerializationError::Io {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        Self::from_json(&contents)
    }

    pub fn save_to_file(&self, path: &Path) -> Result<(), std::io::Error> {
        let json = self.to_json()?;
        std::fs::write(path, json)
    }

    /// SHA-256 of the serialized graph, hex encoded
    pub fn digest(&self) -> Result<String, serde_json::Error> {
        let json = self.to_json()?;
        let mut hasher = Sha256::new();
        hasher.update(json.as_bytes());
        Ok(hex::encode(hasher.finalize()))
    }
}
