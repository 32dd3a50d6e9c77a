//! Upstream/downstream queries over a built graph
//!
//! Read-only: the graph is borrowed and a reverse index is built once per
//! query engine.

use crate::graph::{DependencyGraph, EdgeAnnotation};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet, VecDeque};
use std::fmt;
use tracing::debug;

/// Edge direction to follow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Tables the seed reads from
    Up,

    /// Tables reading from the seed
    Down,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Up => write!(f, "upstream"),
            Direction::Down => write!(f, "downstream"),
        }
    }
}

/// What a non-verbose query returns
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputType {
    /// Table identifiers
    #[default]
    Table,

    /// Source files of the discovering edges
    File,
}

/// A lineage query for one or more seed tables
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryRequest {
    pub tables: Vec<String>,
    pub direction: Direction,
    pub recursive: bool,
    pub verbose: bool,
    pub output: OutputType,
}

impl QueryRequest {
    pub fn new(tables: Vec<String>, direction: Direction) -> Self {
        Self {
            tables,
            direction,
            recursive: false,
            verbose: false,
            output: OutputType::Table,
        }
    }

    pub fn recursive(mut self, recursive: bool) -> Self {
        self.recursive = recursive;
        self
    }

    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn output(mut self, output: OutputType) -> Self {
        self.output = output;
        self
    }
}

/// Result for one seed
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum QueryResult {
    /// Identifiers in discovery order
    Tables(Vec<String>),

    /// Sorted source files
    Files(Vec<String>),

    /// Identifier -> annotations of the edge that discovered it
    Detailed(IndexMap<String, Vec<EdgeAnnotation>>),
}

impl QueryResult {
    pub fn is_empty(&self) -> bool {
        match self {
            QueryResult::Tables(tables) => tables.is_empty(),
            QueryResult::Files(files) => files.is_empty(),
            QueryResult::Detailed(detailed) => detailed.is_empty(),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            QueryResult::Tables(tables) => tables.len(),
            QueryResult::Files(files) => files.len(),
            QueryResult::Detailed(detailed) => detailed.len(),
        }
    }
}

/// Query engine with forward and reverse adjacency
pub struct LineageQuery<'g> {
    graph: &'g DependencyGraph,

    /// upstream -> downstream -> annotations of `downstream -> upstream`
    reverse: BTreeMap<&'g str, BTreeMap<&'g str, &'g [EdgeAnnotation]>>,
}

impl<'g> LineageQuery<'g> {
    pub fn new(graph: &'g DependencyGraph) -> Self {
        let mut reverse: BTreeMap<&str, BTreeMap<&str, &[EdgeAnnotation]>> = BTreeMap::new();
        for (downstream, ups) in graph.iter() {
            for (upstream, annotations) in ups {
                reverse
                    .entry(upstream.as_str())
                    .or_default()
                    .insert(downstream.as_str(), annotations.as_slice());
            }
        }
        Self { graph, reverse }
    }

    /// Direct neighbours of `table`, sorted by identifier
    fn neighbors(&self, table: &str, direction: Direction) -> Vec<(&'g str, &'g [EdgeAnnotation])> {
        match direction {
            Direction::Up => self
                .graph
                .upstreams(table)
                .map(|ups| {
                    ups.iter()
                        .map(|(upstream, annotations)| (upstream.as_str(), annotations.as_slice()))
                        .collect()
                })
                .unwrap_or_default(),
            Direction::Down => self
                .reverse
                .get(table)
                .map(|downs| downs.iter().map(|(d, a)| (*d, *a)).collect())
                .unwrap_or_default(),
        }
    }

    /// Breadth-first discovery from `seed`
    ///
    /// Each table is reported once, with the annotations of the edge that
    /// first reached it. The seed itself is reported only if a cycle leads
    /// back to it.
    pub fn traverse(
        &self,
        seed: &str,
        direction: Direction,
        recursive: bool,
    ) -> IndexMap<&'g str, &'g [EdgeAnnotation]> {
        let mut found: IndexMap<&'g str, &'g [EdgeAnnotation]> = IndexMap::new();
        let mut visited: HashSet<&str> = HashSet::new();
        let mut queue: VecDeque<&str> = VecDeque::new();

        visited.insert(seed);
        queue.push_back(seed);

        while let Some(current) = queue.pop_front() {
            for (next, annotations) in self.neighbors(current, direction) {
                if found.contains_key(next) {
                    continue;
                }
                found.insert(next, annotations);

                if !recursive {
                    continue;
                }
                if visited.insert(next) {
                    queue.push_back(next);
                } else {
                    debug!("cycle back to {} from {}", next, current);
                }
            }

            if !recursive {
                break;
            }
        }

        found
    }

    /// Upstream tables of `table` with their annotations
    pub fn upstream(&self, table: &str, recursive: bool) -> IndexMap<String, Vec<EdgeAnnotation>> {
        owned(self.traverse(table, Direction::Up, recursive))
    }

    /// Downstream tables of `table` with their annotations
    pub fn downstream(&self, table: &str, recursive: bool) -> IndexMap<String, Vec<EdgeAnnotation>> {
        owned(self.traverse(table, Direction::Down, recursive))
    }

    /// Run `request` for one seed
    pub fn run(&self, seed: &str, request: &QueryRequest) -> QueryResult {
        let found = self.traverse(seed, request.direction, request.recursive);

        if request.verbose {
            return QueryResult::Detailed(owned(found));
        }
        match request.output {
            OutputType::Table => QueryResult::Tables(found.keys().map(|t| t.to_string()).collect()),
            OutputType::File => QueryResult::Files(
                found
                    .values()
                    .flat_map(|annotations| annotations.iter().map(|a| a.file.clone()))
                    .collect::<BTreeSet<_>>()
                    .into_iter()
                    .collect(),
            ),
        }
    }

    /// Run `request` for every seed, independently, in the order given
    pub fn run_many(&self, request: &QueryRequest) -> IndexMap<String, QueryResult> {
        request
            .tables
            .iter()
            .map(|seed| (seed.clone(), self.run(seed, request)))
            .collect()
    }
}

fn owned(found: IndexMap<&str, &[EdgeAnnotation]>) -> IndexMap<String, Vec<EdgeAnnotation>> {
    found
        .into_iter()
        .map(|(table, annotations)| (table.to_string(), annotations.to_vec()))
        .collect()
}
