//! Dependency graph assembly and lineage queries
//!
//! This crate handles:
//! - The persisted graph shape (downstream -> upstream -> annotation records)
//! - Appending edges from reconciled units without overwriting
//! - Breadth-first upstream/downstream queries that tolerate cycles

pub mod builder;
pub mod graph;
pub mod query;

pub use builder::{GraphBuilder, Provenance, UpstreamInput};
pub use graph::{DependencyGraph, EdgeAnnotation, GraphSerializationError, Upstreams};
pub use query::{Direction, LineageQuery, OutputType, QueryRequest, QueryResult};
