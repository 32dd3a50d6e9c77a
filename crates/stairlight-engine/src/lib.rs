//! Lineage build engine
//!
//! Ties the crates together into one run: locate sources on every configured
//! backend, expand templates, parse references, reconcile them with the
//! mapping and assemble the dependency graph. Also produces the check report
//! of undefined references and resolves label selectors to seed tables.

pub mod check;
pub mod labels;
pub mod pipeline;

pub use check::{CheckReport, UndefinedEntry};
pub use labels::{find_tables_by_labels, parse_label, LabelError};
pub use pipeline::{load_mapping, BuildError, BuildOutput, Pipeline};
