//! SQL reference extraction and mapping resolution
//!
//! This crate handles:
//! - Tokenizing rendered SQL with sqlparser (comments never yield references)
//! - Extracting table references with their 1-based line and literal line text
//! - Skipping CTE names, aliases, `UNNEST` and `FROM` inside functions
//! - Recording `CREATE TABLE/VIEW`, `INSERT` and `MERGE` targets
//! - Reconciling references with the mapping layer (mapped, implicit, undefined)

pub mod parser;
pub mod resolver;

pub use parser::{ParseWarning, ParsedSql, ReferenceParser, TableReference, TableTarget};
pub use resolver::{
    MappedBy, MappingResolver, ReferenceTag, Resolution, ResolvedReference, UndefinedReason,
    UndefinedReference,
};
