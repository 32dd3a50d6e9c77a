//! Stairlight Core
//!
//! Shared domain model for the lineage pipeline: source units, table
//! identifiers, configuration, and the diagnostic/report types.
//! Never rename diagnostic codes - they are part of the public API.

pub mod config;
pub mod diagnostic;
pub mod mapping;
pub mod report;
pub mod source;
pub mod table;

pub use config::{
    find_config_file, BackendDescriptor, Config, ConfigError, PatternSpec, RetryPolicy, Settings,
};
pub use diagnostic::{Diagnostic, DiagnosticCode, Location, Severity};
pub use mapping::{ExtraLabel, GlobalSection, MappingConfig, MappingEntry, MappingTable};
pub use report::{Report, ReportSummary, ReportVersion};
pub use source::{key_stem, BackendKind, ResolutionContext, SourceUnit};
pub use table::is_fully_qualified;
