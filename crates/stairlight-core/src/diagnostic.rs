//! Diagnostic codes and error reporting
//!
//! IMPORTANT: Diagnostic codes are versioned and stable.
//! NEVER rename or remove codes - they are part of the public API.
//! Add new codes with new names only.

use serde::{Deserialize, Serialize};

/// Diagnostic code registry (v1)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DiagnosticCode {
    // Source access (1xxx)
    /// A backend could not be listed or an object could not be fetched
    SourceAccessFailed,

    // Templates (2xxx)
    /// Template syntax found but no parameter set is declared for the file
    TemplateUnmapped,

    /// A declared parameter set leaves placeholders undefined
    TemplateMissingParameters,

    /// The template engine rejected the file
    TemplateRenderError,

    // SQL (3xxx)
    /// No recognizable statement, or the text could not be tokenized
    SqlParseWarning,

    // Mapping (4xxx)
    /// A reference could not be confirmed by the mapping layer
    MappingUndefinedReference,

    /// A mapping entry matched no located source unit
    MappingDeadEntry,

    /// The table created by the SQL differs from the mapped output table
    MappingTargetMismatch,

    /// A mapped output table is not fully qualified and is left out of the graph
    MappingIncompleteTable,

    // Graph (5xxx)
    /// A persisted graph could not be loaded
    GraphSerializationError,

    // Configuration (6xxx)
    /// Configuration or mapping file unreadable or structurally invalid
    ConfigInvalid,

    // General (9xxx)
    /// General informational message
    Info,

    /// General warning message
    Warning,
}

impl DiagnosticCode {
    /// Get the diagnostic code as a stable string identifier
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SourceAccessFailed => "SOURCE_ACCESS_FAILED",
            Self::TemplateUnmapped => "TEMPLATE_UNMAPPED",
            Self::TemplateMissingParameters => "TEMPLATE_MISSING_PARAMETERS",
            Self::TemplateRenderError => "TEMPLATE_RENDER_ERROR",
            Self::SqlParseWarning => "SQL_PARSE_WARNING",
            Self::MappingUndefinedReference => "MAPPING_UNDEFINED_REFERENCE",
            Self::MappingDeadEntry => "MAPPING_DEAD_ENTRY",
            Self::MappingTargetMismatch => "MAPPING_TARGET_MISMATCH",
            Self::MappingIncompleteTable => "MAPPING_INCOMPLETE_TABLE",
            Self::GraphSerializationError => "GRAPH_SERIALIZATION_ERROR",
            Self::ConfigInvalid => "CONFIG_INVALID",
            Self::Info => "INFO",
            Self::Warning => "WARNING",
        }
    }
}

impl std::fmt::Display for DiagnosticCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Diagnostic severity level
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Informational message
    Info,

    /// Warning - the unit was skipped or partially used
    Warn,

    /// Error - the run cannot produce complete lineage
    Error,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Info => write!(f, "info"),
            Self::Warn => write!(f, "warn"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Where a diagnostic points: a source key, and optionally its URI and line
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    /// Source key (relative path or object key)
    pub file: String,

    /// Resolved access URI, when it differs from the key
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,

    /// Optional line number (1-indexed)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<usize>,
}

impl Location {
    pub fn new(file: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            uri: None,
            line: None,
        }
    }

    pub fn with_line(file: impl Into<String>, line: usize) -> Self {
        Self {
            file: file.into(),
            uri: None,
            line: Some(line),
        }
    }

    pub fn and_uri(mut self, uri: impl Into<String>) -> Self {
        self.uri = Some(uri.into());
        self
    }
}

/// A diagnostic message with structured metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnostic {
    /// Stable diagnostic code
    pub code: DiagnosticCode,

    /// Severity level
    pub severity: Severity,

    /// Human-readable message
    pub message: String,

    /// Source location (best-effort)
    pub location: Option<Location>,

    /// Table the diagnostic concerns, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub table: Option<String>,
}

impl Diagnostic {
    /// Create a new diagnostic with minimal fields
    pub fn new(code: DiagnosticCode, severity: Severity, message: impl Into<String>) -> Self {
        Self {
            code,
            severity,
            message: message.into(),
            location: None,
            table: None,
        }
    }

    /// Set the location
    pub fn with_location(mut self, location: Location) -> Self {
        self.location = Some(location);
        self
    }

    /// Set the table this diagnostic concerns
    pub fn with_table(mut self, table: impl Into<String>) -> Self {
        self.table = Some(table.into());
        self
    }
}
