//! Mapping resolution
//!
//! Reconciles the references parsed from one unit with its mapping table.
//! Explicit configuration wins over what the parser saw.

use crate::parser::ParsedSql;
use serde::Serialize;
use stairlight_core::{is_fully_qualified, MappingTable, ResolutionContext};
use std::collections::HashSet;

/// How a mapped reference was confirmed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MappedBy {
    /// The mapping overrides the parsed identifier
    Override,

    /// The identifier is declared as an upstream table
    Declared,
}

/// Classification of a graph-eligible reference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceTag {
    Mapped(MappedBy),

    /// Fully qualified as parsed (after the default prefix), no mapping needed
    Implicit,
}

/// A reference that becomes an edge
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedReference {
    /// Upstream identifier used in the graph
    pub table: String,

    /// Identifier as parsed
    pub parsed: String,

    pub line: usize,
    pub line_str: String,
    pub tag: ReferenceTag,
}

/// Why a reference cannot be used as lineage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UndefinedReason {
    /// No mapping entry covers the unit
    NoMappingEntry,

    /// Identifier (or its override target) is not fully qualified
    IncompleteIdentifier,

    /// Declared upstream table that the SQL never reads
    DeclaredNotParsed,
}

/// A reference kept out of the graph and reported to `check`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UndefinedReference {
    pub table: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<usize>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub line_str: Option<String>,

    pub reason: UndefinedReason,
}

/// Reconciled references of one unit
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Resolution {
    /// Qualified output table of the mapped unit
    pub output: Option<String>,

    /// Mapped output table name that stays incomplete after qualification
    pub incomplete_output: Option<String>,

    /// Mapped and implicit references, in source order
    pub references: Vec<ResolvedReference>,

    /// Undefined references, in source order, then unparsed declarations
    pub undefined: Vec<UndefinedReference>,

    /// Parsed write target that disagrees with the mapped output table
    pub target_mismatch: Option<String>,
}

/// Resolves references against one mapping table
pub struct MappingResolver<'a> {
    context: &'a ResolutionContext,
}

impl<'a> MappingResolver<'a> {
    pub fn new(context: &'a ResolutionContext) -> Self {
        Self { context }
    }

    /// Tag every parsed reference as mapped, implicit or undefined
    pub fn resolve(&self, parsed: &ParsedSql, mapping: Option<&MappingTable>) -> Resolution {
        let mut resolution = Resolution::default();

        for reference in &parsed.references {
            let qualified = self.context.qualify(&reference.table);

            let tagged = match mapping {
                None => Err(UndefinedReason::NoMappingEntry),
                Some(table) => {
                    let (upstream, tag) = match table
                        .overrides
                        .get(&reference.table)
                        .or_else(|| table.overrides.get(&qualified))
                    {
                        Some(target) => (
                            self.context.qualify(target.trim()),
                            ReferenceTag::Mapped(MappedBy::Override),
                        ),
                        None if self.is_declared(table, &reference.table, &qualified) => {
                            (qualified, ReferenceTag::Mapped(MappedBy::Declared))
                        }
                        None => (qualified, ReferenceTag::Implicit),
                    };
                    if is_fully_qualified(&upstream) {
                        Ok((upstream, tag))
                    } else {
                        Err(UndefinedReason::IncompleteIdentifier)
                    }
                }
            };

            match tagged {
                Ok((table, tag)) => resolution.references.push(ResolvedReference {
                    table,
                    parsed: reference.table.clone(),
                    line: reference.line,
                    line_str: reference.line_str.clone(),
                    tag,
                }),
                Err(reason) => resolution.undefined.push(UndefinedReference {
                    table: reference.table.clone(),
                    line: Some(reference.line),
                    line_str: Some(reference.line_str.clone()),
                    reason,
                }),
            }
        }

        if let Some(table) = mapping {
            let output = self.context.qualify(table.table_name.trim());
            if is_fully_qualified(&output) {
                resolution.output = Some(output.clone());
            } else {
                resolution.incomplete_output = Some(table.table_name.clone());
            }

            let seen: HashSet<String> = parsed
                .references
                .iter()
                .flat_map(|r| [r.table.clone(), self.context.qualify(&r.table)])
                .collect();
            for declared in &table.upstream {
                if !seen.contains(declared) && !seen.contains(&self.context.qualify(declared)) {
                    resolution.undefined.push(UndefinedReference {
                        table: declared.clone(),
                        line: None,
                        line_str: None,
                        reason: UndefinedReason::DeclaredNotParsed,
                    });
                }
            }

            resolution.target_mismatch = parsed
                .targets
                .iter()
                .map(|t| self.context.qualify(&t.table))
                .find(|t| *t != output);
        }

        resolution
    }

    fn is_declared(&self, table: &MappingTable, parsed: &str, qualified: &str) -> bool {
        table
            .upstream
            .iter()
            .any(|declared| declared == parsed || self.context.qualify(declared) == qualified)
    }
}
