//! Template expansion
//!
//! Turns one located SQL text into one rendered text per declared parameter
//! set. Substitution is all-or-nothing: a text with an undefined placeholder
//! is reported, never returned half rendered.

use crate::context::{RenderContext, IGNORED};
use crate::params::{all_params, free_jinja_params, has_template_syntax, string_template_params};
use minijinja::{Environment, Error as JinjaError, ErrorKind, UndefinedBehavior};
use serde_json::Value;
use stairlight_core::{Diagnostic, DiagnosticCode, Location, MappingTable, Severity};
use std::collections::BTreeMap;
use tracing::debug;

/// One rendered text
#[derive(Debug, Clone, PartialEq)]
pub struct ExpandedText {
    /// Position of the parameter set in the mapping entry (None if unmapped)
    pub set_index: Option<usize>,

    /// Variables used for rendering
    pub params: BTreeMap<String, Value>,

    /// Fully substituted SQL
    pub text: String,
}

/// Error during template expansion
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TemplateExpansionError {
    #[error("Template syntax without a mapping entry (parameters: {})", .params.join(", "))]
    UnmappedTemplate { params: Vec<String> },

    #[error("Undefined parameters for {table_name}: {}", .params.join(", "))]
    MissingParameters {
        table_name: String,
        params: Vec<String>,
    },

    #[error("Template render error for {table_name}: {message}")]
    RenderError {
        table_name: String,
        message: String,
        line: Option<usize>,
    },
}

impl TemplateExpansionError {
    /// Convert to a diagnostic located at the unit's file
    pub fn to_diagnostic(&self, key: &str, uri: &str) -> Diagnostic {
        let location = Location::new(key).and_uri(uri);
        match self {
            TemplateExpansionError::UnmappedTemplate { .. } => Diagnostic::new(
                DiagnosticCode::TemplateUnmapped,
                Severity::Warn,
                self.to_string(),
            )
            .with_location(location),
            TemplateExpansionError::MissingParameters { table_name, .. } => Diagnostic::new(
                DiagnosticCode::TemplateMissingParameters,
                Severity::Warn,
                self.to_string(),
            )
            .with_location(location)
            .with_table(table_name.clone()),
            TemplateExpansionError::RenderError { table_name, line, .. } => {
                let location = match line {
                    Some(line) => Location::with_line(key, *line).and_uri(uri),
                    None => location,
                };
                Diagnostic::new(DiagnosticCode::TemplateRenderError, Severity::Error, self.to_string())
                    .with_location(location)
                    .with_table(table_name.clone())
            }
        }
    }
}

/// Renders SQL templates with MiniJinja in strict-undefined mode
pub struct TemplateExpander {
    env: Environment<'static>,
}

impl TemplateExpander {
    pub fn new() -> Self {
        let mut env = Environment::new();
        env.set_undefined_behavior(UndefinedBehavior::Strict);
        // Line numbers of the rendered text must match the source
        env.set_keep_trailing_newline(true);
        Self { env }
    }

    /// Expand `text` once per parameter set
    ///
    /// With no parameter sets, text without template syntax passes through as
    /// a single unit and templated text is reported as unmapped. Each set
    /// succeeds or fails on its own.
    pub fn expand(
        &self,
        text: &str,
        tables: &[MappingTable],
        global: &BTreeMap<String, Value>,
    ) -> Vec<Result<ExpandedText, TemplateExpansionError>> {
        let templated = has_template_syntax(text);

        if tables.is_empty() {
            let result = if templated {
                Err(TemplateExpansionError::UnmappedTemplate {
                    params: all_params(text),
                })
            } else {
                Ok(ExpandedText {
                    set_index: None,
                    params: BTreeMap::new(),
                    text: text.to_string(),
                })
            };
            return vec![result];
        }

        tables
            .iter()
            .enumerate()
            .map(|(idx, table)| -> Result<ExpandedText, TemplateExpansionError> {
                let context = RenderContext::for_table(global, table);
                let rendered = if templated {
                    self.render(text, table, &context)?
                } else {
                    text.to_string()
                };
                Ok(ExpandedText {
                    set_index: Some(idx),
                    params: context.to_params(),
                    text: rendered,
                })
            })
            .collect()
    }

    /// Render one parameter set: Jinja first, then `${name}` placeholders
    ///
    /// Jinja variables are resolved by MiniJinja in strict mode, so names the
    /// template binds itself (loop targets, `set`) need no parameter.
    pub fn render(
        &self,
        text: &str,
        table: &MappingTable,
        context: &RenderContext,
    ) -> Result<String, TemplateExpansionError> {
        let mut source = text.to_string();
        for param in &table.ignore_parameters {
            source = source.replace(&format!("{{{{ {} }}}}", param), IGNORED);
        }

        let missing: Vec<String> = string_template_params(&source)
            .into_iter()
            .filter(|name| context.string_value(name).is_none())
            .collect();
        if !missing.is_empty() {
            return Err(TemplateExpansionError::MissingParameters {
                table_name: table.table_name.clone(),
                params: missing,
            });
        }

        let rendered = if source.contains("{{") || source.contains("{%") || source.contains("{#") {
            self.env
                .render_str(&source, context.to_minijinja_value())
                .map_err(|e| jinja_error(e, &source, table, context))?
        } else {
            source
        };

        Ok(substitute_string_params(&rendered, context))
    }
}

impl Default for TemplateExpander {
    fn default() -> Self {
        Self::new()
    }
}

fn jinja_error(error: JinjaError, source: &str, table: &MappingTable, context: &RenderContext) -> TemplateExpansionError {
    debug!("render failed for {}: {:#}", table.table_name, error);
    if error.kind() == ErrorKind::UndefinedError {
        let mut params: Vec<String> = free_jinja_params(source)
            .into_iter()
            .filter(|param| context.is_missing(param))
            .collect();
        if params.is_empty() {
            params.push(error.detail().unwrap_or("undefined value").to_string());
        }
        return TemplateExpansionError::MissingParameters {
            table_name: table.table_name.clone(),
            params,
        };
    }
    TemplateExpansionError::RenderError {
        table_name: table.table_name.clone(),
        message: error.detail().map_or_else(|| error.to_string(), str::to_string),
        line: error.line(),
    }
}

/// Replace `${name}`; every name has been checked to resolve
fn substitute_string_params(text: &str, context: &RenderContext) -> String {
    let mut out = text.to_string();
    for name in string_template_params(text) {
        if let Some(value) = context.string_value(&name) {
            out = out.replace(&format!("${{{}}}", name), &value);
        }
    }
    out
}
