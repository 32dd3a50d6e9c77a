//! Template expansion for SQL source files
//!
//! This crate handles:
//! - Detecting Jinja (`{{ }}`, `{% %}`, `{# #}`) and `${name}` placeholders
//! - Building the render context from global and per-table parameters
//! - Rendering one SQL text per declared parameter set
//! - Reporting unmapped templates and missing parameters per unit

pub mod context;
pub mod expander;
pub mod params;

pub use context::RenderContext;
pub use expander::{ExpandedText, TemplateExpander, TemplateExpansionError};
pub use params::{has_template_syntax, jinja_params, nested_skeleton, string_template_params};
