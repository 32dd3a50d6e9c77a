//! Render context for one parameter set
//!
//! Global parameters sit beneath the table's own parameters; ignored
//! parameters render as the literal `ignored` and win over both.

use crate::params::{insert_path, is_param_path};
use minijinja::Value as MinijinjaValue;
use serde_json::{Map, Value};
use stairlight_core::MappingTable;
use std::collections::BTreeMap;

/// Literal substituted for ignored parameters
pub const IGNORED: &str = "ignored";

/// Variables available while rendering one template
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RenderContext {
    vars: Map<String, Value>,
}

impl RenderContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Context for `table`, layered over `global`
    pub fn for_table(global: &BTreeMap<String, Value>, table: &MappingTable) -> Self {
        let mut context = Self::new();
        context.merge(global);
        context.merge(&table.parameters);
        for param in table.ignore_parameters.iter().filter(|p| is_param_path(p)) {
            context.ignore(param);
        }
        context
    }

    /// Layer `params` over the current variables, objects merged key by key
    pub fn merge(&mut self, params: &BTreeMap<String, Value>) -> &mut Self {
        for (key, value) in params {
            match self.vars.get_mut(key) {
                Some(existing) => overlay(existing, value.clone()),
                None => {
                    self.vars.insert(key.clone(), value.clone());
                }
            }
        }
        self
    }

    /// Render the dotted parameter as `ignored`
    pub fn ignore(&mut self, param: &str) -> &mut Self {
        insert_path(&mut self.vars, param, Value::String(IGNORED.to_string()));
        self
    }

    /// Whether a placeholder path is absent
    ///
    /// Walking stops at the first non-object value, so `date.add` on a
    /// defined `date` is treated as a method call rather than missing.
    pub fn is_missing(&self, param: &str) -> bool {
        let mut segments = param.split('.');
        let Some(first) = segments.next() else {
            return true;
        };
        let Some(mut value) = self.vars.get(first) else {
            return true;
        };
        for segment in segments {
            match value.as_object() {
                Some(map) => match map.get(segment) {
                    Some(next) => value = next,
                    None => return true,
                },
                None => return false,
            }
        }
        false
    }

    /// Text substituted for a `${name}` placeholder
    pub fn string_value(&self, name: &str) -> Option<String> {
        match self.vars.get(name)? {
            Value::String(s) => Some(s.clone()),
            Value::Null => None,
            other => Some(other.to_string()),
        }
    }

    /// Variables as a sorted map, as recorded on the expanded unit
    pub fn to_params(&self) -> BTreeMap<String, Value> {
        self.vars.clone().into_iter().collect()
    }

    /// Convert to MiniJinja value for rendering
    pub fn to_minijinja_value(&self) -> MinijinjaValue {
        MinijinjaValue::from_serialize(&self.vars)
    }
}

fn overlay(base: &mut Value, other: Value) {
    match (base, other) {
        (Value::Object(base_map), Value::Object(other_map)) => {
            for (key, value) in other_map {
                match base_map.get_mut(&key) {
                    Some(existing) => overlay(existing, value),
                    None => {
                        base_map.insert(key, value);
                    }
                }
            }
        }
        (slot, value) => *slot = value,
    }
}
