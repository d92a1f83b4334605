use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;

use crate::lenient;

/// A server-declared UI component.
///
/// Rendering is the host's concern: everything beyond the fields the bridge
/// reads (name, backing state kind, initial state, props) is kept verbatim
/// in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentDefinition {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// State kind backing each mounted instance.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_id: Option<String>,
    #[serde(default, deserialize_with = "lenient::object", skip_serializing_if = "Map::is_empty")]
    pub state: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub props: Value,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ComponentDefinition {
    /// Name the component is registered under: its declared name, or the
    /// key it was delivered with.
    pub fn registered_name<'a>(&'a self, key: &'a str) -> &'a str {
        self.name.as_deref().unwrap_or(key)
    }
}

/// Merges a component's declared props with props declared by its client
/// script.
///
/// Props come either as a list of names or as a map of name → options:
/// - list + list: ordered union
/// - map + map: right-biased merge
/// - list + map (either order): the list becomes a map of `null` options
/// - one side absent (`null`): the other side
/// - anything else: the script side
pub fn merge_component_props(base: &Value, script: &Value) -> Value {
    match (base, script) {
        (Value::Null, Value::Null) => Value::Object(Map::new()),
        (base, Value::Null) => base.clone(),
        (Value::Null, script) => script.clone(),
        (Value::Array(base), Value::Array(script)) => {
            let mut seen = HashSet::new();
            let union = base
                .iter()
                .chain(script)
                .filter(|value| seen.insert(value.to_string()))
                .cloned()
                .collect();
            Value::Array(union)
        }
        (Value::Object(base), Value::Object(script)) => {
            let mut merged = base.clone();
            merged.extend(script.clone());
            Value::Object(merged)
        }
        (Value::Array(base), Value::Object(script)) => {
            let mut merged = names_to_object(base);
            merged.extend(script.clone());
            Value::Object(merged)
        }
        (Value::Object(base), Value::Array(script)) => {
            let mut merged = base.clone();
            merged.extend(names_to_object(script));
            Value::Object(merged)
        }
        (_, script) => script.clone(),
    }
}

fn names_to_object(names: &[Value]) -> Map<String, Value> {
    names
        .iter()
        .filter_map(|name| match name {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
        .map(|name| (name, Value::Null))
        .collect()
}
