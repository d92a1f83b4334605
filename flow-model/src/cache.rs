//! Per-session definition cache.
//!
//! Definitions are merged additively: once a name is known its definition is
//! never replaced, so concurrent merges commute and definition requests can
//! be issued speculatively.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::{lenient, ComponentDefinition, Definition, EntityKind};

/// A bundle of definitions as delivered on the wire.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Definitions {
    #[serde(default, deserialize_with = "lenient::map")]
    pub states: BTreeMap<String, Definition>,
    #[serde(default, deserialize_with = "lenient::map")]
    pub stores: BTreeMap<String, Definition>,
    #[serde(default, deserialize_with = "lenient::map")]
    pub components: BTreeMap<String, ComponentDefinition>,
}

impl Definitions {
    pub fn is_empty(&self) -> bool {
        self.states.is_empty() && self.stores.is_empty() && self.components.is_empty()
    }

    pub fn with_state(mut self, name: impl Into<String>, definition: Definition) -> Self {
        self.states.insert(name.into(), definition);
        self
    }

    pub fn with_store(mut self, name: impl Into<String>, definition: Definition) -> Self {
        self.stores.insert(name.into(), definition);
        self
    }

    pub fn with_component(mut self, name: impl Into<String>, definition: ComponentDefinition) -> Self {
        self.components.insert(name.into(), definition);
        self
    }
}

/// Names that became known during a merge.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeReport {
    pub states: Vec<String>,
    pub stores: Vec<String>,
    pub components: Vec<String>,
}

impl MergeReport {
    pub fn is_empty(&self) -> bool {
        self.states.is_empty() && self.stores.is_empty() && self.components.is_empty()
    }
}

/// Known definitions by entity-kind name.
#[derive(Debug, Clone, Default)]
pub struct DefinitionCache {
    states: BTreeMap<String, Definition>,
    stores: BTreeMap<String, Definition>,
    components: BTreeMap<String, ComponentDefinition>,
}

impl DefinitionCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self, name: &str) -> Option<&Definition> {
        self.states.get(name)
    }

    pub fn store(&self, name: &str) -> Option<&Definition> {
        self.stores.get(name)
    }

    /// Looks up a definition by kind.
    pub fn get(&self, kind: EntityKind, name: &str) -> Option<&Definition> {
        match kind {
            EntityKind::State => self.state(name),
            EntityKind::Store => self.store(name),
        }
    }

    pub fn component(&self, name: &str) -> Option<&ComponentDefinition> {
        self.components.get(name)
    }

    pub fn has_component(&self, name: &str) -> bool {
        self.components.contains_key(name)
    }

    pub fn component_names(&self) -> impl Iterator<Item = &str> {
        self.components.keys().map(String::as_str)
    }

    /// Inserts a state definition unless the name is already known.
    /// Returns whether it was inserted.
    pub fn insert_state(&mut self, name: impl Into<String>, definition: Definition) -> bool {
        insert_new(&mut self.states, name.into(), definition)
    }

    /// Inserts a store definition unless the name is already known.
    pub fn insert_store(&mut self, name: impl Into<String>, definition: Definition) -> bool {
        insert_new(&mut self.stores, name.into(), definition)
    }

    /// Inserts a component definition unless the name is already known.
    pub fn insert_component(&mut self, name: impl Into<String>, definition: ComponentDefinition) -> bool {
        insert_new(&mut self.components, name.into(), definition)
    }

    /// Merges a bundle, keeping every definition already known.
    pub fn merge(&mut self, incoming: Definitions) -> MergeReport {
        let mut report = MergeReport::default();
        for (name, definition) in incoming.states {
            if self.insert_state(name.clone(), definition) {
                report.states.push(name);
            }
        }
        for (name, definition) in incoming.stores {
            if self.insert_store(name.clone(), definition) {
                report.stores.push(name);
            }
        }
        for (name, definition) in incoming.components {
            if self.insert_component(name.clone(), definition) {
                report.components.push(name);
            }
        }
        report
    }

    /// Total number of known definitions.
    pub fn len(&self) -> usize {
        self.states.len() + self.stores.len() + self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copies the cache into a wire bundle.
    pub fn snapshot(&self) -> Definitions {
        Definitions {
            states: self.states.clone(),
            stores: self.stores.clone(),
            components: self.components.clone(),
        }
    }
}

fn insert_new<V>(map: &mut BTreeMap<String, V>, name: String, value: V) -> bool {
    if map.contains_key(&name) {
        return false;
    }
    map.insert(name, value);
    true
}
