//! Server-side components: the kinds this endpoint can run actions for.

use flow_model::{ActionSpec, ComponentDefinition, Definition, Definitions, EntityKind, PropertySpec};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::error::{EndpointError, EndpointResult};

/// A state or store kind implemented on the server.
pub trait ServerComponent: Send + Sync {
    /// Kind name, as sent in `name` of each entity payload.
    fn name(&self) -> &str;

    /// Definition delivered to clients that use this kind.
    fn definition(&self) -> Definition;

    /// UI components backed by this kind, by component name.
    fn components(&self) -> BTreeMap<String, ComponentDefinition> {
        BTreeMap::new()
    }

    /// Runs `action` against `state`, returning the action's return value.
    fn invoke(&self, action: &str, state: &mut Map<String, Value>, args: &[Value]) -> EndpointResult<Value>;
}

const COUNTER_TEMPLATE: &str = r#"<div class="card counter-card">
    <p>Count: <strong>{{ count }}</strong></p>
    <button @click="decrement">-1</button>
    <button @click="increment">+1</button>
    <button @click="reset">Reset</button>
</div>"#;

/// Built-in counter state: `count` with increment, decrement and reset.
#[derive(Debug, Default, Clone, Copy)]
pub struct Counter;

impl Counter {
    pub const NAME: &'static str = "Counter";
    pub const WIDGET: &'static str = "CounterWidget";
}

impl ServerComponent for Counter {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn definition(&self) -> Definition {
        Definition::new()
            .with_property("count", PropertySpec::bidirectional())
            .with_initial("count", json!(0))
            .with_method("increment", ActionSpec::Remote)
            .with_method("decrement", ActionSpec::Remote)
            .with_method("reset", ActionSpec::Remote)
    }

    fn components(&self) -> BTreeMap<String, ComponentDefinition> {
        let mut extra = Map::new();
        extra.insert("template".into(), json!(COUNTER_TEMPLATE));
        let widget = ComponentDefinition {
            state_id: Some(Self::NAME.to_string()),
            state: Map::from_iter([("count".to_string(), json!(0))]),
            extra,
            ..ComponentDefinition::default()
        };
        BTreeMap::from([(Self::WIDGET.to_string(), widget)])
    }

    fn invoke(&self, action: &str, state: &mut Map<String, Value>, _args: &[Value]) -> EndpointResult<Value> {
        let count = state.get("count").and_then(Value::as_i64).unwrap_or(0);
        let count = match action {
            "increment" => count.checked_add(1).ok_or_else(|| EndpointError::action(action, "count overflow"))?,
            "decrement" => count.checked_sub(1).ok_or_else(|| EndpointError::action(action, "count overflow"))?,
            "reset" => 0,
            _ => {
                return Err(EndpointError::UnknownAction {
                    name: Self::NAME.to_string(),
                    action: action.to_string(),
                });
            }
        };
        state.insert("count".into(), json!(count));
        Ok(json!(count))
    }
}

/// Server components by kind name.
#[derive(Clone, Default)]
pub struct ComponentRegistry {
    states: BTreeMap<String, Arc<dyn ServerComponent>>,
    stores: BTreeMap<String, Arc<dyn ServerComponent>>,
}

impl ComponentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with the built-in [`Counter`].
    pub fn with_builtins() -> Self {
        Self::new().with_state(Counter)
    }

    pub fn with_state(mut self, component: impl ServerComponent + 'static) -> Self {
        self.states.insert(component.name().to_string(), Arc::new(component));
        self
    }

    pub fn with_store(mut self, component: impl ServerComponent + 'static) -> Self {
        self.stores.insert(component.name().to_string(), Arc::new(component));
        self
    }

    pub fn get(&self, kind: EntityKind, name: &str) -> Option<&Arc<dyn ServerComponent>> {
        match kind {
            EntityKind::State => self.states.get(name),
            EntityKind::Store => self.stores.get(name),
        }
    }

    /// Definitions of the registered kinds among `states` and `stores`.
    pub fn definitions_for<'a>(
        &self,
        states: impl IntoIterator<Item = &'a str>,
        stores: impl IntoIterator<Item = &'a str>,
    ) -> Definitions {
        let mut definitions = Definitions::default();
        for name in states {
            if let Some(component) = self.states.get(name) {
                definitions.states.insert(name.to_string(), component.definition());
            }
        }
        for name in stores {
            if let Some(component) = self.stores.get(name) {
                definitions.stores.insert(name.to_string(), component.definition());
            }
        }
        definitions
    }

    /// Every UI component the registered kinds provide.
    pub fn components(&self) -> BTreeMap<String, ComponentDefinition> {
        self.states
            .values()
            .chain(self.stores.values())
            .flat_map(|component| component.components())
            .collect()
    }
}

impl fmt::Debug for ComponentRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentRegistry")
            .field("states", &self.states.keys().collect::<Vec<_>>())
            .field("stores", &self.stores.keys().collect::<Vec<_>>())
            .finish()
    }
}
