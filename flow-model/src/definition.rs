//! Entity definitions: property directions, store bindings, actions and lifecycle flags.

use serde::de::Deserializer;
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::{lenient, ModelError};

/// Describes an entity kind: which properties travel to the server, which
/// are bound to stores, which actions exist and which lifecycle hooks run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Definition {
    #[serde(default, deserialize_with = "lenient::map")]
    pub properties: BTreeMap<String, PropertySpec>,
    #[serde(default, deserialize_with = "lenient::map", skip_serializing_if = "BTreeMap::is_empty")]
    pub methods: BTreeMap<String, ActionSpec>,
    /// Initial property values applied when an instance is created.
    #[serde(default, deserialize_with = "lenient::object", skip_serializing_if = "Map::is_empty")]
    pub state: Map<String, Value>,
    /// The server initializes new instances (one implicit round trip on creation).
    #[serde(default, alias = "hasInit")]
    pub init: bool,
    /// Instances refresh themselves once on creation.
    #[serde(default, alias = "hasAwake")]
    pub awake: bool,
}

impl Definition {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a property.
    pub fn with_property(mut self, name: impl Into<String>, spec: PropertySpec) -> Self {
        self.properties.insert(name.into(), spec);
        self
    }

    /// Adds an action.
    pub fn with_method(mut self, name: impl Into<String>, spec: ActionSpec) -> Self {
        self.methods.insert(name.into(), spec);
        self
    }

    /// Sets an initial property value.
    pub fn with_initial(mut self, name: impl Into<String>, value: Value) -> Self {
        self.state.insert(name.into(), value);
        self
    }

    pub fn with_init(mut self) -> Self {
        self.init = true;
        self
    }

    pub fn with_awake(mut self) -> Self {
        self.awake = true;
        self
    }

    /// Properties whose value is transmitted to the server.
    pub fn sent_properties(&self) -> impl Iterator<Item = &str> {
        self.properties
            .iter()
            .filter(|(_, spec)| spec.is_sent())
            .map(|(name, _)| name.as_str())
    }

    /// Store-bound properties with their binding.
    pub fn store_bindings(&self) -> impl Iterator<Item = (&str, StoreBinding)> {
        self.properties
            .iter()
            .filter_map(|(name, spec)| spec.store_binding().map(|b| (name.as_str(), b)))
    }

    /// Checks internal consistency. `name` is only used for the error.
    pub fn validate(&self, name: &str) -> crate::Result<()> {
        for (property, spec) in &self.properties {
            if spec.property.is_some() && spec.store.is_none() {
                return Err(ModelError::InvalidDefinition {
                    name: name.to_string(),
                    reason: format!("property `{property}` projects a store property without a store"),
                });
            }
            if spec.store.as_deref() == Some("") {
                return Err(ModelError::InvalidDefinition {
                    name: name.to_string(),
                    reason: format!("property `{property}` is bound to an empty store name"),
                });
            }
        }
        Ok(())
    }
}

/// Serialization rule for a property.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    /// Never sent.
    #[default]
    #[serde(alias = "Client")]
    ClientOnly,
    /// Sent to the server.
    Server,
    /// Sent and received. The PHP side spells it `Booth`.
    #[serde(alias = "Booth", alias = "Both")]
    Bidirectional,
}

impl Direction {
    /// Whether values with this direction are transmitted.
    pub const fn is_sent(self) -> bool {
        matches!(self, Self::Server | Self::Bidirectional)
    }
}

/// A single property declaration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertySpec {
    #[serde(default)]
    pub direction: Direction,
    /// Name of the store this property is bound to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub store: Option<String>,
    /// Store property projected into this one. Binds the whole store when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub property: Option<String>,
}

impl PropertySpec {
    fn directed(direction: Direction) -> Self {
        Self {
            direction,
            store: None,
            property: None,
        }
    }

    /// Shorthand for a property that never leaves the client.
    pub fn client_only() -> Self {
        Self::directed(Direction::ClientOnly)
    }

    /// Shorthand for a property sent to the server.
    pub fn server() -> Self {
        Self::directed(Direction::Server)
    }

    /// Shorthand for a property sent and received.
    pub fn bidirectional() -> Self {
        Self::directed(Direction::Bidirectional)
    }

    /// Shorthand for a property bound to a whole store.
    pub fn bound_to(store: impl Into<String>) -> Self {
        Self {
            direction: Direction::ClientOnly,
            store: Some(store.into()),
            property: None,
        }
    }

    /// Shorthand for a property projecting one property of a store.
    pub fn projecting(store: impl Into<String>, property: impl Into<String>) -> Self {
        Self {
            direction: Direction::ClientOnly,
            store: Some(store.into()),
            property: Some(property.into()),
        }
    }

    /// The store binding, if any.
    pub fn store_binding(&self) -> Option<StoreBinding> {
        self.store.as_ref().map(|store| StoreBinding {
            store: store.clone(),
            property: self.property.clone(),
        })
    }

    /// Store-bound properties are resolved client-side and never sent.
    pub fn is_sent(&self) -> bool {
        self.store.is_none() && self.direction.is_sent()
    }
}

/// Link from a property to a live store (or one of its properties).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StoreBinding {
    pub store: String,
    pub property: Option<String>,
}

/// A client-side action body compiled into the host binary.
///
/// Receives the entity's plain state (mutations are written back) and the
/// call arguments.
pub type NativeFn = Arc<dyn Fn(&mut Map<String, Value>, &[Value]) -> Result<Value, String> + Send + Sync>;

/// How an action is executed.
///
/// Server-delivered action bodies are source text. They are never evaluated:
/// they stay [`ActionSpec::Source`] unless the host registers a native body
/// under the same name.
#[derive(Clone)]
pub enum ActionSpec {
    /// Runs on the client.
    Native(NativeFn),
    /// Source text shipped by the server; not executable.
    Source { params: Vec<String>, body: String },
    /// Runs on the server through an action call.
    Remote,
}

impl ActionSpec {
    /// Wraps a closure as a native action.
    pub fn native<F>(f: F) -> Self
    where
        F: Fn(&mut Map<String, Value>, &[Value]) -> Result<Value, String> + Send + Sync + 'static,
    {
        Self::Native(Arc::new(f))
    }

    pub fn is_native(&self) -> bool {
        matches!(self, Self::Native(_))
    }
}

impl fmt::Debug for ActionSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Native(_) => f.write_str("Native(..)"),
            Self::Source { params, body } => f
                .debug_struct("Source")
                .field("params", params)
                .field("len", &body.len())
                .finish(),
            Self::Remote => f.write_str("Remote"),
        }
    }
}

/// Wire form: `{"params": [...], "func": "..."}`. A method without `func`
/// runs on the server.
#[derive(Deserialize)]
struct WireMethod {
    #[serde(default)]
    params: Vec<String>,
    #[serde(default)]
    func: Option<String>,
}

impl<'de> Deserialize<'de> for ActionSpec {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let wire = WireMethod::deserialize(deserializer)?;
        Ok(match wire.func {
            Some(body) => Self::Source {
                params: wire.params,
                body,
            },
            None => Self::Remote,
        })
    }
}

impl Serialize for ActionSpec {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        match self {
            Self::Source { params, body } => {
                map.serialize_entry("params", params)?;
                map.serialize_entry("func", body)?;
            }
            Self::Native(_) | Self::Remote => {
                map.serialize_entry("params", &Vec::<String>::new())?;
            }
        }
        map.end()
    }
}
