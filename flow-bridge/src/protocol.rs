//! Exchange protocol messages.
//!
//! One POST carries every entity snapshot, action call and component request
//! collected during a coalescing window; the reply carries the reconciled
//! state, action return values (by call index), definitions and security
//! updates for all of them.

use crate::callbacks::Callback;
use crate::security::SecurityState;
use flow_model::{lenient, ComponentDefinition, Definitions, InstanceId};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Default exchange endpoint path.
pub const DEFAULT_ENDPOINT: &str = "/_flow/endpoint";

/// Marker in `error.type` identifying an access denial.
pub const ACCESS_DENIED_MARKER: &str = "AccessDeniedException";

/// Content type of exchange requests.
pub const CONTENT_TYPE: &str = "application/json;charset=UTF-8";

/// Outgoing exchange body.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExchangeRequest {
    #[serde(default, deserialize_with = "lenient::map")]
    pub stores: BTreeMap<InstanceId, EntityPayload>,
    #[serde(default, deserialize_with = "lenient::map")]
    pub states: BTreeMap<InstanceId, EntityPayload>,
    #[serde(default)]
    pub actions: Vec<ActionCall>,
    #[serde(default)]
    pub components: ComponentRequest,
}

impl ExchangeRequest {
    /// Whether the request carries anything at all.
    pub fn is_empty(&self) -> bool {
        self.stores.is_empty()
            && self.states.is_empty()
            && self.actions.is_empty()
            && self.components.is_empty()
    }
}

/// Snapshot of one entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityPayload {
    pub name: String,
    #[serde(default, deserialize_with = "lenient::object")]
    pub state: Map<String, Value>,
    #[serde(default)]
    pub is_new: bool,
}

/// One action call; its position in [`ExchangeRequest::actions`] is its call id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionCall {
    pub is_store: bool,
    pub instance_id: InstanceId,
    pub action: String,
    #[serde(default)]
    pub args: Vec<Value>,
}

/// Component definition request: `{"*": {}}` for everything, otherwise one
/// key per requested component.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct ComponentRequest(Map<String, Value>);

impl<'de> Deserialize<'de> for ComponentRequest {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        lenient::object(deserializer).map(Self)
    }
}

impl ComponentRequest {
    /// Wildcard key.
    pub const ALL: &'static str = "*";

    /// Requests every component the server knows.
    pub fn all() -> Self {
        let mut map = Map::new();
        map.insert(Self::ALL.to_string(), Value::Object(Map::new()));
        Self(map)
    }

    /// Requests exactly the named components.
    pub fn names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(
            names
                .into_iter()
                .map(|name| (name.into(), Value::Object(Map::new())))
                .collect(),
        )
    }

    pub fn is_all(&self) -> bool {
        self.0.contains_key(Self::ALL)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Requested names (including `*`).
    pub fn requested(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    /// Adds another request into this one.
    pub fn extend(&mut self, other: ComponentRequest) {
        self.0.extend(other.0);
    }

    /// Picks the part of a delivered component map this request asked for.
    pub fn select(
        &self,
        delivered: &BTreeMap<String, ComponentDefinition>,
    ) -> BTreeMap<String, ComponentDefinition> {
        if self.is_all() {
            return delivered.clone();
        }
        self.requested()
            .filter_map(|name| delivered.get(name).map(|def| (name.to_string(), def.clone())))
            .collect()
    }
}

/// Incoming exchange body.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExchangeResponse {
    #[serde(default, deserialize_with = "lenient::map")]
    pub stores: BTreeMap<InstanceId, EntityReply>,
    #[serde(default, deserialize_with = "lenient::map")]
    pub states: BTreeMap<InstanceId, EntityReply>,
    #[serde(default, deserialize_with = "lenient::indexed")]
    pub actions: BTreeMap<usize, ActionReply>,
    #[serde(default, deserialize_with = "lenient::map")]
    pub components: BTreeMap<String, ComponentDefinition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub definitions: Option<Definitions>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security: Option<SecurityState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorPayload>,
}

impl ExchangeResponse {
    /// Whether this response, received with `status`, denies access.
    pub fn is_denied(&self, status: u16) -> bool {
        status == 401
            || status == 403
            || self.error.as_ref().is_some_and(ErrorPayload::is_access_denied)
    }

    /// Return value of call `call_id`; `null` when the server sent none.
    pub fn action_return(&self, call_id: usize) -> Value {
        self.actions
            .get(&call_id)
            .map(|reply| reply.value.clone())
            .unwrap_or(Value::Null)
    }
}

/// Reconciled state for one entity.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntityReply {
    #[serde(default, deserialize_with = "lenient::object")]
    pub state: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub callbacks: Vec<Callback>,
}

/// Return value of one action call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActionReply {
    #[serde(rename = "return", default)]
    pub value: Value,
}

/// Server error payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ErrorPayload {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub error_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ErrorPayload {
    pub fn new(error_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error_type: Some(error_type.into()),
            message: Some(message.into()),
        }
    }

    pub fn is_access_denied(&self) -> bool {
        self.error_type
            .as_deref()
            .is_some_and(|t| t.contains(ACCESS_DENIED_MARKER))
    }
}
