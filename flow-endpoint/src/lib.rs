//! Reference Flow exchange endpoint.
//!
//! Serves the exchange protocol over one POST route: entity snapshots come
//! in, registered [`ServerComponent`]s run the queued actions in call order,
//! and the reconciled state, return values, definitions and requested
//! component definitions go back in a single reply. Used for local
//! development and end-to-end tests of the bridge.

mod component;
mod error;

pub use component::{ComponentRegistry, Counter, ServerComponent};
pub use error::{EndpointError, EndpointResult};

use axum::{extract::State, http::StatusCode, response::Json, routing::post, Router};
use flow_bridge::{
    ActionReply, EntityPayload, EntityReply, ErrorPayload, ExchangeRequest, ExchangeResponse,
    RouteTarget, SecurityState, ACCESS_DENIED_MARKER, DEFAULT_ENDPOINT,
};
use flow_model::{EntityKind, InstanceId};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, warn};

/// Denies exchanges touching protected kinds.
#[derive(Debug, Clone)]
pub struct Guard {
    status: StatusCode,
    kinds: BTreeSet<String>,
    security: SecurityState,
}

impl Guard {
    /// Answers 401: the session is not logged in.
    pub fn unauthenticated() -> Self {
        Self::with_status(StatusCode::UNAUTHORIZED)
    }

    /// Answers 403: the session lacks permission.
    pub fn forbidden() -> Self {
        Self::with_status(StatusCode::FORBIDDEN)
    }

    fn with_status(status: StatusCode) -> Self {
        Self {
            status,
            kinds: BTreeSet::new(),
            security: SecurityState::default(),
        }
    }

    /// Protects only `kind`. Without any, every exchange is denied.
    pub fn protecting(mut self, kind: impl Into<String>) -> Self {
        self.kinds.insert(kind.into());
        self
    }

    pub fn with_login_route(mut self, route: impl Into<RouteTarget>) -> Self {
        self.security.login_route = Some(route.into());
        self
    }

    pub fn with_unauthorized_route(mut self, route: impl Into<RouteTarget>) -> Self {
        self.security.unauthorized_route = Some(route.into());
        self
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    fn covers(&self, request: &ExchangeRequest) -> bool {
        self.kinds.is_empty()
            || request
                .states
                .values()
                .chain(request.stores.values())
                .any(|payload| self.kinds.contains(&payload.name))
    }

    fn denial(&self) -> ExchangeResponse {
        let security = (self.security != SecurityState::default()).then(|| self.security.clone());
        ExchangeResponse {
            error: Some(ErrorPayload::new(ACCESS_DENIED_MARKER, "Access Denied.")),
            security,
            ..ExchangeResponse::default()
        }
    }
}

/// Shared endpoint state.
#[derive(Debug, Default)]
pub struct EndpointState {
    registry: ComponentRegistry,
    guard: Option<Guard>,
}

/// An entity being worked on during one exchange.
struct Working {
    name: String,
    state: Map<String, Value>,
}

impl EndpointState {
    pub fn new(registry: ComponentRegistry) -> Self {
        Self {
            registry,
            guard: None,
        }
    }

    pub fn with_guard(mut self, guard: Guard) -> Self {
        self.guard = Some(guard);
        self
    }

    pub fn registry(&self) -> &ComponentRegistry {
        &self.registry
    }

    /// Handles one exchange.
    pub fn exchange(&self, request: ExchangeRequest) -> EndpointResult<(StatusCode, ExchangeResponse)> {
        if let Some(guard) = self.guard.as_ref().filter(|guard| guard.covers(&request)) {
            warn!("Denying exchange with status {}", guard.status);
            return Ok((guard.status, guard.denial()));
        }

        let ExchangeRequest {
            stores,
            states,
            actions,
            components,
        } = request;
        let mut stores = self.prepare(EntityKind::Store, stores);
        let mut states = self.prepare(EntityKind::State, states);

        let mut response = ExchangeResponse::default();
        for (call_id, call) in actions.into_iter().enumerate() {
            let kind = if call.is_store {
                EntityKind::Store
            } else {
                EntityKind::State
            };
            let entities = match kind {
                EntityKind::Store => &mut stores,
                EntityKind::State => &mut states,
            };
            let entity = entities
                .get_mut(&call.instance_id)
                .ok_or_else(|| EndpointError::UnknownEntity {
                    kind,
                    instance_id: call.instance_id.clone(),
                })?;
            let component = self
                .registry
                .get(kind, &entity.name)
                .ok_or_else(|| EndpointError::UnknownComponent(entity.name.clone()))?;

            let value = component.invoke(&call.action, &mut entity.state, &call.args)?;
            debug!("{}.{} #{} returned {}", call.instance_id, call.action, call_id, value);
            response.actions.insert(call_id, ActionReply { value });
        }

        let definitions = self.registry.definitions_for(
            states.values().map(|w| w.name.as_str()),
            stores.values().map(|w| w.name.as_str()),
        );
        if !definitions.is_empty() {
            response.definitions = Some(definitions);
        }
        response.components = components.select(&self.registry.components());
        response.stores = replies(stores);
        response.states = replies(states);
        Ok((StatusCode::OK, response))
    }

    /// Takes the sent snapshots; new instances of known kinds get their
    /// declared initial values where the client sent none.
    fn prepare(
        &self,
        kind: EntityKind,
        payloads: BTreeMap<InstanceId, EntityPayload>,
    ) -> BTreeMap<InstanceId, Working> {
        payloads
            .into_iter()
            .map(|(instance_id, payload)| {
                let mut state = payload.state;
                if let Some(component) = self.registry.get(kind, &payload.name) {
                    if payload.is_new {
                        for (key, value) in component.definition().state {
                            let slot = state.entry(key).or_insert(Value::Null);
                            if slot.is_null() {
                                *slot = value;
                            }
                        }
                    }
                }
                (
                    instance_id,
                    Working {
                        name: payload.name,
                        state,
                    },
                )
            })
            .collect()
    }
}

fn replies(entities: BTreeMap<InstanceId, Working>) -> BTreeMap<InstanceId, EntityReply> {
    entities
        .into_iter()
        .map(|(instance_id, working)| {
            let reply = EntityReply {
                state: working.state,
                callbacks: Vec::new(),
            };
            (instance_id, reply)
        })
        .collect()
}

async fn exchange_handler(
    State(endpoint): State<Arc<EndpointState>>,
    Json(request): Json<ExchangeRequest>,
) -> EndpointResult<(StatusCode, Json<ExchangeResponse>)> {
    let (status, response) = endpoint.exchange(request)?;
    Ok((status, Json(response)))
}

/// Build the HTTP router serving the exchange route.
pub fn build_router(endpoint: Arc<EndpointState>) -> Router {
    Router::new()
        .route(DEFAULT_ENDPOINT, post(exchange_handler))
        .with_state(endpoint)
}
