//! One coalescing window.
//!
//! A [`Batch`] collects entity registrations, ordered action calls and
//! component requests, serializes them into a single exchange, and settles
//! every queued [`Pending`] from the one reply: all resolve, or all reject
//! with the same error.

use flow_model::{ComponentDefinition, EntityKind, InstanceId};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::oneshot;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::bridge::Bridge;
use crate::entity::Entity;
use crate::error::{BridgeError, BridgeResult};
use crate::protocol::{
    ActionCall, ComponentRequest, EntityPayload, ExchangeRequest, ExchangeResponse,
};
use crate::reconcile;

/// Identifier of a batch (UUID v7, so ids sort by creation time).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BatchId(Uuid);

impl BatchId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for BatchId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for BatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What a promise resolves to once the reply lands.
#[derive(Debug)]
pub enum ResultSelector {
    /// The registered entity itself.
    Entity(Entity),
    /// `response.actions[callId].return`.
    Action(usize),
    /// The requested part of `response.components`.
    Components(ComponentRequest),
}

impl ResultSelector {
    fn select(self, response: &ExchangeResponse) -> Resolved {
        match self {
            Self::Entity(entity) => Resolved::Entity(entity),
            Self::Action(call_id) => Resolved::Value(response.action_return(call_id)),
            Self::Components(request) => Resolved::Components(request.select(&response.components)),
        }
    }
}

/// A settled promise value, before conversion to the caller's type.
#[derive(Debug)]
pub enum Resolved {
    Entity(Entity),
    Value(Value),
    Components(BTreeMap<String, ComponentDefinition>),
}

fn into_entity(resolved: Resolved) -> BridgeResult<Entity> {
    match resolved {
        Resolved::Entity(entity) => Ok(entity),
        other => Err(mismatch("entity", &other)),
    }
}

fn into_value(resolved: Resolved) -> BridgeResult<Value> {
    match resolved {
        Resolved::Value(value) => Ok(value),
        other => Err(mismatch("value", &other)),
    }
}

fn into_components(resolved: Resolved) -> BridgeResult<BTreeMap<String, ComponentDefinition>> {
    match resolved {
        Resolved::Components(components) => Ok(components),
        other => Err(mismatch("components", &other)),
    }
}

fn mismatch(expected: &str, got: &Resolved) -> BridgeError {
    BridgeError::Protocol(format!("expected {expected}, settled with {got:?}"))
}

/// A promise queued in a batch.
///
/// Resolves once the batch's round trip completes. Dropping it does not
/// cancel the batch.
#[must_use = "a pending result does nothing unless awaited"]
pub struct Pending<T> {
    rx: oneshot::Receiver<BridgeResult<Resolved>>,
    convert: fn(Resolved) -> BridgeResult<T>,
}

impl<T> Future for Pending<T> {
    type Output = BridgeResult<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match Pin::new(&mut this.rx).poll(cx) {
            Poll::Ready(Ok(Ok(resolved))) => Poll::Ready((this.convert)(resolved)),
            Poll::Ready(Ok(Err(e))) => Poll::Ready(Err(e)),
            Poll::Ready(Err(_)) => Poll::Ready(Err(BridgeError::Dropped)),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<T> fmt::Debug for Pending<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pending").finish_non_exhaustive()
    }
}

struct PendingEntity {
    entity: Entity,
    is_new: bool,
}

struct Promise {
    selector: ResultSelector,
    tx: oneshot::Sender<BridgeResult<Resolved>>,
}

/// The unit of coalesced refreshes and actions flushed as one round trip.
pub struct Batch {
    id: BatchId,
    stores: BTreeMap<InstanceId, PendingEntity>,
    states: BTreeMap<InstanceId, PendingEntity>,
    actions: Vec<ActionCall>,
    components: ComponentRequest,
    promises: Vec<Promise>,
    touched: usize,
}

impl Default for Batch {
    fn default() -> Self {
        Self::new()
    }
}

impl Batch {
    pub fn new() -> Self {
        Self {
            id: BatchId::new(),
            stores: BTreeMap::new(),
            states: BTreeMap::new(),
            actions: Vec::new(),
            components: ComponentRequest::default(),
            promises: Vec::new(),
            touched: 0,
        }
    }

    pub fn id(&self) -> BatchId {
        self.id
    }

    /// Whether nothing was recorded; empty batches are never sent.
    pub fn is_empty(&self) -> bool {
        self.touched == 0 && self.components.is_empty() && self.promises.is_empty()
    }

    pub fn action_count(&self) -> usize {
        self.actions.len()
    }

    /// Whether `entity` is registered in this batch.
    pub fn contains(&self, entity: &Entity) -> bool {
        self.entries(entity.kind()).contains_key(entity.instance_id())
    }

    fn entries(&self, kind: EntityKind) -> &BTreeMap<InstanceId, PendingEntity> {
        match kind {
            EntityKind::State => &self.states,
            EntityKind::Store => &self.stores,
        }
    }

    // ── Recording ────────────────────────────────────────────────

    /// Registers `entity`. The first registration's `is_new` sticks; every
    /// awaited registration still gets its own promise.
    pub fn append_refresh(
        &mut self,
        entity: &Entity,
        await_changes: bool,
        is_new: bool,
    ) -> Option<Pending<Entity>> {
        self.touched += 1;
        let entries = match entity.kind() {
            EntityKind::State => &mut self.states,
            EntityKind::Store => &mut self.stores,
        };
        entries
            .entry(entity.instance_id().clone())
            .or_insert_with(|| PendingEntity {
                entity: entity.clone(),
                is_new,
            });

        await_changes.then(|| self.append_promise(ResultSelector::Entity(entity.clone()), into_entity))
    }

    /// Appends an action call; its position is its call id. The invoking
    /// entity is registered without awaiting.
    pub fn append_invoke_action(
        &mut self,
        entity: &Entity,
        action: &str,
        args: Vec<Value>,
    ) -> Pending<Value> {
        let call_id = self.actions.len();
        let pending = self.append_promise(ResultSelector::Action(call_id), into_value);
        self.actions.push(ActionCall {
            is_store: entity.is_store(),
            instance_id: entity.instance_id().clone(),
            action: action.to_string(),
            args,
        });
        let _ = self.append_refresh(entity, false, false);
        pending
    }

    /// Adds a component definition request.
    pub fn append_component_request(
        &mut self,
        request: ComponentRequest,
    ) -> Pending<BTreeMap<String, ComponentDefinition>> {
        self.components.extend(request.clone());
        self.append_promise(ResultSelector::Components(request), into_components)
    }

    fn append_promise<T>(
        &mut self,
        selector: ResultSelector,
        convert: fn(Resolved) -> BridgeResult<T>,
    ) -> Pending<T> {
        let (tx, rx) = oneshot::channel();
        self.promises.push(Promise { selector, tx });
        Pending { rx, convert }
    }

    // ── Settlement ───────────────────────────────────────────────

    /// Rejects every queued promise with `error`.
    pub fn reject_all(&mut self, error: BridgeError) {
        for promise in self.promises.drain(..) {
            let _ = promise.tx.send(Err(error.clone()));
        }
    }

    fn resolve_all(&mut self, response: &ExchangeResponse) {
        for promise in self.promises.drain(..) {
            let _ = promise.tx.send(Ok(promise.selector.select(response)));
        }
    }

    // ── Execution ────────────────────────────────────────────────

    /// Builds the outgoing request, pruning each entity by its definition.
    ///
    /// States go first: their store-bound properties are never sent, but
    /// the bound stores are registered so their snapshots ride along.
    pub fn build_request(&mut self, bridge: &Bridge) -> ExchangeRequest {
        let mut request = ExchangeRequest {
            actions: self.actions.clone(),
            components: self.components.clone(),
            ..ExchangeRequest::default()
        };

        let mut bound_stores = Vec::new();
        for (instance_id, pending) in &self.states {
            let payload = match bridge.definition(EntityKind::State, pending.entity.name()) {
                None => full_payload(pending),
                Some(definition) => {
                    let mut state = Map::new();
                    for (property, spec) in &definition.properties {
                        if let Some(store) = &spec.store {
                            bound_stores.push(store.clone());
                        } else if spec.direction.is_sent() {
                            let value = pending.entity.get(property).unwrap_or(Value::Null);
                            state.insert(property.clone(), value);
                        }
                    }
                    pruned_payload(pending, state)
                }
            };
            request.states.insert(instance_id.clone(), payload);
        }

        for name in bound_stores {
            let store = bridge.use_store(&name, None, None);
            let _ = self.append_refresh(&store, false, false);
        }

        for (instance_id, pending) in &self.stores {
            let payload = match bridge.definition(EntityKind::Store, pending.entity.name()) {
                None => full_payload(pending),
                Some(definition) => {
                    let state = definition
                        .sent_properties()
                        .map(|property| {
                            let value = pending.entity.get(property).unwrap_or(Value::Null);
                            (property.to_string(), value)
                        })
                        .collect();
                    pruned_payload(pending, state)
                }
            };
            request.stores.insert(instance_id.clone(), payload);
        }

        request
    }

    /// Runs the round trip and reconciles the reply. Returns whether the
    /// batch was applied.
    pub async fn execute(mut self, bridge: &Bridge) -> bool {
        if self.is_empty() {
            debug!("Batch {} is empty, not sending", self.id);
            return false;
        }

        let request = self.build_request(bridge);
        debug!(
            "Flushing batch {}: {} states, {} stores, {} actions",
            self.id,
            request.states.len(),
            request.stores.len(),
            request.actions.len()
        );

        let reply = match bridge.transport().exchange(bridge.endpoint(), &request).await {
            Ok(reply) => reply,
            Err(e) => {
                warn!("Batch {} failed: {}", self.id, e);
                self.reject_all(e);
                return false;
            }
        };

        let status = reply.status;
        let mut response: ExchangeResponse = if reply.body.is_null() {
            ExchangeResponse::default()
        } else {
            match serde_json::from_value(reply.body) {
                Ok(response) => response,
                // A 401/403 is a denial whatever its body says.
                Err(e) if status == 401 || status == 403 => {
                    debug!("Batch {} denial body is not an exchange reply: {}", self.id, e);
                    ExchangeResponse::default()
                }
                Err(e) => {
                    warn!("Batch {} got a malformed reply: {}", self.id, e);
                    self.reject_all(BridgeError::Protocol(e.to_string()));
                    return false;
                }
            }
        };

        if response.is_denied(status) {
            bridge
                .handle_unauthorized(status, response.security.as_ref())
                .await;
            let error = response.error.take().unwrap_or_default();
            warn!("Batch {} denied with status {}", self.id, status);
            self.reject_all(BridgeError::AccessDenied {
                status,
                error_type: error.error_type,
                message: error.message.unwrap_or_else(|| "Access denied".to_string()),
            });
            return false;
        }

        if !(200..300).contains(&status) {
            let message = response
                .error
                .take()
                .and_then(|e| e.message)
                .unwrap_or_else(|| format!("HTTP {status}"));
            warn!("Batch {} failed with status {}: {}", self.id, status, message);
            self.reject_all(BridgeError::Server { status, message });
            return false;
        }

        if let Some(error) = &response.error {
            warn!(
                "Batch {} reply carries an error: {:?} {:?}",
                self.id, error.error_type, error.message
            );
        }

        if let Some(security) = &response.security {
            bridge.merge_security(security);
            if security.wants_redirect() {
                bridge.follow_redirect(status, security).await;
            }
        }

        if let Some(definitions) = response.definitions.take() {
            bridge.merge_definitions(definitions);
        }

        for (instance_id, reply) in &response.stores {
            match self.stores.get(instance_id) {
                Some(pending) => {
                    reconcile::apply_store(bridge, &pending.entity, reply);
                }
                None => warn!("Ignoring reply for unregistered store {}", instance_id),
            }
        }
        for (instance_id, reply) in &response.states {
            match self.states.get(instance_id) {
                Some(pending) => {
                    reconcile::apply_state(bridge, &pending.entity, reply);
                }
                None => warn!("Ignoring reply for unregistered state {}", instance_id),
            }
        }

        for pending in self.states.values().chain(self.stores.values()) {
            pending.entity.mark_reconciled();
        }

        self.resolve_all(&response);
        debug!("Batch {} applied", self.id);
        true
    }
}

impl fmt::Debug for Batch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Batch")
            .field("id", &self.id)
            .field("states", &self.states.keys().collect::<Vec<_>>())
            .field("stores", &self.stores.keys().collect::<Vec<_>>())
            .field("actions", &self.actions.len())
            .field("promises", &self.promises.len())
            .finish()
    }
}

fn full_payload(pending: &PendingEntity) -> EntityPayload {
    EntityPayload {
        name: pending.entity.name().to_string(),
        state: pending.entity.snapshot(),
        is_new: pending.is_new,
    }
}

fn pruned_payload(pending: &PendingEntity, state: Map<String, Value>) -> EntityPayload {
    EntityPayload {
        name: pending.entity.name().to_string(),
        state,
        is_new: pending.is_new,
    }
}
