//! Live entities.
//!
//! An [`Entity`] is a cheap, cloneable handle to a mutable property bag.
//! Every clone observes the same state: reconciliation mutates it in place
//! and observers are notified through [`Entity::subscribe`].
//!
//! Properties bound to a store hold a [`Slot::Link`] instead of a copy, so
//! reads and projected writes go straight to the live store.

use flow_model::{ActionSpec, EntityKind, InstanceId};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};
use tokio::sync::watch;
use tracing::warn;

use crate::bridge::{Bridge, BridgeInner};
use crate::callbacks::{CallbackFn, CallbackTarget};
use crate::error::{BridgeError, BridgeResult};
use crate::storage::{storage_key, StateStorage};

/// Control block identifying an entity on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityCtx {
    pub name: String,
    pub instance_id: InstanceId,
    pub kind: EntityKind,
}

impl EntityCtx {
    pub fn is_store(&self) -> bool {
        self.kind.is_store()
    }
}

/// Link from a property to a live store, or to one of its properties.
#[derive(Clone)]
pub struct StoreLink {
    pub store: Entity,
    pub property: Option<String>,
}

impl StoreLink {
    fn points_at(&self, store: &Entity, property: Option<&str>) -> bool {
        Entity::ptr_eq(&self.store, store) && self.property.as_deref() == property
    }

    fn read(&self) -> Value {
        match &self.property {
            Some(property) => self.store.get(property).unwrap_or(Value::Null),
            None => Value::Object(self.store.snapshot()),
        }
    }
}

/// Storage of one property.
#[derive(Clone)]
pub enum Slot {
    Value(Value),
    Link(StoreLink),
}

struct EntityInner {
    ctx: EntityCtx,
    slots: RwLock<BTreeMap<String, Slot>>,
    is_new: AtomicBool,
    revision: watch::Sender<u64>,
    actions: BTreeMap<String, ActionSpec>,
    storage: Mutex<Option<Arc<dyn StateStorage>>>,
    bridge: Weak<BridgeInner>,
}

/// Handle to a live State or Store.
#[derive(Clone)]
pub struct Entity {
    inner: Arc<EntityInner>,
}

impl Entity {
    pub(crate) fn new(
        ctx: EntityCtx,
        actions: BTreeMap<String, ActionSpec>,
        bridge: Weak<BridgeInner>,
    ) -> Self {
        let (revision, _) = watch::channel(0);
        Self {
            inner: Arc::new(EntityInner {
                ctx,
                slots: RwLock::new(BTreeMap::new()),
                is_new: AtomicBool::new(true),
                revision,
                actions,
                storage: Mutex::new(None),
                bridge,
            }),
        }
    }

    /// Whether both handles refer to the same live entity.
    pub fn ptr_eq(a: &Entity, b: &Entity) -> bool {
        Arc::ptr_eq(&a.inner, &b.inner)
    }

    pub fn ctx(&self) -> &EntityCtx {
        &self.inner.ctx
    }

    pub fn name(&self) -> &str {
        &self.inner.ctx.name
    }

    pub fn instance_id(&self) -> &InstanceId {
        &self.inner.ctx.instance_id
    }

    pub fn kind(&self) -> EntityKind {
        self.inner.ctx.kind
    }

    pub fn is_store(&self) -> bool {
        self.inner.ctx.is_store()
    }

    /// True until the first server round trip for this entity completes.
    pub fn is_new(&self) -> bool {
        self.inner.is_new.load(Ordering::Acquire)
    }

    pub(crate) fn mark_reconciled(&self) {
        self.inner.is_new.store(false, Ordering::Release);
    }

    // ── Properties ───────────────────────────────────────────────

    /// Reads a property, following store links.
    pub fn get(&self, key: &str) -> Option<Value> {
        let slot = self.slots().get(key).cloned()?;
        Some(match slot {
            Slot::Value(value) => value,
            Slot::Link(link) => link.read(),
        })
    }

    /// Property names, in order.
    pub fn keys(&self) -> Vec<String> {
        self.slots().keys().cloned().collect()
    }

    /// Whether `key` is linked to a store.
    pub fn is_linked(&self, key: &str) -> bool {
        matches!(self.slots().get(key), Some(Slot::Link(_)))
    }

    /// The store `key` is linked to, if any.
    pub fn linked_store(&self, key: &str) -> Option<Entity> {
        match self.slots().get(key) {
            Some(Slot::Link(link)) => Some(link.store.clone()),
            _ => None,
        }
    }

    /// Plain copy of every property, store links resolved.
    pub fn snapshot(&self) -> Map<String, Value> {
        let slots: Vec<(String, Slot)> = self
            .slots()
            .iter()
            .map(|(key, slot)| (key.clone(), slot.clone()))
            .collect();
        slots
            .into_iter()
            .map(|(key, slot)| {
                let value = match slot {
                    Slot::Value(value) => value,
                    Slot::Link(link) => link.read(),
                };
                (key, value)
            })
            .collect()
    }

    /// Writes a property. Writes to a projected store property go to the
    /// store; writing over a whole-store link replaces the link.
    pub fn set(&self, key: &str, value: Value) -> bool {
        let changed = self.write(key, value);
        if changed {
            self.bump();
        }
        changed
    }

    /// Writes every entry of `values`, notifying observers once.
    /// Returns whether anything changed.
    pub fn assign(&self, values: &Map<String, Value>) -> bool {
        let mut changed = false;
        for (key, value) in values {
            changed |= self.write(key, value.clone());
        }
        if changed {
            self.bump();
        }
        changed
    }

    /// Links `key` to `store` (or one of its properties).
    /// Returns whether the binding changed.
    pub fn link(&self, key: &str, store: &Entity, property: Option<&str>) -> bool {
        {
            let mut slots = self.slots_mut();
            if let Some(Slot::Link(link)) = slots.get(key) {
                if link.points_at(store, property) {
                    return false;
                }
            }
            slots.insert(
                key.to_string(),
                Slot::Link(StoreLink {
                    store: store.clone(),
                    property: property.map(str::to_string),
                }),
            );
        }
        self.bump();
        true
    }

    fn write(&self, key: &str, value: Value) -> bool {
        let mut slots = self.slots_mut();
        let projected = match slots.get(key) {
            Some(Slot::Link(StoreLink {
                store,
                property: Some(property),
            })) => Some((store.clone(), property.clone())),
            Some(Slot::Value(current)) if *current == value => return false,
            _ => None,
        };
        match projected {
            Some((store, property)) => {
                drop(slots);
                store.set(&property, value)
            }
            None => {
                slots.insert(key.to_string(), Slot::Value(value));
                true
            }
        }
    }

    // ── Observation ──────────────────────────────────────────────

    /// Receiver of the entity revision, bumped on every in-place mutation.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.inner.revision.subscribe()
    }

    pub fn revision(&self) -> u64 {
        *self.inner.revision.borrow()
    }

    fn bump(&self) {
        self.inner.revision.send_modify(|revision| *revision += 1);
    }

    // ── Actions ──────────────────────────────────────────────────

    /// Actions declared for this entity at creation.
    pub fn actions(&self) -> impl Iterator<Item = &str> {
        self.inner.actions.keys().map(String::as_str)
    }

    /// Calls `method`: native bodies run locally, server-delivered source is
    /// rejected, anything else becomes a batched server action.
    pub async fn call(&self, method: &str, args: Vec<Value>) -> BridgeResult<Value> {
        match self.action(method) {
            Some(ActionSpec::Native(_)) => self.call_native(method, &args),
            Some(ActionSpec::Source { .. }) => {
                warn!(
                    "Refusing to run server-delivered source for {}.{}",
                    self.name(),
                    method
                );
                Err(BridgeError::RejectedAction(method.to_string()))
            }
            Some(ActionSpec::Remote) | None => self.invoke(method, args).await,
        }
    }

    /// Runs a native action against a plain copy of the state and writes
    /// the result back.
    pub fn call_native(&self, method: &str, args: &[Value]) -> BridgeResult<Value> {
        let Some(ActionSpec::Native(body)) = self.action(method) else {
            return Err(BridgeError::RejectedAction(method.to_string()));
        };
        let before = self.snapshot();
        let mut state = before.clone();
        let result = body(&mut state, args).map_err(|reason| BridgeError::Action {
            action: method.to_string(),
            reason,
        });
        state.retain(|key, value| before.get(key) != Some(value));
        self.assign(&state);
        result
    }

    fn action(&self, method: &str) -> Option<ActionSpec> {
        self.bridge()
            .ok()
            .and_then(|bridge| bridge.native_action(self.name(), method))
            .map(ActionSpec::Native)
            .or_else(|| self.inner.actions.get(method).cloned())
    }

    /// Invokes a server action in the current batch.
    pub async fn invoke(&self, action: &str, args: Vec<Value>) -> BridgeResult<Value> {
        self.invoke_with(action, args, false).await
    }

    /// Invokes a server action and flushes the batch right away.
    pub async fn invoke_now(&self, action: &str, args: Vec<Value>) -> BridgeResult<Value> {
        self.invoke_with(action, args, true).await
    }

    async fn invoke_with(
        &self,
        action: &str,
        args: Vec<Value>,
        immediate: bool,
    ) -> BridgeResult<Value> {
        let pending = self.bridge()?.invoke(self, action, args, immediate);
        let result = pending.await?;
        self.persist();
        Ok(result)
    }

    /// Refreshes this entity from the server.
    pub async fn refresh(&self) -> BridgeResult<Entity> {
        match self.bridge()?.refresh(self, true, false) {
            Some(pending) => pending.await,
            None => Ok(self.clone()),
        }
    }

    /// Rehydrates from `storage` when it holds a snapshot, otherwise
    /// refreshes from the server. Later action results are persisted there.
    pub async fn and_refresh(&self, storage: Arc<dyn StateStorage>) -> BridgeResult<Entity> {
        match self.bridge()?.hydrate_or_refresh(self, storage) {
            Some(pending) => pending.await,
            None => Ok(self.clone()),
        }
    }

    // ── Storage ──────────────────────────────────────────────────

    pub(crate) fn bind_storage(&self, storage: Arc<dyn StateStorage>) {
        *self
            .inner
            .storage
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Some(storage);
    }

    /// Writes the current snapshot to the bound storage, if any.
    pub fn persist(&self) {
        let storage = self
            .inner
            .storage
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        let Some(storage) = storage else {
            return;
        };
        match serde_json::to_string(&self.snapshot()) {
            Ok(json) => storage.set_item(&storage_key(self.instance_id()), json),
            Err(e) => warn!("Failed to persist {}: {}", self.instance_id(), e),
        }
    }

    // ── Internals ────────────────────────────────────────────────

    fn bridge(&self) -> BridgeResult<Bridge> {
        self.inner
            .bridge
            .upgrade()
            .map(Bridge::from_inner)
            .ok_or(BridgeError::Detached)
    }

    fn slots(&self) -> std::sync::RwLockReadGuard<'_, BTreeMap<String, Slot>> {
        self.inner.slots.read().unwrap_or_else(|e| e.into_inner())
    }

    fn slots_mut(&self) -> std::sync::RwLockWriteGuard<'_, BTreeMap<String, Slot>> {
        self.inner.slots.write().unwrap_or_else(|e| e.into_inner())
    }
}

impl fmt::Debug for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entity")
            .field("name", &self.inner.ctx.name)
            .field("instance_id", &self.inner.ctx.instance_id)
            .field("kind", &self.inner.ctx.kind)
            .field("revision", &self.revision())
            .finish()
    }
}

/// Callbacks without a registered target run against the entity: native
/// actions are its methods, whole-store links its members.
impl CallbackTarget for Entity {
    fn member(&self, name: &str) -> Option<Arc<dyn CallbackTarget>> {
        match self.slots().get(name) {
            Some(Slot::Link(StoreLink {
                store,
                property: None,
            })) => Some(Arc::new(store.clone()) as Arc<dyn CallbackTarget>),
            _ => None,
        }
    }

    fn method(&self, name: &str) -> Option<CallbackFn> {
        if !matches!(self.action(name), Some(ActionSpec::Native(_))) {
            return None;
        }
        let entity = self.clone();
        let method = name.to_string();
        Some(Arc::new(move |args: &[Value]| {
            if let Err(e) = entity.call_native(&method, args) {
                warn!("Callback {} on {} failed: {}", method, entity.instance_id(), e);
            }
        }))
    }
}
