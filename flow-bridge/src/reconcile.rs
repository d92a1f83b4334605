//! Reconciliation - applies server replies to live entities.
//!
//! Entities are mutated in place so every handle and observer stays valid.
//! States follow their definition: store-bound properties are linked to the
//! live store, other declared properties are copied when present. Kinds
//! without a definition, and all stores, take every returned key.

use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::debug;

use crate::bridge::Bridge;
use crate::callbacks::{invoke_callback, Callback, CallbackTarget};
use crate::entity::Entity;
use crate::protocol::EntityReply;
use flow_model::EntityKind;

/// Applies a store entry. Returns whether the store changed.
pub fn apply_store(bridge: &Bridge, store: &Entity, reply: &EntityReply) -> bool {
    let changed = store.assign(&reply.state);
    debug!("Reconciled store {} (changed: {})", store.instance_id(), changed);
    dispatch_callbacks(bridge, store, &reply.callbacks);
    changed
}

/// Applies a state entry. Returns whether the state changed.
pub fn apply_state(bridge: &Bridge, state: &Entity, reply: &EntityReply) -> bool {
    let changed = assign_state(bridge, state, &reply.state);
    debug!("Reconciled state {} (changed: {})", state.instance_id(), changed);
    dispatch_callbacks(bridge, state, &reply.callbacks);
    changed
}

/// Definition-driven assignment of `source` onto a state.
pub fn assign_state(bridge: &Bridge, target: &Entity, source: &Map<String, Value>) -> bool {
    let Some(definition) = bridge.definition(EntityKind::State, target.name()) else {
        return target.assign(source);
    };

    let mut copied = Map::new();
    let mut changed = false;
    for (property, spec) in &definition.properties {
        if let Some(binding) = spec.store_binding() {
            let store = bridge.use_store(&binding.store, None, None);
            changed |= target.link(property, &store, binding.property.as_deref());
        } else if let Some(value) = source.get(property) {
            copied.insert(property.clone(), value.clone());
        }
    }
    target.assign(&copied) || changed
}

fn dispatch_callbacks(bridge: &Bridge, entity: &Entity, callbacks: &[Callback]) {
    if callbacks.is_empty() {
        return;
    }
    let target: Arc<dyn CallbackTarget> = bridge
        .callback_target(entity.instance_id())
        .unwrap_or_else(|| Arc::new(entity.clone()));
    for callback in callbacks {
        invoke_callback(callback, Arc::clone(&target));
    }
}
