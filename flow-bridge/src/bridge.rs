//! Session-wide coordinator.
//!
//! The [`Bridge`] owns the definition cache, the store registry, the session
//! security state and the currently open [`Batch`]. Shared state sits behind
//! short std locks that are never held across an `.await`; a batch leaves
//! the open slot synchronously when it flushes and then runs to completion
//! in its own task, so a new batch can open while the old one is in flight.
//!
//! All operations that open a batch must run inside a Tokio runtime: the
//! coalescing timer is a spawned task.

use flow_model::{
    ActionSpec, ComponentDefinition, Definition, DefinitionCache, Definitions, EntityKind,
    InstanceId, InstanceIdGenerator, MergeReport, NativeFn,
};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::batch::{Batch, BatchId, Pending};
use crate::callbacks::CallbackTarget;
use crate::config::{BridgeConfig, ComponentRegistrar, FlowOptions};
use crate::entity::{Entity, EntityCtx};
use crate::error::BridgeResult;
use crate::protocol::ComponentRequest;
use crate::reconcile;
use crate::security::{self, Navigator, Recovery, Router, SecurityState};
use crate::storage::{storage_key, StateStorage};
use crate::transport::Transport;

pub(crate) struct BridgeInner {
    config: BridgeConfig,
    transport: Arc<dyn Transport>,
    router: Option<Arc<dyn Router>>,
    navigator: Option<Arc<dyn Navigator>>,
    registrar: Option<Arc<dyn ComponentRegistrar>>,
    definitions: RwLock<DefinitionCache>,
    stores: Mutex<HashMap<String, Entity>>,
    security: RwLock<SecurityState>,
    batch: Mutex<Option<Batch>>,
    ids: InstanceIdGenerator,
    natives: RwLock<HashMap<(String, String), NativeFn>>,
    callback_targets: RwLock<HashMap<InstanceId, Arc<dyn CallbackTarget>>>,
}

/// Handle to a bridge session. Clones share the session.
#[derive(Clone)]
pub struct Bridge {
    inner: Arc<BridgeInner>,
}

/// Builds a [`Bridge`] from its collaborators.
pub struct BridgeBuilder {
    config: BridgeConfig,
    transport: Arc<dyn Transport>,
    router: Option<Arc<dyn Router>>,
    navigator: Option<Arc<dyn Navigator>>,
    registrar: Option<Arc<dyn ComponentRegistrar>>,
}

impl BridgeBuilder {
    pub fn config(mut self, config: BridgeConfig) -> Self {
        self.config = config;
        self
    }

    pub fn router(mut self, router: Arc<dyn Router>) -> Self {
        self.router = Some(router);
        self
    }

    pub fn navigator(mut self, navigator: Arc<dyn Navigator>) -> Self {
        self.navigator = Some(navigator);
        self
    }

    pub fn registrar(mut self, registrar: Arc<dyn ComponentRegistrar>) -> Self {
        self.registrar = Some(registrar);
        self
    }

    pub fn build(self) -> Bridge {
        let security = self.config.security.clone();
        Bridge::from_inner(Arc::new(BridgeInner {
            config: self.config,
            transport: self.transport,
            router: self.router,
            navigator: self.navigator,
            registrar: self.registrar,
            definitions: RwLock::new(DefinitionCache::new()),
            stores: Mutex::new(HashMap::new()),
            security: RwLock::new(security),
            batch: Mutex::new(None),
            ids: InstanceIdGenerator::new(),
            natives: RwLock::new(HashMap::new()),
            callback_targets: RwLock::new(HashMap::new()),
        }))
    }

    /// Builds the bridge from bootstrap options: preloads the given
    /// definitions, then fetches the autoloaded components.
    pub async fn install(mut self, options: FlowOptions) -> BridgeResult<Bridge> {
        self.config = options.config;
        let bridge = self.build();
        if let Some(definitions) = options.definitions {
            bridge.load_definitions(definitions)?;
        }
        if let Some(request) = options.autoload_components {
            let loaded = bridge.use_components(request).await?;
            info!("Autoloaded {} components", loaded.len());
        }
        Ok(bridge)
    }
}

impl Bridge {
    /// Starts building a bridge over `transport`.
    pub fn builder(transport: Arc<dyn Transport>) -> BridgeBuilder {
        BridgeBuilder {
            config: BridgeConfig::default(),
            transport,
            router: None,
            navigator: None,
            registrar: None,
        }
    }

    /// Creates a bridge with no router, navigator or component registrar.
    pub fn new(config: BridgeConfig, transport: Arc<dyn Transport>) -> Self {
        Self::builder(transport).config(config).build()
    }

    pub(crate) fn from_inner(inner: Arc<BridgeInner>) -> Self {
        Self { inner }
    }

    // ── Accessors ────────────────────────────────────────────────

    pub fn config(&self) -> &BridgeConfig {
        &self.inner.config
    }

    pub fn endpoint(&self) -> &str {
        &self.inner.config.endpoint
    }

    pub(crate) fn transport(&self) -> &dyn Transport {
        self.inner.transport.as_ref()
    }

    /// Current session security settings.
    pub fn security(&self) -> SecurityState {
        self.inner
            .security
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Copy of every known definition.
    pub fn definitions(&self) -> Definitions {
        self.cache().snapshot()
    }

    /// Known definition for an entity kind.
    pub fn definition(&self, kind: EntityKind, name: &str) -> Option<Definition> {
        self.cache().get(kind, name).cloned()
    }

    /// Live store called `name`, without creating it.
    pub fn store(&self, name: &str) -> Option<Entity> {
        self.stores().get(name).cloned()
    }

    /// Whether a batch is currently open.
    pub fn has_open_batch(&self) -> bool {
        self.batch_slot().is_some()
    }

    // ── Batching ─────────────────────────────────────────────────

    /// Returns the open batch, opening one (and arming its timer) if idle.
    pub fn begin_batch(&self) -> BatchId {
        self.with_batch(|_| ()).0
    }

    /// Registers `entity` in the open batch. Resolves to the entity once the
    /// round trip lands, or returns `None` when `await_changes` is false.
    pub fn refresh(
        &self,
        entity: &Entity,
        await_changes: bool,
        is_new: bool,
    ) -> Option<Pending<Entity>> {
        self.with_batch(|batch| batch.append_refresh(entity, await_changes, is_new))
            .1
    }

    /// Records a server action in the open batch. `immediate` flushes the
    /// batch now instead of waiting for the timer.
    pub fn invoke(
        &self,
        entity: &Entity,
        action: &str,
        args: Vec<Value>,
        immediate: bool,
    ) -> Pending<Value> {
        let (id, pending) =
            self.with_batch(|batch| batch.append_invoke_action(entity, action, args));
        if immediate {
            let _ = self.spawn_flush(Some(id));
        }
        pending
    }

    /// Detaches the open batch and runs it now. Returns whether a reply was
    /// applied.
    pub async fn flush(&self) -> bool {
        match self.spawn_flush(None) {
            Some(handle) => handle.await.unwrap_or(false),
            None => false,
        }
    }

    fn with_batch<R>(&self, f: impl FnOnce(&mut Batch) -> R) -> (BatchId, R) {
        let (id, created, result) = {
            let mut slot = self.batch_slot();
            let created = slot.is_none();
            let batch = slot.get_or_insert_with(Batch::new);
            let result = f(batch);
            (batch.id(), created, result)
        };
        if created {
            debug!("Opened batch {}", id);
            self.arm_timer(id);
        }
        (id, result)
    }

    fn arm_timer(&self, id: BatchId) {
        let weak = Arc::downgrade(&self.inner);
        let delay = self.inner.config.batch_delay();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(inner) = weak.upgrade() else {
                return;
            };
            let bridge = Bridge::from_inner(inner);
            if let Some(batch) = bridge.detach_batch(Some(id)) {
                batch.execute(&bridge).await;
            }
        });
    }

    /// Takes the open batch out of its slot. With `expected`, only a batch
    /// with that id is taken, so a batch flushed early is never run twice.
    fn detach_batch(&self, expected: Option<BatchId>) -> Option<Batch> {
        let mut slot = self.batch_slot();
        match (slot.as_ref(), expected) {
            (Some(batch), Some(id)) if batch.id() != id => None,
            _ => slot.take(),
        }
    }

    fn spawn_flush(&self, expected: Option<BatchId>) -> Option<JoinHandle<bool>> {
        let batch = self.detach_batch(expected)?;
        let bridge = self.clone();
        Some(tokio::spawn(async move { batch.execute(&bridge).await }))
    }

    // ── Entity factory ───────────────────────────────────────────

    /// Creates a new state instance. With `storage`, it is hydrated from
    /// there (or refreshed when storage holds nothing) and later action
    /// results are persisted to it.
    pub fn use_state(
        &self,
        name: &str,
        initial: Option<Map<String, Value>>,
        storage: Option<Arc<dyn StateStorage>>,
    ) -> Entity {
        let state = self.make_entity(name, EntityKind::State, initial, storage.is_none());
        if let Some(storage) = storage {
            let _ = self.hydrate_or_refresh(&state, storage);
        }
        state
    }

    /// Returns the session's store called `name`, creating it on first use.
    pub fn use_store(
        &self,
        name: &str,
        initial: Option<Map<String, Value>>,
        storage: Option<Arc<dyn StateStorage>>,
    ) -> Entity {
        let store = {
            let mut stores = self.stores();
            if let Some(store) = stores.get(name) {
                return store.clone();
            }
            let store = self.make_entity(name, EntityKind::Store, initial, true);
            stores.insert(name.to_string(), store.clone());
            store
        };
        if let Some(storage) = storage {
            let _ = self.hydrate_or_refresh(&store, storage);
        }
        store
    }

    fn make_entity(
        &self,
        name: &str,
        kind: EntityKind,
        initial: Option<Map<String, Value>>,
        is_new: bool,
    ) -> Entity {
        let definition = self.definition(kind, name);
        let instance_id = match kind {
            EntityKind::Store => InstanceId::for_store(name),
            EntityKind::State => self.inner.ids.next_id(name),
        };

        let actions = definition
            .as_ref()
            .map(|d| d.methods.clone())
            .unwrap_or_default();
        for (method, spec) in &actions {
            if matches!(spec, ActionSpec::Source { .. }) && self.native_action(name, method).is_none() {
                warn!(
                    "{} {}.{} was delivered as source and will not be evaluated",
                    kind, name, method
                );
            }
        }

        let ctx = EntityCtx {
            name: name.to_string(),
            instance_id,
            kind,
        };
        let entity = Entity::new(ctx, actions, Arc::downgrade(&self.inner));

        let mut state = definition
            .as_ref()
            .map(|d| d.state.clone())
            .unwrap_or_default();
        state.extend(initial.unwrap_or_default());
        match kind {
            EntityKind::State => {
                reconcile::assign_state(self, &entity, &state);
            }
            EntityKind::Store => {
                entity.assign(&state);
            }
        }
        debug!("Created {} {}", kind, entity.instance_id());

        if let Some(definition) = definition {
            if is_new && definition.init {
                let _ = self.refresh(&entity, true, true);
            } else if definition.awake {
                let _ = self.refresh(&entity, false, false);
            }
        }
        entity
    }

    /// Hydrates `entity` from `storage` when it holds a snapshot; otherwise
    /// registers a refresh. Binds the storage for later persistence.
    pub fn hydrate_or_refresh(
        &self,
        entity: &Entity,
        storage: Arc<dyn StateStorage>,
    ) -> Option<Pending<Entity>> {
        entity.bind_storage(Arc::clone(&storage));
        let key = storage_key(entity.instance_id());
        let snapshot = storage.get_item(&key).and_then(|raw| {
            serde_json::from_str::<Map<String, Value>>(&raw)
                .map_err(|e| warn!("Ignoring unreadable snapshot under {}: {}", key, e))
                .ok()
        });

        match snapshot {
            Some(snapshot) => {
                match entity.kind() {
                    EntityKind::Store => entity.assign(&snapshot),
                    EntityKind::State => reconcile::assign_state(self, entity, &snapshot),
                };
                debug!("Hydrated {} from storage", entity.instance_id());
                None
            }
            None => self.refresh(entity, true, false),
        }
    }

    /// Registers a client-side body for `action` on entities called `name`.
    /// Takes precedence over whatever the definition declares.
    pub fn register_action<F>(&self, name: &str, action: &str, body: F)
    where
        F: Fn(&mut Map<String, Value>, &[Value]) -> Result<Value, String> + Send + Sync + 'static,
    {
        self.inner
            .natives
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert((name.to_string(), action.to_string()), Arc::new(body));
    }

    pub(crate) fn native_action(&self, name: &str, action: &str) -> Option<NativeFn> {
        self.inner
            .natives
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&(name.to_string(), action.to_string()))
            .cloned()
    }

    // ── Callback targets ─────────────────────────────────────────

    /// Routes callbacks for `instance_id` to `target` (e.g. the mounted
    /// component) instead of the entity itself.
    pub fn attach_callback_target(&self, instance_id: InstanceId, target: Arc<dyn CallbackTarget>) {
        self.inner
            .callback_targets
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(instance_id, target);
    }

    pub fn detach_callback_target(&self, instance_id: &InstanceId) {
        self.inner
            .callback_targets
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(instance_id);
    }

    pub(crate) fn callback_target(&self, instance_id: &InstanceId) -> Option<Arc<dyn CallbackTarget>> {
        self.inner
            .callback_targets
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(instance_id)
            .cloned()
    }

    // ── Definitions & components ─────────────────────────────────

    /// Merges definitions into the cache; names already known keep their
    /// definition. New components are handed to the registrar once.
    pub fn load_definitions(&self, definitions: Definitions) -> BridgeResult<MergeReport> {
        for (name, definition) in definitions.states.iter().chain(&definitions.stores) {
            definition.validate(name)?;
        }
        Ok(self.merge_definitions(definitions))
    }

    /// Merges server-delivered definitions, skipping invalid ones.
    pub(crate) fn merge_definitions(&self, mut definitions: Definitions) -> MergeReport {
        definitions.states.retain(|name, definition| keep_valid(name, definition));
        definitions.stores.retain(|name, definition| keep_valid(name, definition));

        let (report, fresh) = {
            let mut cache = self.cache_mut();
            let report = cache.merge(definitions);
            let fresh: Vec<(String, ComponentDefinition)> = report
                .components
                .iter()
                .filter_map(|name| cache.component(name).map(|d| (name.clone(), d.clone())))
                .collect();
            (report, fresh)
        };
        if !report.is_empty() {
            debug!(
                "Learned {} states, {} stores, {} components",
                report.states.len(),
                report.stores.len(),
                report.components.len()
            );
        }
        self.register_components(fresh);
        report
    }

    /// Requests component definitions (`"*"` or explicit names) in a batch
    /// of their own, flushed immediately. Components not known yet are
    /// registered; the delivered map is returned.
    pub async fn use_components(
        &self,
        request: ComponentRequest,
    ) -> BridgeResult<BTreeMap<String, ComponentDefinition>> {
        let mut batch = self.detach_batch(None).unwrap_or_default();
        let pending = batch.append_component_request(request);
        let bridge = self.clone();
        tokio::spawn(async move { batch.execute(&bridge).await });

        let delivered = pending.await?;
        let fresh: Vec<(String, ComponentDefinition)> = {
            let mut cache = self.cache_mut();
            delivered
                .iter()
                .filter(|(name, definition)| cache.insert_component(name.as_str(), (*definition).clone()))
                .map(|(name, definition)| (name.clone(), definition.clone()))
                .collect()
        };
        self.register_components(fresh);
        Ok(delivered)
    }

    fn register_components(&self, components: Vec<(String, ComponentDefinition)>) {
        let Some(registrar) = &self.inner.registrar else {
            return;
        };
        for (key, definition) in components {
            registrar.register(definition.registered_name(&key), &definition);
        }
    }

    // ── Security ─────────────────────────────────────────────────

    pub(crate) fn merge_security(&self, incoming: &SecurityState) {
        self.inner
            .security
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .merge(incoming);
    }

    /// Redirect recovery after a denial with `status`.
    pub(crate) async fn handle_unauthorized(
        &self,
        status: u16,
        response: Option<&SecurityState>,
    ) -> Recovery {
        let target = security::select_target(status, response, &self.security());
        self.recover(target).await
    }

    /// Redirect requested by a `security` block on a successful reply.
    pub(crate) async fn follow_redirect(&self, status: u16, incoming: &SecurityState) -> Recovery {
        let target = incoming
            .redirect_target()
            .or_else(|| security::select_target(status, Some(incoming), &self.security()));
        self.recover(target).await
    }

    async fn recover(&self, target: Option<security::RouteTarget>) -> Recovery {
        security::recover(
            target,
            self.inner.router.as_deref(),
            self.inner.navigator.as_deref(),
        )
        .await
    }

    // ── Locks ────────────────────────────────────────────────────

    fn cache(&self) -> std::sync::RwLockReadGuard<'_, DefinitionCache> {
        self.inner.definitions.read().unwrap_or_else(|e| e.into_inner())
    }

    fn cache_mut(&self) -> std::sync::RwLockWriteGuard<'_, DefinitionCache> {
        self.inner.definitions.write().unwrap_or_else(|e| e.into_inner())
    }

    fn stores(&self) -> std::sync::MutexGuard<'_, HashMap<String, Entity>> {
        self.inner.stores.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn batch_slot(&self) -> std::sync::MutexGuard<'_, Option<Batch>> {
        self.inner.batch.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn keep_valid(name: &str, definition: &Definition) -> bool {
    match definition.validate(name) {
        Ok(()) => true,
        Err(e) => {
            warn!("Skipping definition: {}", e);
            false
        }
    }
}

impl fmt::Debug for Bridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bridge")
            .field("endpoint", &self.inner.config.endpoint)
            .field("stores", &self.stores().len())
            .field("definitions", &self.cache().len())
            .finish()
    }
}
