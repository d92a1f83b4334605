mod common;

use common::{bridge, counter_transport, echo_transport, obj};
use flow_bridge::{storage_key, BridgeError, MemoryStorage, StateStorage};
use flow_model::{ActionSpec, Definition, Definitions, EntityKind, InstanceId, PropertySpec};
use pretty_assertions::assert_eq;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::Duration;

fn counter_definitions(definition: Definition) -> Definitions {
    Definitions::default().with_state(
        "Counter",
        definition.with_property("count", PropertySpec::bidirectional()),
    )
}

fn stored(storage: &MemoryStorage, instance_id: &str) -> Option<Value> {
    storage
        .get_item(&storage_key(&InstanceId::new(instance_id)))
        .map(|raw| serde_json::from_str(&raw).unwrap())
}

async fn let_timers_fire() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}

// ── Factories ────────────────────────────────────────────────────

#[tokio::test]
async fn stores_are_session_singletons() {
    let transport = echo_transport();
    let bridge = bridge(&transport);

    let first = bridge.use_store("Session", Some(obj(json!({"user": "ada"}))), None);
    let second = bridge.use_store("Session", Some(obj(json!({"user": "bob"}))), None);

    assert!(flow_bridge::Entity::ptr_eq(&first, &second));
    assert_eq!(first.instance_id(), &InstanceId::new("Session"));
    assert_eq!(second.get("user"), Some(json!("ada")));
    assert!(first.is_store());
    assert_eq!(first.kind(), EntityKind::Store);
}

#[tokio::test]
async fn states_get_sequential_instance_ids() {
    let transport = echo_transport();
    let bridge = bridge(&transport);

    let a = bridge.use_state("Counter", None, None);
    let b = bridge.use_state("Counter", None, None);
    let c = bridge.use_state("Todo", None, None);

    assert_eq!(a.instance_id().as_str(), "Counter1");
    assert_eq!(b.instance_id().as_str(), "Counter2");
    assert_eq!(c.instance_id().as_str(), "Todo3");
    assert!(!a.is_store());
}

#[tokio::test]
async fn definition_state_is_merged_with_initial_values() {
    let transport = echo_transport();
    let bridge = bridge(&transport);
    bridge
        .load_definitions(counter_definitions(
            Definition::new()
                .with_property("step", PropertySpec::client_only())
                .with_initial("count", json!(0))
                .with_initial("step", json!(1)),
        ))
        .unwrap();

    let counter = bridge.use_state("Counter", Some(obj(json!({"step": 5}))), None);

    assert_eq!(counter.snapshot(), obj(json!({"count": 0, "step": 5})));
    assert_eq!(counter.keys(), vec!["count", "step"]);
}

#[tokio::test]
async fn entities_without_lifecycle_flags_send_nothing() {
    let transport = echo_transport();
    let bridge = bridge(&transport);

    bridge.use_state("Counter", None, None);

    assert!(!bridge.has_open_batch());
    assert!(!bridge.flush().await);
    assert_eq!(transport.request_count(), 0);
}

// ── Lifecycle flags ──────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn init_kinds_are_initialized_by_the_server() {
    let transport = counter_transport();
    let bridge = bridge(&transport);
    bridge
        .load_definitions(counter_definitions(Definition::new().with_init()))
        .unwrap();

    let counter = bridge.use_state("Counter", None, None);
    assert!(bridge.has_open_batch());
    let_timers_fire().await;

    let request = transport.last_request().unwrap();
    assert!(request.states[&InstanceId::new("Counter1")].is_new);
    assert_eq!(counter.get("count"), Some(json!(0)));
    assert!(!counter.is_new());
}

#[tokio::test(start_paused = true)]
async fn awake_kinds_refresh_once_on_creation() {
    let transport = counter_transport();
    let bridge = bridge(&transport);
    bridge
        .load_definitions(counter_definitions(Definition::new().with_awake()))
        .unwrap();

    bridge.use_state("Counter", Some(obj(json!({"count": 3}))), None);
    let_timers_fire().await;

    assert_eq!(transport.request_count(), 1);
    let request = transport.last_request().unwrap();
    assert!(!request.states[&InstanceId::new("Counter1")].is_new);
}

#[tokio::test(start_paused = true)]
async fn hydrated_init_kinds_are_not_reinitialized() {
    let transport = counter_transport();
    let bridge = bridge(&transport);
    bridge
        .load_definitions(counter_definitions(Definition::new().with_init()))
        .unwrap();
    let storage = Arc::new(MemoryStorage::new());
    storage.set_item(&storage_key(&InstanceId::new("Counter1")), r#"{"count":7}"#.into());

    let counter = bridge.use_state("Counter", None, Some(storage));
    let_timers_fire().await;

    assert_eq!(counter.get("count"), Some(json!(7)));
    assert_eq!(transport.request_count(), 0);
}

// ── Actions ──────────────────────────────────────────────────────

#[tokio::test]
async fn registered_native_actions_run_locally() {
    let transport = counter_transport();
    let bridge = bridge(&transport);
    bridge.register_action("Counter", "double", |state, _args| {
        let count = state.get("count").and_then(Value::as_i64).unwrap_or(0) * 2;
        state.insert("count".into(), json!(count));
        Ok(json!(count))
    });
    let counter = bridge.use_state("Counter", Some(obj(json!({"count": 4}))), None);

    let result = counter.call("double", vec![]).await.unwrap();

    assert_eq!(result, json!(8));
    assert_eq!(counter.get("count"), Some(json!(8)));
    assert_eq!(transport.request_count(), 0);
}

#[tokio::test]
async fn native_methods_from_definitions_receive_args() {
    let transport = counter_transport();
    let bridge = bridge(&transport);
    bridge
        .load_definitions(counter_definitions(Definition::new().with_method(
            "add",
            ActionSpec::native(|state: &mut Map<String, Value>, args: &[Value]| {
                let by = args.first().and_then(Value::as_i64).ok_or("missing amount")?;
                let count = state.get("count").and_then(Value::as_i64).unwrap_or(0) + by;
                state.insert("count".into(), json!(count));
                Ok(json!(count))
            }),
        )))
        .unwrap();
    let counter = bridge.use_state("Counter", Some(obj(json!({"count": 1}))), None);

    assert_eq!(counter.actions().collect::<Vec<_>>(), vec!["add"]);
    assert_eq!(counter.call("add", vec![json!(2)]).await.unwrap(), json!(3));

    let err = counter.call("add", vec![]).await.unwrap_err();
    assert_eq!(
        err,
        BridgeError::Action {
            action: "add".into(),
            reason: "missing amount".into(),
        }
    );
    assert_eq!(counter.get("count"), Some(json!(3)));
}

#[tokio::test]
async fn server_delivered_source_is_never_run() {
    let transport = counter_transport();
    let bridge = bridge(&transport);
    bridge
        .load_definitions(counter_definitions(Definition::new().with_method(
            "format",
            ActionSpec::Source {
                params: vec!["prefix".into()],
                body: "return prefix + this.count;".into(),
            },
        )))
        .unwrap();
    let counter = bridge.use_state("Counter", Some(obj(json!({"count": 1}))), None);

    let err = counter.call("format", vec![json!("#")]).await.unwrap_err();

    assert_eq!(err, BridgeError::RejectedAction("format".into()));
    assert_eq!(transport.request_count(), 0);
}

#[tokio::test]
async fn registered_body_overrides_delivered_source() {
    let transport = counter_transport();
    let bridge = bridge(&transport);
    bridge
        .load_definitions(counter_definitions(Definition::new().with_method(
            "format",
            ActionSpec::Source {
                params: vec![],
                body: "return '#' + this.count;".into(),
            },
        )))
        .unwrap();
    bridge.register_action("Counter", "format", |state, _args| {
        Ok(json!(format!("#{}", state["count"])))
    });
    let counter = bridge.use_state("Counter", Some(obj(json!({"count": 1}))), None);

    assert_eq!(counter.call("format", vec![]).await.unwrap(), json!("#1"));
}

#[tokio::test(start_paused = true)]
async fn unknown_methods_become_server_actions() {
    let transport = counter_transport();
    let bridge = bridge(&transport);
    let counter = bridge.use_state("Counter", Some(obj(json!({"count": 0}))), None);

    let result = counter.call("increment", vec![]).await.unwrap();

    assert_eq!(result, json!(1));
    assert_eq!(transport.request_count(), 1);
    assert_eq!(counter.get("count"), Some(json!(1)));
}

#[tokio::test]
async fn invoke_now_skips_the_coalescing_window() {
    let transport = counter_transport();
    let bridge = bridge(&transport);
    let counter = bridge.use_state("Counter", Some(obj(json!({"count": 0}))), None);

    let result = tokio::time::timeout(
        Duration::from_millis(5),
        counter.invoke_now("increment", vec![]),
    )
    .await
    .expect("flushed without waiting for the timer");

    assert_eq!(result.unwrap(), json!(1));
}

#[tokio::test]
async fn native_calls_write_through_store_links() {
    let transport = echo_transport();
    let bridge = bridge(&transport);
    bridge
        .load_definitions(
            Definitions::default()
                .with_state(
                    "Toolbar",
                    Definition::new().with_property("session", PropertySpec::bound_to("Session")),
                )
                .with_store("Session", Definition::new()),
        )
        .unwrap();
    bridge.register_action("Toolbar", "rename", |state, args| {
        state.insert("title".into(), args[0].clone());
        Ok(Value::Null)
    });
    let session = bridge.use_store("Session", Some(obj(json!({"user": "ada"}))), None);
    let toolbar = bridge.use_state("Toolbar", None, None);

    toolbar.call("rename", vec![json!("Home")]).await.unwrap();

    assert!(toolbar.is_linked("session"));
    assert_eq!(toolbar.get("title"), Some(json!("Home")));
    assert_eq!(session.get("user"), Some(json!("ada")));
}

// ── Storage ──────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn snapshot_in_storage_skips_the_round_trip() {
    let transport = counter_transport();
    let bridge = bridge(&transport);
    let storage = Arc::new(MemoryStorage::new());
    storage.set_item(&storage_key(&InstanceId::new("Counter1")), r#"{"count":5}"#.into());

    let counter = bridge.use_state("Counter", None, Some(storage.clone()));
    let_timers_fire().await;

    assert_eq!(counter.get("count"), Some(json!(5)));
    assert_eq!(transport.request_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn empty_storage_falls_back_to_a_refresh() {
    let transport = counter_transport();
    let bridge = bridge(&transport);
    let storage = Arc::new(MemoryStorage::new());

    let counter = bridge.use_state("Counter", None, Some(storage.clone()));
    let_timers_fire().await;

    assert_eq!(transport.request_count(), 1);
    assert_eq!(counter.get("count"), Some(json!(0)));
}

#[tokio::test(start_paused = true)]
async fn unreadable_snapshot_is_ignored() {
    let transport = counter_transport();
    let bridge = bridge(&transport);
    let storage = Arc::new(MemoryStorage::new());
    storage.set_item(&storage_key(&InstanceId::new("Counter1")), "{not json".into());

    bridge.use_state("Counter", None, Some(storage.clone()));
    let_timers_fire().await;

    assert_eq!(transport.request_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn action_results_are_persisted() {
    let transport = counter_transport();
    let bridge = bridge(&transport);
    let storage = Arc::new(MemoryStorage::new());
    storage.set_item(&storage_key(&InstanceId::new("Counter1")), r#"{"count":5}"#.into());
    let counter = bridge.use_state("Counter", None, Some(storage.clone()));

    counter.invoke("increment", vec![]).await.unwrap();

    assert_eq!(stored(&storage, "Counter1"), Some(json!({"count": 6})));
}

#[tokio::test(start_paused = true)]
async fn and_refresh_binds_storage_to_an_existing_entity() {
    let transport = counter_transport();
    let bridge = bridge(&transport);
    let counter = bridge.use_state("Counter", Some(obj(json!({"count": 2}))), None);
    let storage = Arc::new(MemoryStorage::new());

    counter.and_refresh(storage.clone()).await.unwrap();
    assert_eq!(transport.request_count(), 1);

    counter.invoke("increment", vec![]).await.unwrap();
    assert_eq!(stored(&storage, "Counter1"), Some(json!({"count": 3})));
}

#[test]
fn storage_keys_are_prefixed() {
    assert_eq!(storage_key(&InstanceId::new("Counter1")), "flow.storage.Counter1");

    let storage = MemoryStorage::new();
    assert!(storage.is_empty());
    storage.set_item("a", "1".into());
    storage.set_item("a", "2".into());
    assert_eq!(storage.len(), 1);
    assert_eq!(storage.get_item("a").as_deref(), Some("2"));
}

// ── Observation ──────────────────────────────────────────────────

#[tokio::test]
async fn observers_see_changes_only() {
    let transport = echo_transport();
    let bridge = bridge(&transport);
    let todo = bridge.use_state("Todo", Some(obj(json!({"done": false}))), None);
    let mut observer = todo.subscribe();

    assert!(!todo.set("done", json!(false)));
    assert!(!observer.has_changed().unwrap());

    assert!(todo.set("done", json!(true)));
    observer.changed().await.unwrap();
    assert_eq!(*observer.borrow_and_update(), todo.revision());
}

#[tokio::test]
async fn assign_notifies_once() {
    let transport = echo_transport();
    let bridge = bridge(&transport);
    let todo = bridge.use_state("Todo", None, None);
    let before = todo.revision();

    assert!(todo.assign(&obj(json!({"title": "a", "done": true}))));

    assert_eq!(todo.revision(), before + 1);
}

// ── Detached entities ────────────────────────────────────────────

#[tokio::test]
async fn entities_outlive_their_bridge_as_detached() {
    let transport = counter_transport();
    let bridge = bridge(&transport);
    let counter = bridge.use_state("Counter", Some(obj(json!({"count": 1}))), None);
    drop(bridge);

    assert_eq!(counter.refresh().await.unwrap_err(), BridgeError::Detached);
    assert_eq!(
        counter.invoke("increment", vec![]).await.unwrap_err(),
        BridgeError::Detached
    );
    assert_eq!(counter.get("count"), Some(json!(1)));
}
