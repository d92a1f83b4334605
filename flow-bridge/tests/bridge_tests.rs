mod common;

use common::{counter_transport, fixed_transport, obj, RecordingRegistrar};
use flow_bridge::callbacks::{invoke_callback, CallbackTarget};
use flow_bridge::transport::mock::MockTransport;
use flow_bridge::{
    Bridge, BridgeConfig, BridgeError, Callback, CallbackTable, ComponentRequest, FlowOptions,
    RouteTarget, SecurityState, DEFAULT_BATCH_DELAY_MS, DEFAULT_ENDPOINT, DEFAULT_REQUEST_TIMEOUT_MS,
};
use flow_model::{Definition, Definitions, EntityKind, PropertySpec};
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn catalog_transport() -> Arc<MockTransport> {
    fixed_transport(
        200,
        json!({
            "components": {
                "CounterWidget": {"stateId": "Counter", "props": ["label"], "template": "<b/>"},
                "UserList": {"name": "users-list", "stateId": "Users"}
            }
        }),
    )
}

fn registering_bridge(transport: &Arc<MockTransport>, registrar: &Arc<RecordingRegistrar>) -> Bridge {
    Bridge::builder(transport.clone())
        .registrar(registrar.clone())
        .build()
}

// ── Components ───────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn wildcard_request_loads_every_component() {
    let transport = catalog_transport();
    let registrar = Arc::new(RecordingRegistrar::default());
    let bridge = registering_bridge(&transport, &registrar);

    let loaded = bridge.use_components(ComponentRequest::all()).await.unwrap();

    assert_eq!(loaded.keys().collect::<Vec<_>>(), vec!["CounterWidget", "UserList"]);
    assert_eq!(loaded["CounterWidget"].state_id.as_deref(), Some("Counter"));
    assert_eq!(loaded["CounterWidget"].extra["template"], json!("<b/>"));
    assert_eq!(registrar.names(), vec!["CounterWidget", "users-list"]);

    let request = transport.last_request().unwrap();
    assert_eq!(request.components, ComponentRequest::all());
    assert_eq!(transport.endpoints(), vec![DEFAULT_ENDPOINT]);
}

#[tokio::test(start_paused = true)]
async fn named_request_returns_only_the_named_components() {
    let transport = catalog_transport();
    let registrar = Arc::new(RecordingRegistrar::default());
    let bridge = registering_bridge(&transport, &registrar);

    let loaded = bridge
        .use_components(ComponentRequest::names(["UserList"]))
        .await
        .unwrap();

    assert_eq!(loaded.keys().collect::<Vec<_>>(), vec!["UserList"]);
    assert_eq!(
        transport.last_request().unwrap().components,
        ComponentRequest::names(["UserList"])
    );
}

#[tokio::test(start_paused = true)]
async fn components_are_registered_once() {
    let transport = catalog_transport();
    let registrar = Arc::new(RecordingRegistrar::default());
    let bridge = registering_bridge(&transport, &registrar);

    bridge.use_components(ComponentRequest::all()).await.unwrap();
    bridge.use_components(ComponentRequest::all()).await.unwrap();

    assert_eq!(transport.request_count(), 2);
    assert_eq!(registrar.names(), vec!["CounterWidget", "users-list"]);
}

#[tokio::test(start_paused = true)]
async fn component_request_takes_over_the_open_batch() {
    let transport = Arc::new(MockTransport::new(|request| {
        let mut reply = common::counter_reply(request);
        reply["components"] = json!({"CounterWidget": {"stateId": "Counter"}});
        Ok(flow_bridge::TransportResponse::ok(reply))
    }));
    let bridge = Bridge::new(BridgeConfig::default(), transport.clone());
    let counter = bridge.use_state("Counter", Some(obj(json!({"count": 4}))), None);
    let refreshed = bridge.refresh(&counter, true, false).unwrap();

    let loaded = bridge
        .use_components(ComponentRequest::names(["CounterWidget"]))
        .await
        .unwrap();

    assert!(loaded.contains_key("CounterWidget"));
    assert!(refreshed.await.is_ok());
    assert_eq!(transport.request_count(), 1);
    assert!(!bridge.has_open_batch());
}

#[tokio::test(start_paused = true)]
async fn failed_component_request_is_an_error() {
    let transport = Arc::new(MockTransport::failing(BridgeError::Network("offline".into())));
    let bridge = Bridge::new(BridgeConfig::default(), transport.clone());

    let err = bridge.use_components(ComponentRequest::all()).await.unwrap_err();

    assert_eq!(err, BridgeError::Network("offline".into()));
}

#[tokio::test(start_paused = true)]
async fn components_delivered_as_definitions_are_registered() {
    let transport = fixed_transport(
        200,
        json!({
            "definitions": {"components": {"Badge": {"stateId": "Counter"}}},
            "states": {"Counter1": {"state": {"count": 1}}}
        }),
    );
    let registrar = Arc::new(RecordingRegistrar::default());
    let bridge = registering_bridge(&transport, &registrar);
    let counter = bridge.use_state("Counter", None, None);

    counter.refresh().await.unwrap();

    assert_eq!(registrar.names(), vec!["Badge"]);
    assert!(bridge.definitions().components.contains_key("Badge"));
}

// ── Definitions ──────────────────────────────────────────────────

#[tokio::test]
async fn loading_definitions_is_additive() {
    let transport = counter_transport();
    let bridge = Bridge::new(BridgeConfig::default(), transport);

    let first = Definitions::default().with_state(
        "Counter",
        Definition::new().with_property("count", PropertySpec::bidirectional()),
    );
    let report = bridge.load_definitions(first).unwrap();
    assert_eq!(report.states, vec!["Counter"]);

    let second = Definitions::default()
        .with_state("Counter", Definition::new())
        .with_store("Session", Definition::new());
    let report = bridge.load_definitions(second).unwrap();
    assert!(report.states.is_empty());
    assert_eq!(report.stores, vec!["Session"]);

    let counter = bridge.definition(EntityKind::State, "Counter").unwrap();
    assert!(counter.properties.contains_key("count"));
    assert!(bridge.definition(EntityKind::Store, "Session").is_some());
    assert!(bridge.definition(EntityKind::State, "Session").is_none());
}

#[tokio::test]
async fn invalid_definitions_are_refused() {
    let transport = counter_transport();
    let bridge = Bridge::new(BridgeConfig::default(), transport);
    let dangling = PropertySpec {
        property: Some("total".into()),
        ..PropertySpec::default()
    };

    let err = bridge
        .load_definitions(
            Definitions::default()
                .with_state("Basket", Definition::new().with_property("total", dangling)),
        )
        .unwrap_err();

    assert!(matches!(err, BridgeError::Definition(_)));
    assert!(bridge.definition(EntityKind::State, "Basket").is_none());
}

#[tokio::test(start_paused = true)]
async fn invalid_server_definitions_are_skipped() {
    let transport = fixed_transport(
        200,
        json!({
            "definitions": {
                "states": {
                    "Broken": {"properties": {"x": {"property": "y"}}},
                    "Fine": {"properties": {"x": {"direction": "Booth"}}}
                }
            }
        }),
    );
    let bridge = Bridge::new(BridgeConfig::default(), transport.clone());
    let counter = bridge.use_state("Counter", None, None);

    counter.refresh().await.unwrap();

    assert!(bridge.definition(EntityKind::State, "Broken").is_none());
    assert!(bridge.definition(EntityKind::State, "Fine").is_some());
}

// ── Install ──────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn install_preloads_definitions_and_autoloads_components() {
    let transport = catalog_transport();
    let registrar = Arc::new(RecordingRegistrar::default());
    let options: FlowOptions = serde_json::from_value(json!({
        "endpoint": "/api/flow",
        "batchDelayMs": 25,
        "security": {"loginRoute": "/login"},
        "definitions": {"stores": {"Session": {"state": {"user": null}}}},
        "autoloadComponents": {"*": {}}
    }))
    .unwrap();

    let bridge = Bridge::builder(transport.clone())
        .registrar(registrar.clone())
        .install(options)
        .await
        .unwrap();

    assert_eq!(bridge.endpoint(), "/api/flow");
    assert_eq!(bridge.config().batch_delay(), Duration::from_millis(25));
    assert_eq!(bridge.security().login_route, Some(RouteTarget::from("/login")));
    assert!(bridge.definition(EntityKind::Store, "Session").is_some());
    assert_eq!(registrar.names(), vec!["CounterWidget", "users-list"]);
    assert_eq!(transport.endpoints(), vec!["/api/flow"]);
}

#[tokio::test]
async fn install_without_autoload_sends_nothing() {
    let transport = counter_transport();

    let bridge = Bridge::builder(transport.clone())
        .install(FlowOptions::default())
        .await
        .unwrap();

    assert_eq!(bridge.endpoint(), DEFAULT_ENDPOINT);
    assert_eq!(transport.request_count(), 0);
}

// ── Configuration ────────────────────────────────────────────────

#[test]
fn config_defaults() {
    let config = BridgeConfig::default();
    assert_eq!(config.endpoint, DEFAULT_ENDPOINT);
    assert_eq!(config.base_url, None);
    assert_eq!(config.batch_delay(), Duration::from_millis(DEFAULT_BATCH_DELAY_MS));
    assert_eq!(
        config.request_timeout(),
        Duration::from_millis(DEFAULT_REQUEST_TIMEOUT_MS)
    );
    assert_eq!(config.security, SecurityState::default());
}

#[test]
fn config_fills_missing_fields_with_defaults() {
    let config: BridgeConfig = serde_json::from_value(json!({
        "baseUrl": "http://localhost:8000"
    }))
    .unwrap();

    assert_eq!(
        config,
        BridgeConfig::default().with_base_url("http://localhost:8000")
    );
}

#[test]
fn config_builders() {
    let config = BridgeConfig::default()
        .with_endpoint("/flow")
        .with_batch_delay(Duration::from_millis(40));

    assert_eq!(config.endpoint, "/flow");
    assert_eq!(config.batch_delay_ms, 40);
}

// ── Callbacks ────────────────────────────────────────────────────

#[test]
fn callbacks_walk_dotted_paths() {
    let seen: Arc<Mutex<Vec<Value>>> = Arc::default();
    let sink = Arc::clone(&seen);
    let dialog = CallbackTable::new().with_method("open", move |args: &[Value]| {
        sink.lock().unwrap().extend(args.iter().cloned());
    });
    let root: Arc<dyn CallbackTarget> = Arc::new(
        CallbackTable::new().with_member(
            "ui",
            Arc::new(CallbackTable::new().with_member("dialog", Arc::new(dialog))),
        ),
    );

    assert!(invoke_callback(
        &Callback::new("ui.dialog.open", vec![json!("confirm")]),
        Arc::clone(&root)
    ));
    assert!(!invoke_callback(&Callback::new("ui.missing.open", vec![]), Arc::clone(&root)));
    assert!(!invoke_callback(&Callback::new("ui.dialog.close", vec![]), Arc::clone(&root)));
    assert!(!invoke_callback(&Callback::new("", vec![]), root));

    assert_eq!(*seen.lock().unwrap(), vec![json!("confirm")]);
}

#[test]
fn callbacks_parse_without_args() {
    let callback: Callback = serde_json::from_value(json!({"fn": "refresh"})).unwrap();
    assert_eq!(callback, Callback::new("refresh", vec![]));
}
