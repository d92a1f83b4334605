#![allow(dead_code)]

use flow_bridge::transport::mock::MockTransport;
use flow_bridge::{Bridge, BridgeConfig, ComponentRegistrar, ExchangeRequest, TransportResponse};
use flow_model::ComponentDefinition;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use tracing_subscriber::EnvFilter;

pub fn obj(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        other => panic!("expected an object, got {other}"),
    }
}

/// Routes bridge logs to the test harness. Safe to call from every test.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn bridge(transport: &Arc<MockTransport>) -> Bridge {
    init_tracing();
    Bridge::new(BridgeConfig::default(), transport.clone())
}

/// Server-side counter semantics: every state's `count` is taken from the
/// request, actions run in order, each returns the new count.
pub fn counter_reply(request: &ExchangeRequest) -> Value {
    let mut counts: BTreeMap<String, i64> = request
        .states
        .iter()
        .map(|(id, payload)| {
            let count = payload.state.get("count").and_then(Value::as_i64).unwrap_or(0);
            (id.to_string(), count)
        })
        .collect();

    let mut actions = Map::new();
    for (call_id, call) in request.actions.iter().enumerate() {
        let count = counts.entry(call.instance_id.to_string()).or_insert(0);
        match call.action.as_str() {
            "increment" => *count += 1,
            "decrement" => *count -= 1,
            "reset" => *count = 0,
            _ => {}
        }
        actions.insert(call_id.to_string(), json!({"return": *count}));
    }

    let states: Map<String, Value> = counts
        .into_iter()
        .map(|(id, count)| (id, json!({"state": {"count": count}})))
        .collect();
    json!({"states": states, "actions": actions})
}

pub fn counter_transport() -> Arc<MockTransport> {
    Arc::new(MockTransport::new(|request| {
        Ok(TransportResponse::ok(counter_reply(request)))
    }))
}

/// Replies with every entity exactly as it was sent.
pub fn echo_transport() -> Arc<MockTransport> {
    Arc::new(MockTransport::new(|request| {
        let entries = |map: &BTreeMap<flow_model::InstanceId, flow_bridge::EntityPayload>| {
            map.iter()
                .map(|(id, payload)| (id.to_string(), json!({"state": payload.state})))
                .collect::<Map<String, Value>>()
        };
        Ok(TransportResponse::ok(json!({
            "states": entries(&request.states),
            "stores": entries(&request.stores),
        })))
    }))
}

/// Answers every request with a fixed status and body.
pub fn fixed_transport(status: u16, body: Value) -> Arc<MockTransport> {
    Arc::new(MockTransport::replying(status, body))
}

/// Records registered component names.
#[derive(Debug, Default)]
pub struct RecordingRegistrar {
    names: Mutex<Vec<String>>,
}

impl RecordingRegistrar {
    pub fn names(&self) -> Vec<String> {
        self.names.lock().unwrap().clone()
    }
}

impl ComponentRegistrar for RecordingRegistrar {
    fn register(&self, name: &str, _definition: &ComponentDefinition) {
        self.names.lock().unwrap().push(name.to_string());
    }
}
