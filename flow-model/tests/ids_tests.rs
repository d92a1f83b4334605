use flow_model::{EntityKind, InstanceId, InstanceIdGenerator};
use std::collections::HashMap;
use std::str::FromStr;

// ── InstanceId ───────────────────────────────────────────────────

#[test]
fn store_instance_id_is_its_name() {
    assert_eq!(InstanceId::for_store("Cart").as_str(), "Cart");
}

#[test]
fn instance_id_display_and_parse() {
    let id = InstanceId::new("Counter3");
    let parsed = InstanceId::from_str(&id.to_string()).unwrap();
    assert_eq!(id, parsed);
}

#[test]
fn instance_id_serializes_transparently() {
    let id = InstanceId::from("Counter1");
    assert_eq!(serde_json::to_string(&id).unwrap(), "\"Counter1\"");
}

#[test]
fn instance_id_map_lookup_by_str() {
    let mut map = HashMap::new();
    map.insert(InstanceId::from("Cart"), 1);
    assert_eq!(map.get("Cart"), Some(&1));
}

// ── InstanceIdGenerator ──────────────────────────────────────────

#[test]
fn generator_is_sequential_from_one() {
    let ids = InstanceIdGenerator::new();
    assert_eq!(ids.next_id("Counter").as_str(), "Counter1");
    assert_eq!(ids.next_id("Counter").as_str(), "Counter2");
    assert_eq!(ids.next_id("Todo").as_str(), "Todo3");
    assert_eq!(ids.issued(), 3);
}

#[test]
fn generator_ids_are_distinct() {
    let ids = InstanceIdGenerator::new();
    let a = ids.next_id("Counter");
    let b = ids.next_id("Counter");
    assert_ne!(a, b);
}

// ── EntityKind ───────────────────────────────────────────────────

#[test]
fn entity_kind_is_store() {
    assert!(EntityKind::Store.is_store());
    assert!(!EntityKind::State.is_store());
    assert_eq!(EntityKind::State.to_string(), "state");
}
