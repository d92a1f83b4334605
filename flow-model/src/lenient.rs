//! Deserializers tolerant of PHP's JSON encoding.
//!
//! `json_encode([])` produces `[]` for an empty associative array, so every
//! map-shaped field on the wire may arrive as an empty list. `null` is read
//! as an empty map as well.

use serde::{de, Deserialize, Deserializer};
use std::collections::BTreeMap;

#[derive(Deserialize)]
#[serde(untagged)]
enum Shape<K: Ord, V> {
    Map(BTreeMap<K, V>),
    List(Vec<V>),
}

/// Deserializes a map, accepting `null` and `[]` as empty.
pub fn map<'de, D, K, V>(deserializer: D) -> Result<BTreeMap<K, V>, D::Error>
where
    D: Deserializer<'de>,
    K: Ord + Deserialize<'de>,
    V: Deserialize<'de>,
{
    match Option::<Shape<K, V>>::deserialize(deserializer)? {
        None => Ok(BTreeMap::new()),
        Some(Shape::Map(map)) => Ok(map),
        Some(Shape::List(list)) if list.is_empty() => Ok(BTreeMap::new()),
        Some(Shape::List(_)) => Err(de::Error::custom("expected a map, found a non-empty list")),
    }
}

/// Deserializes a JSON object, accepting `null` and `[]` as empty.
pub fn object<'de, D>(deserializer: D) -> Result<serde_json::Map<String, serde_json::Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(map::<D, String, serde_json::Value>(deserializer)?
        .into_iter()
        .collect())
}

/// Deserializes an index-keyed map, accepting a list whose positions are
/// the indexes.
pub fn indexed<'de, D, V>(deserializer: D) -> Result<BTreeMap<usize, V>, D::Error>
where
    D: Deserializer<'de>,
    V: Deserialize<'de>,
{
    // Keys stay strings here: integer keys do not survive untagged buffering.
    match Option::<Shape<String, V>>::deserialize(deserializer)? {
        None => Ok(BTreeMap::new()),
        Some(Shape::Map(map)) => map
            .into_iter()
            .map(|(key, value)| {
                key.parse::<usize>()
                    .map(|index| (index, value))
                    .map_err(|_| de::Error::custom(format!("invalid index key `{key}`")))
            })
            .collect(),
        Some(Shape::List(list)) => Ok(list.into_iter().enumerate().collect()),
    }
}
