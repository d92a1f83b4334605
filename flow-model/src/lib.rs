//! Definition model for Flow entities.
//!
//! Defines the schema types that the client bridge and the exchange endpoint
//! agree on:
//! - [`InstanceId`] / [`EntityKind`]: how live entities are addressed on the wire
//! - [`Definition`]: an entity kind's properties (direction, store binding),
//!   actions and lifecycle flags
//! - [`DefinitionCache`]: the additive, never-evicting per-session cache of
//!   definitions delivered by the server
//! - [`ComponentDefinition`]: opaque component payloads plus props merging
//!
//! Definitions arrive as JSON from a PHP backend, so map-shaped fields accept
//! an empty JSON list (`[]`) as an empty map.

mod cache;
mod component;
mod definition;
mod ids;
pub mod lenient;

pub use cache::{DefinitionCache, Definitions, MergeReport};
pub use component::{merge_component_props, ComponentDefinition};
pub use definition::{ActionSpec, Definition, Direction, NativeFn, PropertySpec, StoreBinding};
pub use ids::{EntityKind, InstanceId, InstanceIdGenerator};

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, ModelError>;

/// Errors that can occur while handling definitions.
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid definition for `{name}`: {reason}")]
    InvalidDefinition { name: String, reason: String },
}
