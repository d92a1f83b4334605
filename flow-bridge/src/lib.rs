//! Client-side coalescing bridge for Flow entities.
//!
//! Keeps live, mutable entities on the client whose authoritative behavior
//! runs on a remote handler, while sending at most one request per
//! coalescing window.
//!
//! # Architecture
//!
//! Entities are either **States** (many instances per name, sequential ids
//! such as `Counter1`) or **Stores** (one live instance per name per
//! session). Their schema comes from server-delivered definitions, merged
//! additively into a per-session cache.
//!
//! ## Components
//!
//! - **Protocol**: the JSON exchange format
//! - **Transport**: one POST per batch (reqwest, or a mock for tests)
//! - **Entity**: live property bag with store links and observers
//! - **Batch**: one coalescing window; serializes and settles its promises
//! - **Bridge**: session coordinator and entity factory
//! - **Security**: access-denial handling and redirect recovery
//!
//! ## Exchange
//!
//! 1. **Record**: refreshes and action calls join the open batch
//! 2. **Flush**: after the window (or immediately) the batch detaches
//! 3. **Prune**: entities with a known definition send only server-facing properties
//! 4. **Exchange**: one POST carrying states, stores, actions and component requests
//! 5. **Reconcile**: definitions, security, entity state and callbacks are applied
//!    in place, then every promise of the batch settles
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use flow_bridge::{Bridge, BridgeConfig, HttpTransport};
//! use serde_json::json;
//!
//! # async fn run() -> flow_bridge::BridgeResult<()> {
//! let config = BridgeConfig::default().with_base_url("http://localhost:8000");
//! let transport = Arc::new(HttpTransport::from_config(&config)?);
//! let bridge = Bridge::new(config, transport);
//!
//! let counter = bridge.use_state("Counter", None, None);
//! let (first, second) = tokio::join!(
//!     counter.invoke("increment", vec![]),
//!     counter.invoke("increment", vec![]),
//! );
//! first?;
//! second?;
//! assert_eq!(counter.get("count"), Some(json!(2)));
//! # Ok(())
//! # }
//! ```

mod batch;
mod bridge;
pub mod callbacks;
mod config;
mod entity;
mod error;
pub mod protocol;
mod reconcile;
pub mod security;
pub mod storage;
pub mod transport;

pub use batch::{Batch, BatchId, Pending, Resolved, ResultSelector};
pub use bridge::{Bridge, BridgeBuilder};
pub use callbacks::{invoke_callback, Callback, CallbackFn, CallbackTable, CallbackTarget};
pub use config::{
    BridgeConfig, ComponentRegistrar, FlowOptions, DEFAULT_BATCH_DELAY_MS,
    DEFAULT_REQUEST_TIMEOUT_MS,
};
pub use entity::{Entity, EntityCtx, Slot, StoreLink};
pub use error::{BridgeError, BridgeResult};
pub use protocol::{
    ActionCall, ActionReply, ComponentRequest, EntityPayload, EntityReply, ErrorPayload,
    ExchangeRequest, ExchangeResponse, ACCESS_DENIED_MARKER, CONTENT_TYPE, DEFAULT_ENDPOINT,
};
pub use reconcile::assign_state;
pub use security::{Navigator, Recovery, RouteTarget, Router, SecurityState};
pub use storage::{storage_key, MemoryStorage, StateStorage, STORAGE_KEY_PREFIX};
pub use transport::{HttpTransport, Transport, TransportResponse};
