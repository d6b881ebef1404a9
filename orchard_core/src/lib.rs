//! # ORCHARD Core
//!
//! The runtime every ORCHARD node links against. A *mesh* is a group of
//! independently started node processes that talk over a shared
//! publish/subscribe bus and key/value registry, served by the ORCHARD router.
//!
//! This crate provides:
//!
//! - **Connection context**: a renewable handle to the bus/registry per node identity
//! - **Process supervision**: spawn, self-registration, liveness and escalating stop
//! - **Health**: heartbeat snapshots and their classification (ACTIVE/WAITING/FAILED/SHUTDOWN)
//! - **Subscription loop**: sequential dispatch with transparent reconnection
//! - **Parameters**: shared or node-private values updatable over the bus
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use orchard_core::{handler_fn, node, OrchardResult, TopicHandlers};
//!
//! #[tokio::main]
//! async fn main() -> OrchardResult<()> {
//!     node::entrypoint(|node, cancel| async move {
//!         let handlers = TopicHandlers::single(
//!             "numbers",
//!             handler_fn(|value| async move {
//!                 println!("received {}", value);
//!                 Ok(())
//!             }),
//!         );
//!         node.subscribe(handlers, &cancel).await?;
//!         Ok(())
//!     })
//!     .await
//! }
//! ```

pub mod communication;
pub mod config;
pub mod core;
pub mod error;
pub mod keys;
pub mod node;
pub mod params;

// Re-export commonly used types for easy access
pub use crate::core::{
    handler_fn, ConnectionContext, Handler, HealthPolicy, HealthTracker, LogFiles, MeshDefinition,
    NodeActivity, NodeDescriptor, NodeIdentity, ProcessSupervisor, SubscriptionLoop,
    TopicHandlers,
};
pub use communication::{Backend, Connector, MemoryBroker, RouterConnector};
pub use config::OrchardConfig;
pub use error::{OrchardError, OrchardResult};
pub use node::{Node, NodeArgs};
pub use params::{ParamFilter, ParamScope, Parameter};
