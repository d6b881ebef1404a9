//! # Communication layer for ORCHARD
//!
//! - **backend**: capability traits for the registry/bus ([`Backend`], [`Subscription`], [`Connector`])
//! - **router**: TCP client for the central ORCHARD router
//! - **memory**: in-process broker for tests and single-process meshes
//! - **protocol**: length-prefixed bincode frames spoken with the router
//! - **codec**: self-describing payload encoding
//! - **reconnect**: retry policy for (re-)acquiring a connection

pub mod backend;
pub mod codec;
pub mod memory;
pub mod protocol;
pub mod reconnect;
pub mod router;

pub use backend::{anyone_listening, Backend, Connector, Message, Subscription};
pub use memory::{MemoryBroker, MemoryConnector};
pub use protocol::{Request, Response, DEFAULT_PORT};
pub use reconnect::{ConnectionHealth, ReconnectContext, ReconnectStrategy};
pub use router::{RouterBackend, RouterConnector};
