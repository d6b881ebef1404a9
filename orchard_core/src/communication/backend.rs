//! Capability traits for the registry/bus backend
//!
//! This module defines the abstraction layer that lets the runtime talk to
//! different backends (the TCP router, the in-process broker) through one
//! API. Values are opaque byte blobs; see [`super::codec`] for the encoding.

use crate::error::OrchardResult;
use async_trait::async_trait;
use std::fmt::Debug;
use std::sync::Arc;

/// One message delivered on a subscribed channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub channel: String,
    pub payload: Vec<u8>,
}

/// Key/value registry plus channel based publish/subscribe
#[async_trait]
pub trait Backend: Send + Sync + Debug {
    /// Round-trip check of the connection
    async fn ping(&self) -> OrchardResult<()>;

    async fn get(&self, key: &str) -> OrchardResult<Option<Vec<u8>>>;

    /// Atomically replace the value stored under `key`
    async fn set(&self, key: &str, value: Vec<u8>) -> OrchardResult<()>;

    /// Publish on a channel; returns the number of receivers
    async fn publish(&self, channel: &str, payload: Vec<u8>) -> OrchardResult<u64>;

    /// Subscribe to every channel in one batched operation
    ///
    /// Either all channels are subscribed or the call fails.
    async fn subscribe(&self, channels: &[String]) -> OrchardResult<Box<dyn Subscription>>;

    /// Subscriber count per channel, in request order
    async fn numsub(&self, channels: &[String]) -> OrchardResult<Vec<(String, u64)>>;

    /// Channels that currently have at least one subscriber
    async fn channels(&self) -> OrchardResult<Vec<String>>;

    /// Release the connection
    async fn close(&self) -> OrchardResult<()>;
}

/// Receiving end of a batched subscription
#[async_trait]
pub trait Subscription: Send + Debug {
    /// Non-blocking poll for the next message
    ///
    /// `Ok(None)` when nothing is pending, `Err(Transport)` once the
    /// underlying connection is gone.
    async fn try_next(&mut self) -> OrchardResult<Option<Message>>;
}

/// Produces fresh backend handles; used for initial acquisition and renewal
#[async_trait]
pub trait Connector: Send + Sync + Debug {
    async fn connect(&self) -> OrchardResult<Arc<dyn Backend>>;
}

/// True if any of the given topics has at least one subscriber
pub async fn anyone_listening(backend: &dyn Backend, topics: &[String]) -> OrchardResult<bool> {
    let counts = backend.numsub(topics).await?;
    Ok(counts.iter().any(|(_, count)| *count > 0))
}
