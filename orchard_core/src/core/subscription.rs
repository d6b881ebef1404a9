//! Subscription loop: one cooperative dispatch loop per node
//!
//! The loop busy-polls a batched subscription, yielding between polls, and
//! runs handlers strictly one after another. It is an explicit state machine:
//!
//! ```text
//! Polling ──message──> Dispatching ──done──> Polling
//!    │                      │
//!    └──transport error─────┴──> Reconnecting ──resubscribed──> Polling
//! ```
//!
//! Cancellation is observed at the `Polling` boundary; a handler running at
//! that moment gets a bounded grace period before it is abandoned.

use crate::communication::backend::{Message, Subscription};
use crate::communication::codec;
use crate::communication::reconnect::{ReconnectContext, ReconnectStrategy};
use crate::config::OrchardConfig;
use crate::core::context::ConnectionContext;
use crate::core::health::{HealthTracker, NodeActivity};
use crate::error::{OrchardError, OrchardResult};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Reaction to a message on one topic
#[async_trait]
pub trait Handler: Send + Sync {
    async fn call(&self, value: Value) -> OrchardResult<()>;
}

/// Adapter turning an async closure into a [`Handler`]
pub struct HandlerFn<F>(F);

#[async_trait]
impl<F, Fut> Handler for HandlerFn<F>
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = OrchardResult<()>> + Send + 'static,
{
    async fn call(&self, value: Value) -> OrchardResult<()> {
        (self.0)(value).await
    }
}

pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn Handler>
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = OrchardResult<()>> + Send + 'static,
{
    Arc::new(HandlerFn(f))
}

/// Topic → handler map
#[derive(Clone, Default)]
pub struct TopicHandlers(BTreeMap<String, Arc<dyn Handler>>);

impl TopicHandlers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Single-entry map
    pub fn single(topic: impl Into<String>, handler: Arc<dyn Handler>) -> Self {
        let mut handlers = Self::new();
        handlers.insert(topic, handler);
        handlers
    }

    /// Returns the handler previously registered for `topic`
    pub fn insert(
        &mut self,
        topic: impl Into<String>,
        handler: Arc<dyn Handler>,
    ) -> Option<Arc<dyn Handler>> {
        self.0.insert(topic.into(), handler)
    }

    pub fn with(mut self, topic: impl Into<String>, handler: Arc<dyn Handler>) -> Self {
        self.insert(topic, handler);
        self
    }

    /// Merge another map in; entries of `other` win on conflict
    pub fn merge(&mut self, other: TopicHandlers) {
        self.0.extend(other.0);
    }

    pub fn get(&self, topic: &str) -> Option<&Arc<dyn Handler>> {
        self.0.get(topic)
    }

    pub fn topics(&self) -> Vec<String> {
        self.0.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for TopicHandlers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.0.keys()).finish()
    }
}

impl Extend<(String, Arc<dyn Handler>)> for TopicHandlers {
    fn extend<I: IntoIterator<Item = (String, Arc<dyn Handler>)>>(&mut self, iter: I) {
        self.0.extend(iter);
    }
}

impl FromIterator<(String, Arc<dyn Handler>)> for TopicHandlers {
    fn from_iter<I: IntoIterator<Item = (String, Arc<dyn Handler>)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopConfig {
    /// Pause between polls; zero only yields to the scheduler
    pub poll_interval: Duration,
    /// Bounded wait for an in-flight handler once cancelled
    pub cancel_grace: Duration,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::ZERO,
            cancel_grace: Duration::from_secs(1),
        }
    }
}

impl From<&OrchardConfig> for LoopConfig {
    fn from(config: &OrchardConfig) -> Self {
        Self {
            poll_interval: config.poll_interval(),
            cancel_grace: config.cancel_grace(),
        }
    }
}

/// Counters of one loop run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopStats {
    pub dispatched: u64,
    /// Messages dropped because the payload did not decode
    pub skipped: u64,
    pub reconnects: u64,
}

enum LoopState {
    Polling,
    Dispatching(Message),
    Reconnecting,
}

/// Outcome of one dispatch
enum Dispatch {
    Handled,
    Skipped,
    Abandoned,
}

#[derive(Debug)]
pub struct SubscriptionLoop {
    handlers: TopicHandlers,
    config: LoopConfig,
}

impl SubscriptionLoop {
    pub fn new(handlers: TopicHandlers) -> Self {
        Self::with_config(handlers, LoopConfig::default())
    }

    pub fn with_config(handlers: TopicHandlers, config: LoopConfig) -> Self {
        Self { handlers, config }
    }

    pub fn topics(&self) -> Vec<String> {
        self.handlers.topics()
    }

    /// Run until `cancel` fires or a handler fails with a non-transport error
    ///
    /// Fails without entering the loop if the initial batched subscribe fails.
    pub async fn run(
        &self,
        ctx: &ConnectionContext,
        tracker: &HealthTracker,
        cancel: &CancellationToken,
    ) -> OrchardResult<LoopStats> {
        let topics = self.handlers.topics();
        let mut subscription = ctx.backend().subscribe(&topics).await?;
        info!(
            mesh = %ctx.identity().mesh,
            name = %ctx.identity().name,
            topics = topics.len(),
            "Subscription loop started"
        );

        let mut stats = LoopStats::default();
        let mut reconnect = ReconnectContext::new(ReconnectStrategy::default());
        let mut state = match tracker.update(ctx, NodeActivity::Active).await {
            Ok(()) => LoopState::Polling,
            Err(e) if e.is_transport() => LoopState::Reconnecting,
            Err(e) => return Err(e),
        };

        loop {
            state = match state {
                LoopState::Polling => {
                    if cancel.is_cancelled() {
                        debug!(?stats, "Subscription loop cancelled");
                        return Ok(stats);
                    }
                    self.pause().await;
                    match subscription.try_next().await {
                        Ok(Some(message)) => LoopState::Dispatching(message),
                        Ok(None) => LoopState::Polling,
                        Err(e) if e.is_transport() => {
                            warn!("Lost subscription, reconnecting: {}", e);
                            LoopState::Reconnecting
                        }
                        Err(e) => return Err(e),
                    }
                }
                LoopState::Dispatching(message) => {
                    match self.dispatch(ctx, tracker, cancel, message).await {
                        Ok(Dispatch::Handled) => {
                            stats.dispatched += 1;
                            LoopState::Polling
                        }
                        Ok(Dispatch::Skipped) => {
                            stats.skipped += 1;
                            LoopState::Polling
                        }
                        Ok(Dispatch::Abandoned) => LoopState::Polling,
                        Err(e) if e.is_transport() => {
                            warn!("Transport failed during dispatch, reconnecting: {}", e);
                            LoopState::Reconnecting
                        }
                        Err(e) => return Err(e),
                    }
                }
                LoopState::Reconnecting => {
                    let resubscribed = tokio::select! {
                        _ = cancel.cancelled() => return Ok(stats),
                        result = Self::resubscribe(ctx, &topics) => result,
                    };
                    match resubscribe_outcome(resubscribed, &mut reconnect)? {
                        Some(fresh) => {
                            subscription = fresh;
                            stats.reconnects += 1;
                            LoopState::Polling
                        }
                        None => {
                            reconnect.wait_backoff().await;
                            LoopState::Reconnecting
                        }
                    }
                }
            };
        }
    }

    async fn pause(&self) {
        if self.config.poll_interval.is_zero() {
            tokio::task::yield_now().await;
        } else {
            tokio::time::sleep(self.config.poll_interval).await;
        }
    }

    async fn resubscribe(
        ctx: &ConnectionContext,
        topics: &[String],
    ) -> OrchardResult<Box<dyn Subscription>> {
        ctx.renew().await?;
        ctx.backend().subscribe(topics).await
    }

    async fn dispatch(
        &self,
        ctx: &ConnectionContext,
        tracker: &HealthTracker,
        cancel: &CancellationToken,
        message: Message,
    ) -> OrchardResult<Dispatch> {
        let topic = message.channel;
        let Some(handler) = self.handlers.get(&topic) else {
            debug!(%topic, "No handler for topic");
            return Ok(Dispatch::Skipped);
        };

        let value = match codec::decode_value(&message.payload) {
            Ok(value) => value,
            Err(e) => {
                warn!(%topic, "Skipping undecodable payload: {}", e);
                return Ok(Dispatch::Skipped);
            }
        };

        let call = handler.call(value);
        tokio::pin!(call);

        let result = tokio::select! {
            biased;
            result = &mut call => result,
            _ = cancel.cancelled() => {
                match tokio::time::timeout(self.config.cancel_grace, &mut call).await {
                    Ok(result) => result,
                    Err(_) => {
                        warn!(%topic, "Abandoning handler after cancellation");
                        return Ok(Dispatch::Abandoned);
                    }
                }
            }
        };

        match result {
            Ok(()) => {}
            Err(e) if e.is_transport() => return Err(e),
            Err(e @ OrchardError::Handler { .. }) => return Err(e),
            Err(e) => return Err(OrchardError::handler(topic, e.to_string())),
        }

        tracker.update(ctx, NodeActivity::Active).await?;
        Ok(Dispatch::Handled)
    }
}

fn resubscribe_outcome(
    result: OrchardResult<Box<dyn Subscription>>,
    reconnect: &mut ReconnectContext,
) -> OrchardResult<Option<Box<dyn Subscription>>> {
    match result {
        Ok(subscription) => {
            reconnect.mark_connected();
            Ok(Some(subscription))
        }
        Err(e) if e.is_transport() => {
            reconnect.begin_reconnect();
            warn!(attempt = reconnect.attempt, "Resubscribe failed: {}", e);
            Ok(None)
        }
        Err(e) => Err(e),
    }
}
