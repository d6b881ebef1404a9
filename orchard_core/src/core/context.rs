//! Connection context: the live backend handle of one node identity
//!
//! Every runtime operation takes the context explicitly. Clones share the
//! same handle slot, so a renewal performed by the subscription loop is
//! visible to publishers holding a clone.

use crate::communication::backend::{Backend, Connector};
use crate::communication::reconnect::{ReconnectContext, ReconnectStrategy};
use crate::core::identity::NodeIdentity;
use crate::error::OrchardResult;
use parking_lot::RwLock;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Clone)]
pub struct ConnectionContext {
    identity: NodeIdentity,
    connector: Arc<dyn Connector>,
    strategy: ReconnectStrategy,
    /// At most one live handle; replaced wholesale on renewal
    handle: Arc<RwLock<Arc<dyn Backend>>>,
    renewals: Arc<AtomicU64>,
}

impl ConnectionContext {
    /// Acquire a connection for `identity`, retrying while the backend is
    /// unreachable
    pub async fn acquire(
        identity: NodeIdentity,
        connector: Arc<dyn Connector>,
        strategy: ReconnectStrategy,
    ) -> OrchardResult<Self> {
        let backend = connect_with_retry(connector.as_ref(), &strategy, &identity).await?;
        debug!(mesh = %identity.mesh, name = %identity.name, "Connection acquired");

        Ok(Self {
            identity,
            connector,
            strategy,
            handle: Arc::new(RwLock::new(backend)),
            renewals: Arc::new(AtomicU64::new(0)),
        })
    }

    pub fn identity(&self) -> &NodeIdentity {
        &self.identity
    }

    /// Current backend handle
    pub fn backend(&self) -> Arc<dyn Backend> {
        self.handle.read().clone()
    }

    /// Discard the current handle and acquire a fresh one for the same identity
    ///
    /// Only meant for use after a detected transport failure.
    pub async fn renew(&self) -> OrchardResult<()> {
        let fresh = connect_with_retry(self.connector.as_ref(), &self.strategy, &self.identity)
            .await?;
        let stale = std::mem::replace(&mut *self.handle.write(), fresh);
        if let Err(e) = stale.close().await {
            debug!(name = %self.identity.name, "Closing stale connection failed: {}", e);
        }

        let count = self.renewals.fetch_add(1, Ordering::Relaxed) + 1;
        info!(
            mesh = %self.identity.mesh,
            name = %self.identity.name,
            renewals = count,
            "Connection renewed"
        );
        Ok(())
    }

    /// Number of renewals performed on this context
    pub fn renewals(&self) -> u64 {
        self.renewals.load(Ordering::Relaxed)
    }

    /// Tear down the connection at node shutdown
    pub async fn close(&self) -> OrchardResult<()> {
        self.backend().close().await
    }
}

impl fmt::Debug for ConnectionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionContext")
            .field("identity", &self.identity)
            .field("connector", &self.connector)
            .field("renewals", &self.renewals())
            .finish_non_exhaustive()
    }
}

async fn connect_with_retry(
    connector: &dyn Connector,
    strategy: &ReconnectStrategy,
    identity: &NodeIdentity,
) -> OrchardResult<Arc<dyn Backend>> {
    let mut reconnect = ReconnectContext::new(strategy.clone());
    loop {
        match connector.connect().await {
            Ok(backend) => {
                if reconnect.attempt > 0 {
                    info!(attempts = reconnect.attempt, "Backend reachable again");
                }
                reconnect.mark_connected();
                return Ok(backend);
            }
            Err(e) if e.is_transport() && reconnect.should_retry() => {
                reconnect.begin_reconnect();
                if reconnect.attempt == 1 || reconnect.attempt % 100 == 0 {
                    warn!(
                        mesh = %identity.mesh,
                        name = %identity.name,
                        attempt = reconnect.attempt,
                        "Backend unreachable, retrying: {}",
                        e
                    );
                }
                reconnect.wait_backoff().await;
            }
            Err(e) => {
                reconnect.mark_failed();
                return Err(e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::communication::memory::MemoryBroker;
    use std::time::Duration;

    fn identity() -> NodeIdentity {
        NodeIdentity::new("mesh", "name", "node")
    }

    #[tokio::test]
    async fn test_renew_replaces_handle() {
        let broker = MemoryBroker::new();
        let ctx = ConnectionContext::acquire(
            identity(),
            Arc::new(broker.connector()),
            ReconnectStrategy::default(),
        )
        .await
        .unwrap();

        broker.sever();
        assert!(ctx.backend().ping().await.unwrap_err().is_transport());

        ctx.renew().await.unwrap();
        ctx.backend().ping().await.unwrap();
        assert_eq!(ctx.renewals(), 1);
        assert_eq!(broker.connects(), 2);
    }

    #[tokio::test]
    async fn test_clones_observe_renewal() {
        let broker = MemoryBroker::new();
        let ctx = ConnectionContext::acquire(
            identity(),
            Arc::new(broker.connector()),
            ReconnectStrategy::default(),
        )
        .await
        .unwrap();
        let clone = ctx.clone();

        broker.sever();
        ctx.renew().await.unwrap();
        clone.backend().set("k", b"v".to_vec()).await.unwrap();
    }

    #[tokio::test]
    async fn test_acquire_waits_for_unreachable_backend() {
        let broker = MemoryBroker::new();
        broker.set_reachable(false);

        let flip = broker.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            flip.set_reachable(true);
        });

        let ctx = ConnectionContext::acquire(
            identity(),
            Arc::new(broker.connector()),
            ReconnectStrategy::fixed(Duration::from_millis(5)),
        )
        .await
        .unwrap();
        ctx.backend().ping().await.unwrap();
    }

    #[tokio::test]
    async fn test_bounded_strategy_gives_up() {
        let broker = MemoryBroker::new();
        broker.set_reachable(false);

        let err = ConnectionContext::acquire(
            identity(),
            Arc::new(broker.connector()),
            ReconnectStrategy::testing(),
        )
        .await
        .unwrap_err();
        assert!(err.is_transport());
    }
}
