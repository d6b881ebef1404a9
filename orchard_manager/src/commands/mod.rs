//! Operator commands
//!
//! Each command opens what it needs from a [`Session`]: a registry handle
//! for mesh and parameter lookups, or one connection context per node.

pub mod lifecycle;
pub mod log;
pub mod params;
pub mod register;
pub mod show;

use orchard_core::communication::ReconnectStrategy;
use orchard_core::{
    Backend, ConnectionContext, Connector, HealthPolicy, LogFiles, NodeIdentity, OrchardConfig,
    OrchardResult, ProcessSupervisor, RouterConnector,
};
use std::sync::Arc;

/// Connection attempts before a command reports the router as unreachable
const CONNECT_ATTEMPTS: usize = 20;

/// Backend access and tunables shared by all commands
#[derive(Debug, Clone)]
pub struct Session {
    config: OrchardConfig,
    connector: Arc<dyn Connector>,
    strategy: ReconnectStrategy,
}

impl Session {
    /// Session against the router named in `config`
    pub fn open(config: OrchardConfig) -> Self {
        let connector: Arc<dyn Connector> = Arc::new(RouterConnector::new(config.router.addr()));
        Self::with_connector(config, connector)
    }

    pub fn with_connector(config: OrchardConfig, connector: Arc<dyn Connector>) -> Self {
        let strategy = ReconnectStrategy {
            max_retries: CONNECT_ATTEMPTS,
            ..config.reconnect_strategy()
        };
        Self {
            config,
            connector,
            strategy,
        }
    }

    pub fn config(&self) -> &OrchardConfig {
        &self.config
    }

    pub fn connector(&self) -> &Arc<dyn Connector> {
        &self.connector
    }

    pub fn strategy(&self) -> &ReconnectStrategy {
        &self.strategy
    }

    /// Plain registry handle, not bound to any node
    pub async fn backend(&self) -> OrchardResult<Arc<dyn Backend>> {
        let identity = NodeIdentity::unnamed("", "orchard");
        let ctx = self.context(identity).await?;
        Ok(ctx.backend())
    }

    pub async fn context(&self, identity: NodeIdentity) -> OrchardResult<ConnectionContext> {
        ConnectionContext::acquire(identity, self.connector.clone(), self.strategy.clone()).await
    }

    pub fn supervisor(&self) -> ProcessSupervisor {
        ProcessSupervisor::new(self.logs()).with_grace(self.config.grace())
    }

    pub fn logs(&self) -> LogFiles {
        LogFiles::new(self.config.log_dir())
    }

    pub fn health_policy(&self) -> HealthPolicy {
        HealthPolicy {
            stale_after: self.config.stale_after(),
        }
    }
}
