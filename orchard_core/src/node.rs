//! Node entrypoint
//!
//! Every supervised node binary is started as `node mesh -n name [args...]`.
//! [`entrypoint`] parses that command line, connects to the router,
//! self-registers for process monitoring, runs the node body until it
//! finishes or the process is interrupted, and always leaves a SHUTDOWN
//! health record behind.
//!
//! ```rust,ignore
//! #[tokio::main]
//! async fn main() -> OrchardResult<()> {
//!     orchard_core::node::entrypoint(|node, cancel| async move {
//!         let handlers = TopicHandlers::single("image", handler_fn(on_image));
//!         node.subscribe(handlers, &cancel).await.map(|_| ())
//!     })
//!     .await
//! }
//! ```

use crate::communication::backend::{anyone_listening, Connector};
use crate::communication::codec;
use crate::communication::router::RouterConnector;
use crate::config::OrchardConfig;
use crate::core::context::ConnectionContext;
use crate::core::health::{HealthTracker, NodeActivity};
use crate::core::identity::NodeIdentity;
use crate::core::subscription::{Handler, LoopConfig, LoopStats, SubscriptionLoop, TopicHandlers};
use crate::core::supervisor::self_register;
use crate::error::{OrchardError, OrchardResult};
use crate::params::{self, ParamScope};
use clap::Parser;
use serde::Serialize;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Command line every node accepts
#[derive(Debug, Clone, PartialEq, Eq, Parser)]
pub struct NodeArgs {
    /// Mesh the node belongs to
    pub mesh: String,

    /// Instance name inside the mesh (defaults to the executable name)
    #[arg(short, long)]
    pub name: Option<String>,

    /// Arguments passed through to the node body
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub extra: Vec<String>,
}

impl NodeArgs {
    /// Identity of this process, named after its executable
    pub fn identity(&self) -> NodeIdentity {
        self.identity_for(&executable_name())
    }

    pub fn identity_for(&self, node: &str) -> NodeIdentity {
        let name = self.name.clone().unwrap_or_else(|| node.to_string());
        NodeIdentity::new(self.mesh.clone(), name, node)
    }
}

/// File name of the running executable
pub fn executable_name() -> String {
    std::env::args()
        .next()
        .as_deref()
        .and_then(|arg0| Path::new(arg0).file_name())
        .and_then(|name| name.to_str())
        .unwrap_or("node")
        .to_string()
}

/// Install a `fmt` subscriber honouring `RUST_LOG`, defaulting to `info`
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .try_init();
}

/// Handle of the running node, cheap to clone
#[derive(Debug, Clone)]
pub struct Node {
    ctx: ConnectionContext,
    tracker: Arc<HealthTracker>,
    loop_config: LoopConfig,
}

impl Node {
    pub async fn connect(
        identity: NodeIdentity,
        connector: Arc<dyn Connector>,
        config: &OrchardConfig,
    ) -> OrchardResult<Self> {
        let ctx = ConnectionContext::acquire(identity, connector, config.reconnect_strategy()).await?;
        Ok(Self {
            ctx,
            tracker: Arc::new(HealthTracker::new()),
            loop_config: LoopConfig::from(config),
        })
    }

    pub fn identity(&self) -> &NodeIdentity {
        self.ctx.identity()
    }

    pub fn context(&self) -> &ConnectionContext {
        &self.ctx
    }

    pub fn tracker(&self) -> &HealthTracker {
        &self.tracker
    }

    /// Refresh health to ACTIVE, then publish `value` on `topic`
    ///
    /// A transport failure renews the context and retries once.
    pub async fn publish<T: Serialize + ?Sized>(&self, topic: &str, value: &T) -> OrchardResult<u64> {
        let payload = codec::encode(value)?;
        self.tracker.update(&self.ctx, NodeActivity::Active).await?;
        match self.ctx.backend().publish(topic, payload.clone()).await {
            Err(e) if e.is_transport() => {
                warn!(%topic, "Publish failed, renewing connection: {}", e);
                self.ctx.renew().await?;
                self.ctx.backend().publish(topic, payload).await
            }
            result => result,
        }
    }

    /// Declare a parameter; merge the returned entry into the handlers passed to [`Node::subscribe`]
    pub async fn parameter<T: Serialize + ?Sized>(
        &self,
        name: &str,
        initial: &T,
        handler: Arc<dyn Handler>,
        scope: ParamScope,
    ) -> OrchardResult<TopicHandlers> {
        params::declare(&self.ctx, name, initial, handler, scope).await
    }

    /// Run the subscription loop over `handlers` until cancelled
    pub async fn subscribe(
        &self,
        handlers: TopicHandlers,
        cancel: &CancellationToken,
    ) -> OrchardResult<LoopStats> {
        SubscriptionLoop::with_config(handlers, self.loop_config)
            .run(&self.ctx, &self.tracker, cancel)
            .await
    }

    pub async fn anyone_listening(&self, topics: &[String]) -> OrchardResult<bool> {
        anyone_listening(self.ctx.backend().as_ref(), topics).await
    }

    /// Write the SHUTDOWN record and release the connection
    ///
    /// A transport failure renews the context and retries once.
    pub async fn shutdown(&self) -> OrchardResult<()> {
        let update = match self.tracker.update(&self.ctx, NodeActivity::Shutdown).await {
            Err(e) if e.is_transport() => {
                warn!("Writing SHUTDOWN failed, renewing connection: {}", e);
                match self.ctx.renew().await {
                    Ok(()) => self.tracker.update(&self.ctx, NodeActivity::Shutdown).await,
                    Err(e) => Err(e),
                }
            }
            result => result,
        };
        let close = self.ctx.close().await;
        update.and(close)
    }
}

/// Parse the node command line, load configuration, connect to the router and run `body`
pub async fn entrypoint<F, Fut>(body: F) -> OrchardResult<()>
where
    F: FnOnce(Node, CancellationToken) -> Fut,
    Fut: Future<Output = OrchardResult<()>> + Send + 'static,
{
    init_tracing();
    let args = NodeArgs::parse();
    let config = OrchardConfig::load(None)?;
    let connector = Arc::new(RouterConnector::new(config.router.addr()));
    run_node(args.identity(), &config, connector, body).await
}

/// Run a node body under process supervision
///
/// Self-registers, then races `body` against an OS shutdown signal. On a
/// signal the cancellation token fires and the body gets the configured
/// grace period to return. Health is left at SHUTDOWN in every case.
pub async fn run_node<F, Fut>(
    identity: NodeIdentity,
    config: &OrchardConfig,
    connector: Arc<dyn Connector>,
    body: F,
) -> OrchardResult<()>
where
    F: FnOnce(Node, CancellationToken) -> Fut,
    Fut: Future<Output = OrchardResult<()>> + Send + 'static,
{
    let node = Node::connect(identity, connector, config).await?;
    info!(node = %node.identity(), "Starting");
    self_register(node.context(), std::process::id()).await?;
    info!(node = %node.identity().node, "Self-registered for process monitoring");

    let cancel = CancellationToken::new();
    run_until_signal(node, cancel, config, body, shutdown_signal()).await
}

async fn run_until_signal<F, Fut, S>(
    node: Node,
    cancel: CancellationToken,
    config: &OrchardConfig,
    body: F,
    signal: S,
) -> OrchardResult<()>
where
    F: FnOnce(Node, CancellationToken) -> Fut,
    Fut: Future<Output = OrchardResult<()>> + Send + 'static,
    S: Future<Output = ()>,
{
    let mut task = tokio::spawn(body(node.clone(), cancel.clone()));

    let result = tokio::select! {
        joined = &mut task => flatten(joined),
        _ = signal => {
            info!("Shutdown signal received");
            cancel.cancel();
            match tokio::time::timeout(config.cancel_grace(), &mut task).await {
                Ok(joined) => flatten(joined),
                Err(_) => {
                    warn!("Node body did not finish within the grace period");
                    task.abort();
                    Ok(())
                }
            }
        }
    };

    let cleanup = node.shutdown().await;
    result.and(cleanup)
}

fn flatten(joined: Result<OrchardResult<()>, JoinError>) -> OrchardResult<()> {
    joined.map_err(|e| OrchardError::Process(format!("Node body panicked or was aborted: {}", e)))?
}

/// Completes on SIGINT, SIGTERM, SIGQUIT or Ctrl-C
#[cfg(unix)]
pub async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigquit = signal(SignalKind::quit())?;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {},
        _ = sigint.recv() => {},
        _ = sigterm.recv() => {},
        _ = sigquit.recv() => {},
    }
    Ok(())
}

#[cfg(not(unix))]
pub async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await
}

async fn shutdown_signal() {
    if let Err(e) = wait_for_shutdown_signal().await {
        warn!("Could not install signal handlers: {}", e);
        std::future::pending::<()>().await;
    }
}
