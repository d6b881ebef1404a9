//! Process supervision of mesh nodes
//!
//! Two-phase start: the supervisor spawns `node mesh -n name [with...]`,
//! the child confirms by writing its own pid record (`self_register`).
//! Stopping escalates from an interrupt to a terminate after a grace window.

use crate::communication::backend::Connector;
use crate::communication::codec;
use crate::communication::reconnect::ReconnectStrategy;
use crate::core::context::ConnectionContext;
use crate::core::health::init_health;
use crate::core::identity::{MeshDefinition, NodeIdentity};
use crate::error::{OrchardError, OrchardResult};
use crate::keys;
use nix::errno::Errno;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid as NixPid;
use std::fmt::Debug;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::time::Duration;
use sysinfo::{Pid, ProcessStatus, System};
use tracing::{debug, info, warn};

/// Default wait between the interrupt and the forced terminate
pub const DEFAULT_GRACE: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopSignal {
    /// Graceful, lets the node run its shutdown path (SIGINT)
    Interrupt,
    /// Forced (SIGTERM)
    Terminate,
}

/// Result of delivering a signal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Delivered,
    NoSuchProcess,
}

/// OS process table capability
pub trait ProcessTable: Send + Sync + Debug {
    /// Spawn `program args...` with stdout and stderr going to `log`
    fn spawn(&self, program: &str, args: &[String], log: File) -> OrchardResult<u32>;

    fn exists(&self, pid: u32) -> bool;

    fn signal(&self, pid: u32, signal: StopSignal) -> OrchardResult<Delivery>;
}

/// Process table of the local OS
#[derive(Debug, Default, Clone, Copy)]
pub struct OsProcessTable;

impl ProcessTable for OsProcessTable {
    fn spawn(&self, program: &str, args: &[String], log: File) -> OrchardResult<u32> {
        let stderr = log.try_clone()?;
        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::from(log))
            .stderr(Stdio::from(stderr))
            .spawn()
            .map_err(|e| OrchardError::Process(format!("Failed to spawn '{}': {}", program, e)))?;
        Ok(child.id())
    }

    fn exists(&self, pid: u32) -> bool {
        let pid = Pid::from_u32(pid);
        let mut system = System::new();
        if !system.refresh_process(pid) {
            return false;
        }
        // An exited but unreaped child is gone for our purposes
        matches!(system.process(pid), Some(process) if process.status() != ProcessStatus::Zombie)
    }

    fn signal(&self, pid: u32, stop: StopSignal) -> OrchardResult<Delivery> {
        let raw = i32::try_from(pid)
            .map_err(|_| OrchardError::InvalidInput(format!("pid {} out of range", pid)))?;
        let sig = match stop {
            StopSignal::Interrupt => Signal::SIGINT,
            StopSignal::Terminate => Signal::SIGTERM,
        };

        match signal::kill(NixPid::from_raw(raw), sig) {
            Ok(()) => Ok(Delivery::Delivered),
            Err(Errno::ESRCH) => Ok(Delivery::NoSuchProcess),
            Err(e) => Err(OrchardError::Process(format!(
                "Failed to send {:?} to {}: {}",
                sig, pid, e
            ))),
        }
    }
}

/// Per-node append logs at `{dir}/{name}.log`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogFiles {
    dir: PathBuf,
}

impl LogFiles {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{}.log", name))
    }

    pub fn open_append(&self, name: &str) -> OrchardResult<File> {
        std::fs::create_dir_all(&self.dir)?;
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.path(name))?;
        Ok(file)
    }

    pub fn read_to_string(&self, name: &str) -> OrchardResult<String> {
        let path = self.path(name);
        match std::fs::read_to_string(&path) {
            Ok(contents) => Ok(contents),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(OrchardError::NotFound(
                format!("No log for node '{}' at {}", name, path.display()),
            )),
            Err(e) => Err(e.into()),
        }
    }
}

/// Handle of a freshly spawned node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChildHandle {
    pub pid: u32,
}

/// How a stop request ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// Exited within the grace window
    Interrupted,
    /// Had to be terminated forcefully
    Terminated,
    /// The registered process no longer existed
    AlreadyStopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StopPhase {
    Running,
    Interrupted,
    Terminated,
}

/// Record the calling process as the node bound to `ctx`
pub async fn self_register(ctx: &ConnectionContext, pid: u32) -> OrchardResult<()> {
    let key = keys::pid_key(ctx.identity());
    ctx.backend().set(&key, codec::encode(&pid)?).await?;
    debug!(mesh = %ctx.identity().mesh, name = %ctx.identity().name, pid, "Self-registered");
    Ok(())
}

pub async fn registered_pid(ctx: &ConnectionContext) -> OrchardResult<Option<u32>> {
    let key = keys::pid_key(ctx.identity());
    match ctx.backend().get(&key).await? {
        Some(bytes) => Ok(Some(codec::decode(&bytes)?)),
        None => Ok(None),
    }
}

/// Which nodes of a mesh a batch operation touches
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeSelection {
    /// Only these names; everything when empty
    pub select: Vec<String>,
    pub exclude: Vec<String>,
}

impl NodeSelection {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn includes(&self, name: &str) -> bool {
        if !self.select.is_empty() && !self.select.iter().any(|s| s == name) {
            return false;
        }
        !self.exclude.iter().any(|x| x == name)
    }
}

/// Per-node result of a batch operation
#[derive(Debug)]
pub struct NodeReport<T> {
    pub name: String,
    pub result: OrchardResult<T>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StartReport {
    /// Outcome of stopping a previous instance that was still running
    pub previous: Option<StopOutcome>,
    pub child: ChildHandle,
}

#[derive(Debug)]
pub struct ProcessSupervisor<P: ProcessTable = OsProcessTable> {
    table: P,
    logs: LogFiles,
    grace: Duration,
}

impl ProcessSupervisor<OsProcessTable> {
    pub fn new(logs: LogFiles) -> Self {
        Self::with_table(OsProcessTable, logs)
    }
}

impl<P: ProcessTable> ProcessSupervisor<P> {
    pub fn with_table(table: P, logs: LogFiles) -> Self {
        Self {
            table,
            logs,
            grace: DEFAULT_GRACE,
        }
    }

    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    pub fn table(&self) -> &P {
        &self.table
    }

    pub fn logs(&self) -> &LogFiles {
        &self.logs
    }

    /// Spawn `node mesh -n name [extra_args...]` with output appended to its log
    ///
    /// Does not write the pid record; the child registers itself.
    pub fn start(&self, identity: &NodeIdentity, extra_args: &[String]) -> OrchardResult<ChildHandle> {
        let log = self.logs.open_append(&identity.name)?;

        let mut args = vec![identity.mesh.clone(), "-n".to_string(), identity.name.clone()];
        args.extend(extra_args.iter().cloned());

        let pid = self.table.spawn(&identity.node, &args, log)?;
        info!(mesh = %identity.mesh, name = %identity.name, pid, "Spawned node");
        Ok(ChildHandle { pid })
    }

    /// False when no pid is on record
    ///
    /// A reused pid of an unrelated process reads as running.
    pub async fn is_running(&self, ctx: &ConnectionContext) -> OrchardResult<bool> {
        Ok(match registered_pid(ctx).await? {
            Some(pid) => self.table.exists(pid),
            None => false,
        })
    }

    /// Interrupt the registered process, terminate it if it outlives the grace window
    pub async fn stop(&self, ctx: &ConnectionContext) -> OrchardResult<StopOutcome> {
        let identity = ctx.identity();
        let pid = registered_pid(ctx)
            .await?
            .ok_or_else(|| OrchardError::NotRegistered {
                mesh: identity.mesh.clone(),
                name: identity.name.clone(),
            })?;

        let mut phase = StopPhase::Running;
        loop {
            phase = match phase {
                StopPhase::Running => match self.table.signal(pid, StopSignal::Interrupt)? {
                    Delivery::Delivered => StopPhase::Interrupted,
                    Delivery::NoSuchProcess => {
                        warn!(name = %identity.name, pid, "Node already stopped");
                        return Ok(StopOutcome::AlreadyStopped);
                    }
                },
                StopPhase::Interrupted => {
                    tokio::time::sleep(self.grace).await;
                    if !self.table.exists(pid) {
                        return Ok(StopOutcome::Interrupted);
                    }
                    info!(name = %identity.name, pid, "Process has to be interrupted forcefully");
                    match self.table.signal(pid, StopSignal::Terminate)? {
                        Delivery::Delivered => StopPhase::Terminated,
                        Delivery::NoSuchProcess => return Ok(StopOutcome::Interrupted),
                    }
                }
                StopPhase::Terminated => return Ok(StopOutcome::Terminated),
            };
        }
    }

    /// `stop` followed by resetting the health record to SHUTDOWN
    pub async fn stop_node(&self, ctx: &ConnectionContext) -> OrchardResult<StopOutcome> {
        let outcome = self.stop(ctx).await?;
        init_health(ctx).await?;
        Ok(outcome)
    }

    /// Start every selected node, restarting those still running
    pub async fn start_mesh(
        &self,
        mesh: &MeshDefinition,
        selection: &NodeSelection,
        connector: &Arc<dyn Connector>,
        strategy: &ReconnectStrategy,
    ) -> Vec<NodeReport<StartReport>> {
        let mut reports = Vec::new();
        for descriptor in mesh.nodes.iter().filter(|d| selection.includes(&d.name)) {
            let identity = NodeIdentity::from_descriptor(&mesh.mesh, descriptor);
            let result = async {
                let ctx =
                    ConnectionContext::acquire(identity.clone(), connector.clone(), strategy.clone())
                        .await?;
                let previous = if self.is_running(&ctx).await? {
                    info!(name = %identity.name, "Node still active, stopping it first");
                    Some(self.stop_node(&ctx).await?)
                } else {
                    None
                };
                let child = self.start(&identity, &descriptor.extra_args());
                if let Err(e) = ctx.close().await {
                    debug!(name = %identity.name, "Closing connection failed: {}", e);
                }
                Ok::<_, OrchardError>(StartReport {
                    previous,
                    child: child?,
                })
            }
            .await;

            reports.push(NodeReport {
                name: descriptor.name.clone(),
                result,
            });
        }
        reports
    }

    /// Stop every selected node; failures are reported per node
    pub async fn stop_mesh(
        &self,
        mesh: &MeshDefinition,
        selection: &NodeSelection,
        connector: &Arc<dyn Connector>,
        strategy: &ReconnectStrategy,
    ) -> Vec<NodeReport<StopOutcome>> {
        let mut reports = Vec::new();
        for descriptor in mesh.nodes.iter().filter(|d| selection.includes(&d.name)) {
            let identity = NodeIdentity::from_descriptor(&mesh.mesh, descriptor);
            let result = async {
                let ctx =
                    ConnectionContext::acquire(identity, connector.clone(), strategy.clone())
                        .await?;
                let outcome = self.stop_node(&ctx).await;
                if let Err(e) = ctx.close().await {
                    debug!(name = %descriptor.name, "Closing connection failed: {}", e);
                }
                outcome
            }
            .await;

            reports.push(NodeReport {
                name: descriptor.name.clone(),
                result,
            });
        }
        reports
    }
}
