//! # Node runtime for ORCHARD
//!
//! - **context**: the live backend handle of one node identity, renewable after transport failure
//! - **supervisor**: spawning, self-registration, liveness and escalating stop of node processes
//! - **health**: heartbeat snapshots and their classification by a monitor
//! - **subscription**: the cooperative dispatch loop every subscribing node runs
//! - **identity**: node identities and mesh descriptors
//! - **mesh**: storing mesh descriptors in the registry
//!
//! ## Node Lifecycle
//!
//! 1. **Spawn** - the supervisor starts `node mesh -n name [with...]`
//! 2. **Register** - the node acquires its context and writes its pid record
//! 3. **Run** - the subscription loop dispatches messages and refreshes health
//! 4. **Shutdown** - on interrupt the node writes SHUTDOWN and releases its context

pub mod context;
pub mod health;
pub mod identity;
pub mod mesh;
pub mod subscription;
pub mod supervisor;

pub use context::ConnectionContext;
pub use health::{
    classify, init_health, inspect, HealthPolicy, HealthRecord, HealthReport, HealthTracker,
    NodeActivity, NodeHealth,
};
pub use identity::{MeshDefinition, NodeDescriptor, NodeIdentity, WithArgs};
pub use mesh::{load_mesh, register_mesh};
pub use subscription::{handler_fn, Handler, LoopConfig, LoopStats, SubscriptionLoop, TopicHandlers};
pub use supervisor::{
    self_register, ChildHandle, LogFiles, NodeReport, NodeSelection, OsProcessTable,
    ProcessSupervisor, ProcessTable, StartReport, StopOutcome,
};
