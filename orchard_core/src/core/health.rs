//! Node health: heartbeat snapshots written by the node, classified by the monitor
//!
//! The node only ever writes full `(activity, start_time, last_time)`
//! snapshots. The monitor never talks to the node; it infers liveness from
//! the snapshot age plus an OS-level existence check of the registered pid.

use crate::communication::backend::Backend;
use crate::communication::codec;
use crate::core::context::ConnectionContext;
use crate::core::identity::NodeIdentity;
use crate::core::supervisor::{ProcessSupervisor, ProcessTable};
use crate::error::OrchardResult;
use crate::keys;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;
use std::time::Duration;
use tracing::debug;

/// Default heartbeat staleness threshold
pub const DEFAULT_STALE_AFTER: Duration = Duration::from_secs(5);

/// Activity state of a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeActivity {
    Active,
    Waiting,
    Failed,
    Shutdown,
}

impl fmt::Display for NodeActivity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            NodeActivity::Active => "ACTIVE",
            NodeActivity::Waiting => "WAITING",
            NodeActivity::Failed => "FAILED",
            NodeActivity::Shutdown => "SHUTDOWN",
        };
        f.write_str(label)
    }
}

/// Snapshot stored under `{mesh}:{name}:health`; times are wall-clock seconds
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HealthRecord {
    pub activity: NodeActivity,
    pub start_time: Option<f64>,
    pub last_time: Option<f64>,
}

impl HealthRecord {
    /// State of a node that never started or was just stopped
    pub const fn shutdown() -> Self {
        Self {
            activity: NodeActivity::Shutdown,
            start_time: None,
            last_time: None,
        }
    }
}

impl Default for HealthRecord {
    fn default() -> Self {
        Self::shutdown()
    }
}

/// Current wall-clock time in seconds since the Unix epoch
pub fn now() -> f64 {
    let now = chrono::Utc::now();
    now.timestamp() as f64 + f64::from(now.timestamp_subsec_micros()) / 1_000_000.0
}

/// Reset the node's record to `(SHUTDOWN, null, null)`
pub async fn init_health(ctx: &ConnectionContext) -> OrchardResult<()> {
    init_record(ctx.backend().as_ref(), ctx.identity()).await
}

/// [`init_health`] for an identity without a context of its own
pub async fn init_record(backend: &dyn Backend, identity: &NodeIdentity) -> OrchardResult<()> {
    let key = keys::health_key(identity);
    backend.set(&key, codec::encode(&HealthRecord::shutdown())?).await
}

pub async fn read_record(ctx: &ConnectionContext) -> OrchardResult<Option<HealthRecord>> {
    let key = keys::health_key(ctx.identity());
    match ctx.backend().get(&key).await? {
        Some(bytes) => Ok(Some(codec::decode(&bytes)?)),
        None => Ok(None),
    }
}

async fn write_record(ctx: &ConnectionContext, record: &HealthRecord) -> OrchardResult<()> {
    let key = keys::health_key(ctx.identity());
    ctx.backend().set(&key, codec::encode(record)?).await
}

/// Writer side, one per node process
///
/// `start_time` is fixed by the first update; every update overwrites
/// `last_time` and `activity`.
#[derive(Debug, Default)]
pub struct HealthTracker {
    start_time: OnceLock<f64>,
}

impl HealthTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start_time(&self) -> Option<f64> {
        self.start_time.get().copied()
    }

    pub async fn update(
        &self,
        ctx: &ConnectionContext,
        activity: NodeActivity,
    ) -> OrchardResult<()> {
        self.update_at(ctx, activity, now()).await
    }

    pub async fn update_at(
        &self,
        ctx: &ConnectionContext,
        activity: NodeActivity,
        at: f64,
    ) -> OrchardResult<()> {
        let start = *self.start_time.get_or_init(|| at);
        let record = HealthRecord {
            activity,
            start_time: Some(start),
            last_time: Some(at),
        };
        write_record(ctx, &record).await
    }
}

/// Tunables of the read side
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HealthPolicy {
    /// A heartbeat older than this reads as WAITING
    pub stale_after: Duration,
}

impl Default for HealthPolicy {
    fn default() -> Self {
        Self {
            stale_after: DEFAULT_STALE_AFTER,
        }
    }
}

/// Classified view of one health record
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HealthReport {
    pub activity: NodeActivity,
    pub lifetime: Option<Duration>,
    /// Messages per second over the most recent inter-message gap
    pub throughput: Option<f64>,
}

impl HealthReport {
    /// `HH:MM:SS`, empty when unknown
    pub fn lifetime_display(&self) -> String {
        self.lifetime.map(format_lifetime).unwrap_or_default()
    }

    /// `0.50 msg/s`, empty when unknown
    pub fn throughput_display(&self) -> String {
        self.throughput
            .map(|rate| format!("{:.2} msg/s", rate))
            .unwrap_or_default()
    }
}

fn format_lifetime(lifetime: Duration) -> String {
    let secs = lifetime.as_secs();
    format!("{:02}:{:02}:{:02}", secs / 3600, (secs / 60) % 60, secs % 60)
}

/// Classify a stored record at time `now`
///
/// A record is only trusted when the process is alive and has heartbeat
/// times; otherwise anything but SHUTDOWN is a crash and reads as FAILED.
pub fn classify(record: &HealthRecord, alive: bool, now: f64, policy: &HealthPolicy) -> HealthReport {
    let (start, last) = match (alive, record.start_time, record.last_time) {
        (true, Some(start), Some(last)) => (start, last),
        _ => {
            let activity = match record.activity {
                NodeActivity::Shutdown => NodeActivity::Shutdown,
                _ => NodeActivity::Failed,
            };
            return HealthReport {
                activity,
                lifetime: None,
                throughput: None,
            };
        }
    };

    let elapsed = now - last;
    let activity = if elapsed > policy.stale_after.as_secs_f64() {
        NodeActivity::Waiting
    } else {
        record.activity
    };
    let throughput = if elapsed > 0.0 {
        1.0 / elapsed
    } else {
        f64::INFINITY
    };

    HealthReport {
        activity,
        // No lifetime for an out-of-range start time
        lifetime: Duration::try_from_secs_f64((now - start).max(0.0)).ok(),
        throughput: Some(throughput),
    }
}

/// One row of a health view
#[derive(Debug, Clone, PartialEq)]
pub struct NodeHealth {
    pub instance: String,
    pub node: String,
    pub report: HealthReport,
}

/// Read and classify the health of the node bound to `ctx`
pub async fn inspect<P: ProcessTable>(
    ctx: &ConnectionContext,
    supervisor: &ProcessSupervisor<P>,
    policy: &HealthPolicy,
) -> OrchardResult<NodeHealth> {
    let record = read_record(ctx).await?.unwrap_or_default();
    let alive = supervisor.is_running(ctx).await?;
    let report = classify(&record, alive, now(), policy);

    let identity = ctx.identity();
    debug!(
        mesh = %identity.mesh,
        name = %identity.name,
        activity = %report.activity,
        alive,
        "Classified health"
    );

    Ok(NodeHealth {
        instance: identity.name.clone(),
        node: identity.node.clone(),
        report,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::communication::memory::MemoryBroker;
    use crate::communication::reconnect::ReconnectStrategy;
    use std::sync::Arc;

    fn active(start: f64, last: f64) -> HealthRecord {
        HealthRecord {
            activity: NodeActivity::Active,
            start_time: Some(start),
            last_time: Some(last),
        }
    }

    async fn context(broker: &MemoryBroker) -> ConnectionContext {
        ConnectionContext::acquire(
            NodeIdentity::new("mesh", "name", "node"),
            Arc::new(broker.connector()),
            ReconnectStrategy::default(),
        )
        .await
        .unwrap()
    }

    #[test]
    fn test_classify_fresh_heartbeat() {
        let report = classify(&active(1.0, 20.0), true, 22.0, &HealthPolicy::default());
        assert_eq!(report.activity, NodeActivity::Active);
        assert_eq!(report.lifetime_display(), "00:00:21");
        assert_eq!(report.throughput_display(), "0.50 msg/s");
    }

    #[test]
    fn test_classify_dead_process_is_failed() {
        let report = classify(&active(1.0, 20.0), false, 22.0, &HealthPolicy::default());
        assert_eq!(report.activity, NodeActivity::Failed);
        assert_eq!(report.lifetime_display(), "");
        assert_eq!(report.throughput_display(), "");
    }

    #[test]
    fn test_classify_stale_heartbeat_is_waiting() {
        let report = classify(&active(1.0, 20.0), true, 40.0, &HealthPolicy::default());
        assert_eq!(report.activity, NodeActivity::Waiting);
        assert_eq!(report.lifetime_display(), "00:00:39");
        assert_eq!(report.throughput_display(), "0.05 msg/s");
    }

    #[test]
    fn test_classify_shutdown_record_stays_shutdown() {
        let report = classify(&HealthRecord::shutdown(), false, 100.0, &HealthPolicy::default());
        assert_eq!(report.activity, NodeActivity::Shutdown);
        assert!(report.lifetime.is_none());

        // Alive but never dispatched: still trusted as written
        let report = classify(&HealthRecord::shutdown(), true, 100.0, &HealthPolicy::default());
        assert_eq!(report.activity, NodeActivity::Shutdown);
    }

    #[test]
    fn test_classify_corrupt_start_time() {
        let report = classify(&active(-1e300, 20.0), true, 22.0, &HealthPolicy::default());
        assert_eq!(report.activity, NodeActivity::Active);
        assert!(report.lifetime.is_none());
        assert_eq!(report.lifetime_display(), "");
        assert_eq!(report.throughput_display(), "0.50 msg/s");
    }

    #[test]
    fn test_classify_respects_policy_threshold() {
        let policy = HealthPolicy {
            stale_after: Duration::from_secs(1),
        };
        let report = classify(&active(1.0, 20.0), true, 22.0, &policy);
        assert_eq!(report.activity, NodeActivity::Waiting);
    }

    #[test]
    fn test_zero_gap_throughput_is_infinite() {
        let report = classify(&active(1.0, 20.0), true, 20.0, &HealthPolicy::default());
        assert_eq!(report.activity, NodeActivity::Active);
        assert!(report.throughput.unwrap().is_infinite());
    }

    #[test]
    fn test_lifetime_hours_do_not_wrap() {
        assert_eq!(format_lifetime(Duration::from_secs(25 * 3600 + 61)), "25:01:01");
    }

    #[test]
    fn test_activity_labels() {
        assert_eq!(NodeActivity::Waiting.to_string(), "WAITING");
        assert_eq!(
            serde_json::to_string(&NodeActivity::Shutdown).unwrap(),
            "\"SHUTDOWN\""
        );
    }

    #[tokio::test]
    async fn test_init_is_idempotent() {
        let broker = MemoryBroker::new();
        let ctx = context(&broker).await;

        init_health(&ctx).await.unwrap();
        let first = read_record(&ctx).await.unwrap();
        init_health(&ctx).await.unwrap();
        let second = read_record(&ctx).await.unwrap();

        assert_eq!(first, Some(HealthRecord::shutdown()));
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_start_time_fixed_by_first_update() {
        let broker = MemoryBroker::new();
        let ctx = context(&broker).await;
        let tracker = HealthTracker::new();

        tracker.update_at(&ctx, NodeActivity::Active, 10.0).await.unwrap();
        tracker.update_at(&ctx, NodeActivity::Active, 12.5).await.unwrap();

        let record = read_record(&ctx).await.unwrap().unwrap();
        assert_eq!(record, active(10.0, 12.5));
        assert_eq!(tracker.start_time(), Some(10.0));
    }
}
