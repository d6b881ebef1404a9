//! `start` and `stop` of a registered mesh

use super::Session;
use crate::output::{self, Entity, Severity};
use colored::*;
use orchard_core::core::mesh::load_mesh;
use orchard_core::core::supervisor::{NodeReport, NodeSelection, StartReport, StopOutcome};
use orchard_core::{MeshDefinition, OrchardError, OrchardResult};
use tracing::debug;

/// Load a mesh, reporting a missing one the way every command does
pub async fn load(session: &Session, mesh: &str) -> OrchardResult<MeshDefinition> {
    let backend = session.backend().await?;
    load_mesh(backend.as_ref(), mesh).await.map_err(|e| {
        output::entity(Entity::Mesh, mesh, "Upon loading");
        output::severity(Severity::Error, e.to_string());
        e
    })
}

pub async fn start(
    session: &Session,
    mesh: &str,
    selection: &NodeSelection,
) -> OrchardResult<Vec<NodeReport<StartReport>>> {
    let definition = load(session, mesh).await?;
    output::entity(Entity::Mesh, mesh, "Starting nodes");

    let reports = session
        .supervisor()
        .start_mesh(&definition, selection, session.connector(), session.strategy())
        .await;

    for report in &reports {
        let name = report.name.bold();
        match &report.result {
            Ok(started) => {
                if let Some(previous) = started.previous {
                    output::severity(Severity::Info, format!("{} was still active", name));
                    print_stop_outcome(&report.name, previous);
                }
                output::severity(
                    Severity::Success,
                    format!("{} started with PID {}", name, started.child.pid),
                );
            }
            Err(e) => print_node_error(&report.name, e),
        }
    }
    Ok(reports)
}

pub async fn stop(
    session: &Session,
    mesh: &str,
    selection: &NodeSelection,
) -> OrchardResult<Vec<NodeReport<StopOutcome>>> {
    let definition = load(session, mesh).await?;
    output::entity(Entity::Mesh, mesh, "Stopping nodes");

    let reports = session
        .supervisor()
        .stop_mesh(&definition, selection, session.connector(), session.strategy())
        .await;

    for report in &reports {
        match &report.result {
            Ok(outcome) => print_stop_outcome(&report.name, *outcome),
            Err(e) => print_node_error(&report.name, e),
        }
    }
    Ok(reports)
}

fn print_stop_outcome(name: &str, outcome: StopOutcome) {
    match outcome {
        StopOutcome::Interrupted => {
            output::severity(Severity::Success, format!("{} stopped", name.bold()))
        }
        StopOutcome::Terminated => output::severity(
            Severity::Success,
            format!("{} stopped after being terminated", name.bold()),
        ),
        StopOutcome::AlreadyStopped => {
            output::severity(Severity::Warning, format!("{} already stopped", name.bold()))
        }
    }
}

fn print_node_error(name: &str, error: &OrchardError) {
    debug!(node = name, "Node command failed: {:?}", error);
    match error {
        OrchardError::NotRegistered { .. } => {
            output::severity(
                Severity::Error,
                format!("{} did not self-register", name.bold()),
            );
            output::severity(
                Severity::Info,
                "Make sure the node runs through orchard_core::node::entrypoint",
            );
        }
        other => output::severity(Severity::Error, format!("{}: {}", name.bold(), other)),
    }
}
