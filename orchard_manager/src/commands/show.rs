use super::Session;
use crate::commands::lifecycle;
use crate::output::{self, Entity};
use orchard_core::core::health::inspect;
use orchard_core::core::NodeHealth;
use orchard_core::OrchardResult;
use tracing::debug;

/// Classified health of every node of a mesh, in descriptor order
pub async fn health(session: &Session, mesh: &str) -> OrchardResult<Vec<NodeHealth>> {
    let definition = lifecycle::load(session, mesh).await?;
    let supervisor = session.supervisor();
    let policy = session.health_policy();

    let mut rows = Vec::with_capacity(definition.nodes.len());
    for identity in definition.identities() {
        let ctx = session.context(identity).await?;
        let row = inspect(&ctx, &supervisor, &policy).await;
        if let Err(e) = ctx.close().await {
            debug!(name = %ctx.identity().name, "Closing connection failed: {}", e);
        }
        rows.push(row?);
    }
    Ok(rows)
}

pub async fn show(session: &Session, mesh: &str) -> OrchardResult<()> {
    let rows = health(session, mesh).await?;
    output::entity(Entity::Mesh, mesh, "Showing health");
    println!("{}", render(&rows));
    Ok(())
}

pub fn render(rows: &[NodeHealth]) -> String {
    let cells: Vec<Vec<String>> = rows
        .iter()
        .map(|row| {
            vec![
                row.instance.clone(),
                row.node.clone(),
                row.report.activity.to_string(),
                row.report.lifetime_display(),
                row.report.throughput_display(),
            ]
        })
        .collect();
    output::table(
        &["Instance", "Node", "Activity", "Lifetime", "Throughput"],
        &cells,
    )
}
