use super::Session;
use crate::commands::lifecycle;
use orchard_core::{OrchardError, OrchardResult};

/// Contents of the log of node instance `name` in `mesh`
pub async fn read(session: &Session, mesh: &str, name: &str) -> OrchardResult<String> {
    let definition = lifecycle::load(session, mesh).await?;
    if !definition.nodes.iter().any(|d| d.name == name) {
        return Err(OrchardError::NotFound(format!(
            "Node {} is not part of mesh {}",
            name, mesh
        )));
    }
    session.logs().read_to_string(name)
}

pub async fn log(session: &Session, mesh: &str, name: &str) -> OrchardResult<()> {
    print!("{}", read(session, mesh, name).await?);
    Ok(())
}
