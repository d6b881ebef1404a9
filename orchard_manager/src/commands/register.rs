use super::Session;
use crate::output::{self, Entity, Severity};
use orchard_core::core::mesh::register_mesh;
use orchard_core::{MeshDefinition, OrchardResult};
use std::path::Path;

/// Store every mesh of a Meshfile in the registry; returns the mesh names
pub async fn register(session: &Session, meshfile: &Path) -> OrchardResult<Vec<String>> {
    output::entity(
        Entity::Meshfile,
        &meshfile.display().to_string(),
        "Registering meshes",
    );

    let meshes = MeshDefinition::from_file(meshfile).map_err(|e| {
        output::severity(Severity::Error, "Invalid Meshfile");
        e
    })?;

    let backend = session.backend().await?;
    let mut registered = Vec::new();
    for mesh in &meshes {
        register_mesh(backend.as_ref(), mesh).await?;
        output::severity(
            Severity::Success,
            format!("Mesh {} registered with {} nodes", mesh.mesh, mesh.nodes.len()),
        );
        registered.push(mesh.mesh.clone());
    }
    Ok(registered)
}
