//! Mesh registration in the registry

use crate::communication::backend::Backend;
use crate::communication::codec;
use crate::core::health::init_record;
use crate::core::identity::{MeshDefinition, NodeDescriptor};
use crate::error::{OrchardError, OrchardResult};
use crate::keys;
use tracing::info;

/// Store the descriptor list under the mesh key and reset every node's health
pub async fn register_mesh(backend: &dyn Backend, mesh: &MeshDefinition) -> OrchardResult<()> {
    backend
        .set(&keys::mesh_key(&mesh.mesh), codec::encode(&mesh.nodes)?)
        .await?;
    for identity in mesh.identities() {
        init_record(backend, &identity).await?;
    }
    info!(mesh = %mesh.mesh, nodes = mesh.nodes.len(), "Registered mesh");
    Ok(())
}

pub async fn load_mesh(backend: &dyn Backend, mesh: &str) -> OrchardResult<MeshDefinition> {
    let bytes = backend
        .get(&keys::mesh_key(mesh))
        .await?
        .ok_or_else(|| OrchardError::NotFound(format!("Mesh {} not found", mesh)))?;
    let nodes: Vec<NodeDescriptor> = codec::decode(&bytes)?;
    Ok(MeshDefinition {
        mesh: mesh.to_string(),
        nodes,
    })
}
