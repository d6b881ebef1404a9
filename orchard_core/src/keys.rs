//! Registry key and topic layout
//!
//! ```text
//! {mesh}                         descriptor list of the mesh
//! {mesh}:{name}:pid              process id written at self-registration
//! {mesh}:{name}:health           (activity, start_time, last_time) snapshot
//! !param:{mesh}:{name}:{param}   node-private parameter (key and channel)
//! !param:{mesh}:{param}          shared parameter (key and channel)
//! ```

use crate::core::identity::NodeIdentity;

/// First segment of every parameter topic
pub const PARAM_PREFIX: &str = "!param";

/// Separator between topic/key segments
pub const SEPARATOR: char = ':';

pub fn mesh_key(mesh: &str) -> String {
    mesh.to_string()
}

pub fn pid_key(identity: &NodeIdentity) -> String {
    format!("{}:{}:pid", identity.mesh, identity.name)
}

pub fn health_key(identity: &NodeIdentity) -> String {
    format!("{}:{}:health", identity.mesh, identity.name)
}

/// Topic of a parameter; `owner` is `None` for mesh-wide shared parameters
pub fn param_topic(mesh: &str, owner: Option<&str>, param: &str) -> String {
    match owner {
        Some(owner) => format!("{}:{}:{}:{}", PARAM_PREFIX, mesh, owner, param),
        None => format!("{}:{}:{}", PARAM_PREFIX, mesh, param),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_keys() {
        let identity = NodeIdentity::new("mesh", "name", "node");
        assert_eq!(pid_key(&identity), "mesh:name:pid");
        assert_eq!(health_key(&identity), "mesh:name:health");
        assert_eq!(mesh_key("mesh"), "mesh");
    }

    #[test]
    fn test_param_topics() {
        assert_eq!(
            param_topic("mesh", Some("name"), "ratio"),
            "!param:mesh:name:ratio"
        );
        assert_eq!(param_topic("mesh", None, "ratio"), "!param:mesh:ratio");
    }
}
