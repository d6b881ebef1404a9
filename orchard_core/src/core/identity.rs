//! Node identity and mesh descriptors

use crate::error::{OrchardError, OrchardResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// Identity of one node instance: `(mesh, name, node)`
///
/// `node` is the executable providing the behaviour, `name` the unique
/// instance id inside the mesh. Immutable once the node has started.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeIdentity {
    pub mesh: String,
    pub name: String,
    pub node: String,
}

impl NodeIdentity {
    pub fn new(mesh: impl Into<String>, name: impl Into<String>, node: impl Into<String>) -> Self {
        Self {
            mesh: mesh.into(),
            name: name.into(),
            node: node.into(),
        }
    }

    /// Identity for a node started without an explicit instance name
    pub fn unnamed(mesh: impl Into<String>, node: impl Into<String>) -> Self {
        let node = node.into();
        Self::new(mesh, node.clone(), node)
    }

    pub fn from_descriptor(mesh: &str, descriptor: &NodeDescriptor) -> Self {
        Self::new(mesh, descriptor.name.clone(), descriptor.node())
    }
}

impl fmt::Display for NodeIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{} ({})", self.mesh, self.name, self.node)
    }
}

/// Extra command line arguments of a descriptor: a single string or a list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WithArgs {
    One(String),
    Many(Vec<String>),
}

/// One `{name, node, with}` entry of a mesh definition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeDescriptor {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node: Option<String>,
    #[serde(default, rename = "with", skip_serializing_if = "Option::is_none")]
    pub with: Option<WithArgs>,
}

impl NodeDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            node: None,
            with: None,
        }
    }

    pub fn with_node(mut self, node: impl Into<String>) -> Self {
        self.node = Some(node.into());
        self
    }

    pub fn with_args(mut self, args: WithArgs) -> Self {
        self.with = Some(args);
        self
    }

    /// Executable of the node, defaulting to the instance name
    pub fn node(&self) -> String {
        self.node.clone().unwrap_or_else(|| self.name.clone())
    }

    pub fn extra_args(&self) -> Vec<String> {
        match &self.with {
            None => Vec::new(),
            Some(WithArgs::One(arg)) => vec![arg.clone()],
            Some(WithArgs::Many(args)) => args.clone(),
        }
    }
}

/// A named list of node descriptors, as written in a Meshfile
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeshDefinition {
    pub mesh: String,
    pub nodes: Vec<NodeDescriptor>,
}

impl MeshDefinition {
    /// Load one or more mesh definitions (auto-detect format)
    pub fn from_file<P: AsRef<Path>>(path: P) -> OrchardResult<Vec<Self>> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            OrchardError::config(format!("Failed to read {}: {}", path.display(), e))
        })?;

        match path.extension().and_then(|s| s.to_str()) {
            Some("toml") => Self::from_toml(&contents),
            _ => Self::from_yaml(&contents),
        }
    }

    /// A YAML Meshfile holds a list of meshes
    pub fn from_yaml(contents: &str) -> OrchardResult<Vec<Self>> {
        let meshes: Vec<Self> = serde_yaml::from_str(contents)?;
        Ok(meshes)
    }

    /// A TOML Meshfile holds `[[meshes]]` tables
    pub fn from_toml(contents: &str) -> OrchardResult<Vec<Self>> {
        #[derive(Deserialize)]
        struct Meshfile {
            meshes: Vec<MeshDefinition>,
        }
        let file: Meshfile = toml::from_str(contents)?;
        Ok(file.meshes)
    }

    pub fn identities(&self) -> impl Iterator<Item = NodeIdentity> + '_ {
        self.nodes
            .iter()
            .map(move |descriptor| NodeIdentity::from_descriptor(&self.mesh, descriptor))
    }
}
