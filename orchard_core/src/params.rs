//! Runtime parameters over the bus
//!
//! A parameter lives on the topic `!param:{mesh}:{name}` (shared) or
//! `!param:{mesh}:{node}:{name}` (private). The topic is both the registry
//! key holding the current value and the channel carrying updates, so the
//! owning node receives updates through its ordinary subscription loop.
//!
//! # Example
//!
//! ```rust,ignore
//! let handlers = params::declare(&ctx, "ratio", &0.5, handler, ParamScope::Private).await?;
//!
//! // Elsewhere
//! for param in params::list(backend, &ParamFilter::default().param("ratio")).await? {
//!     param.update(&0.75).await?;
//! }
//! ```

use crate::communication::backend::Backend;
use crate::communication::codec;
use crate::core::context::ConnectionContext;
use crate::core::subscription::{Handler, TopicHandlers};
use crate::error::OrchardResult;
use crate::keys::{self, PARAM_PREFIX, SEPARATOR};
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// Visibility of a parameter inside its mesh
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ParamScope {
    /// One value for the whole mesh
    Shared,
    /// Namespaced by the declaring node's name
    #[default]
    Private,
}

/// Declare a parameter of the node bound to `ctx`
///
/// Overwrites the stored value with `initial`, then runs `handler` once with
/// it before returning the topic → handler entry for the subscription loop.
pub async fn declare<T: Serialize + ?Sized>(
    ctx: &ConnectionContext,
    name: &str,
    initial: &T,
    handler: Arc<dyn Handler>,
    scope: ParamScope,
) -> OrchardResult<TopicHandlers> {
    let identity = ctx.identity();
    let owner = match scope {
        ParamScope::Shared => None,
        ParamScope::Private => Some(identity.name.as_str()),
    };
    let topic = keys::param_topic(&identity.mesh, owner, name);

    let value = serde_json::to_value(initial)?;
    ctx.backend().set(&topic, codec::encode(&value)?).await?;
    handler.call(value).await?;

    debug!(%topic, "Declared parameter");
    Ok(TopicHandlers::single(topic, handler))
}

/// Optional mesh/name/param components a discovered topic must match
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParamFilter {
    pub mesh: Option<String>,
    pub name: Option<String>,
    pub param: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopicMatch {
    NoMatch,
    Match,
    /// Shared parameter matched; the `name` component did not apply
    SharedIgnoringName,
}

impl ParamFilter {
    pub fn mesh(mut self, mesh: impl Into<String>) -> Self {
        self.mesh = Some(mesh.into());
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn param(mut self, param: impl Into<String>) -> Self {
        self.param = Some(param.into());
        self
    }

    pub fn topic_matches(&self, topic: &str) -> TopicMatch {
        let parts: Vec<&str> = topic.split(SEPARATOR).collect();
        if parts.len() < 3 || parts[0] != PARAM_PREFIX {
            return TopicMatch::NoMatch;
        }
        if let Some(mesh) = &self.mesh {
            if parts[1] != mesh {
                return TopicMatch::NoMatch;
            }
        }
        let shared = parts.len() == 3;
        if let Some(name) = &self.name {
            if !shared && parts[2] != name {
                return TopicMatch::NoMatch;
            }
        }
        if let Some(param) = &self.param {
            if parts[parts.len() - 1] != param {
                return TopicMatch::NoMatch;
            }
        }

        if shared && self.name.is_some() {
            TopicMatch::SharedIgnoringName
        } else {
            TopicMatch::Match
        }
    }
}

/// A discovered parameter
pub struct Parameter {
    topic: String,
    /// Value stored at discovery time; not kept live
    pub initial_value: Option<Value>,
    backend: Arc<dyn Backend>,
}

impl Parameter {
    pub async fn load(backend: Arc<dyn Backend>, topic: impl Into<String>) -> OrchardResult<Self> {
        let topic = topic.into();
        let initial_value = match backend.get(&topic).await? {
            Some(bytes) => Some(codec::decode_value(&bytes)?),
            None => None,
        };
        Ok(Self {
            topic,
            initial_value,
            backend,
        })
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    fn segments(&self) -> Vec<&str> {
        self.topic.split(SEPARATOR).collect()
    }

    pub fn mesh(&self) -> &str {
        self.segments().get(1).copied().unwrap_or_default()
    }

    /// Owning node, `None` for shared parameters
    pub fn owner(&self) -> Option<&str> {
        let segments = self.segments();
        if segments.len() > 3 {
            Some(segments[2])
        } else {
            None
        }
    }

    pub fn name(&self) -> &str {
        self.segments().last().copied().unwrap_or_default()
    }

    pub fn is_shared(&self) -> bool {
        self.owner().is_none()
    }

    /// Publish a new value; returns the number of receivers
    pub async fn update<T: Serialize + ?Sized>(&self, value: &T) -> OrchardResult<u64> {
        self.backend.publish(&self.topic, codec::encode(value)?).await
    }
}

impl fmt::Debug for Parameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Parameter")
            .field("topic", &self.topic)
            .field("initial_value", &self.initial_value)
            .finish()
    }
}

/// Parameters whose topic currently has a subscriber and matches `filter`
pub async fn list(backend: Arc<dyn Backend>, filter: &ParamFilter) -> OrchardResult<Vec<Parameter>> {
    let mut found = Vec::new();
    for topic in backend.channels().await? {
        match filter.topic_matches(&topic) {
            TopicMatch::NoMatch => continue,
            TopicMatch::SharedIgnoringName => {
                warn!(%topic, "Parameter is shared, so name is ignored");
            }
            TopicMatch::Match => {}
        }
        found.push(Parameter::load(backend.clone(), topic).await?);
    }
    Ok(found)
}
