//! Listing and updating parameters of running nodes

use super::Session;
use crate::output::{self, Entity, Severity};
use orchard_core::keys::{PARAM_PREFIX, SEPARATOR};
use orchard_core::params::{self, ParamFilter, Parameter};
use orchard_core::{OrchardError, OrchardResult};
use serde_json::Value;

/// Parameters currently subscribed to and matching `filter`
pub async fn list(session: &Session, filter: &ParamFilter) -> OrchardResult<Vec<Parameter>> {
    let backend = session.backend().await?;
    params::list(backend, filter).await
}

pub async fn show(session: &Session, filter: &ParamFilter) -> OrchardResult<()> {
    let found = list(session, filter).await?;
    if found.is_empty() {
        output::severity(Severity::Info, "No parameters found");
        return Ok(());
    }

    let rows: Vec<Vec<String>> = found
        .iter()
        .map(|param| {
            vec![
                param.mesh().to_string(),
                param.owner().unwrap_or("(shared)").to_string(),
                param.name().to_string(),
                param
                    .initial_value
                    .as_ref()
                    .map(Value::to_string)
                    .unwrap_or_default(),
                param.topic().to_string(),
            ]
        })
        .collect();
    println!(
        "{}",
        output::table(&["Mesh", "Owner", "Parameter", "Value", "Topic"], &rows)
    );
    Ok(())
}

/// Publish a JSON value on a parameter topic; returns the number of receivers
pub async fn set(session: &Session, topic: &str, raw: &str) -> OrchardResult<u64> {
    let prefix = format!("{}{}", PARAM_PREFIX, SEPARATOR);
    if !topic.starts_with(&prefix) {
        return Err(OrchardError::InvalidInput(format!(
            "{} is not a parameter topic (expected {}mesh:...)",
            topic, prefix
        )));
    }
    let value: Value = serde_json::from_str(raw)
        .map_err(|e| OrchardError::InvalidInput(format!("{} is not valid JSON: {}", raw, e)))?;

    let backend = session.backend().await?;
    let param = Parameter::load(backend, topic).await?;
    let receivers = param.update(&value).await?;

    output::entity(Entity::Parameter, param.name(), format!("set to {}", value));
    if receivers == 0 {
        output::severity(
            Severity::Warning,
            "Nobody subscribes to this parameter, the value was not delivered",
        );
    }
    Ok(receivers)
}
