//! Scales every number received on `numbers` by a runtime parameter and
//! republishes it on `scaled`.
//!
//! ```text
//! ratio_node lab -n scaler
//! orchard set-param '!param:lab:scaler:ratio' 2.0
//! ```

use orchard_core::{handler_fn, node, OrchardError, OrchardResult, ParamScope};
use parking_lot::Mutex;
use std::sync::Arc;

#[tokio::main]
async fn main() -> OrchardResult<()> {
    node::entrypoint(|node, cancel| async move {
        let ratio = Arc::new(Mutex::new(0.5_f64));

        let setter = ratio.clone();
        let mut handlers = node
            .parameter(
                "ratio",
                &0.5,
                handler_fn(move |value| {
                    let setter = setter.clone();
                    async move {
                        let ratio = value.as_f64().ok_or_else(|| {
                            OrchardError::InvalidInput(format!("ratio must be a number, got {}", value))
                        })?;
                        *setter.lock() = ratio;
                        Ok(())
                    }
                }),
                ParamScope::Private,
            )
            .await?;

        let publisher = node.clone();
        let listeners = vec!["scaled".to_string()];
        handlers.insert(
            "numbers",
            handler_fn(move |value| {
                let (node, ratio, listeners) = (publisher.clone(), ratio.clone(), listeners.clone());
                async move {
                    let Some(number) = value.as_f64() else {
                        tracing::warn!("Ignoring non-numeric value {}", value);
                        return Ok(());
                    };
                    if node.anyone_listening(&listeners).await? {
                        let scaled = number * *ratio.lock();
                        node.publish("scaled", &scaled).await?;
                    }
                    Ok(())
                }
            }),
        );

        let stats = node.subscribe(handlers, &cancel).await?;
        tracing::info!(?stats, "Subscription loop finished");
        Ok(())
    })
    .await
}
