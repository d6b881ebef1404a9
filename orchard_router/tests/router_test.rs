/// End-to-end tests of the router against the TCP client backend
use orchard_core::communication::protocol::{read_frame, write_frame, Request, Response};
use orchard_core::communication::{codec, ReconnectStrategy};
use orchard_core::core::health::{read_record, HealthRecord};
use orchard_core::{
    handler_fn, ConnectionContext, Connector, HealthTracker, Node, NodeActivity, NodeIdentity,
    OrchardConfig, RouterConnector, SubscriptionLoop, TopicHandlers,
};
use orchard_router::{serve, RouterState};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

async fn start_router() -> (RouterConnector, Arc<RouterState>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let state = Arc::new(RouterState::new());
    tokio::spawn(serve(listener, state.clone()));
    (RouterConnector::new(addr.to_string()), state)
}

async fn wait_for_subscribers(connector: &RouterConnector, channel: &str, expected: u64) {
    let backend = connector.connect().await.unwrap();
    let channels = vec![channel.to_string()];
    tokio::time::timeout(Duration::from_secs(5), async {
        while backend.numsub(&channels).await.unwrap()[0].1 != expected {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("subscriber count not reached in time");
}

#[tokio::test]
async fn test_registry_get_and_set() {
    let (connector, _state) = start_router().await;
    let backend = connector.connect().await.unwrap();

    assert_eq!(backend.get("lab:camera:pid").await.unwrap(), None);
    backend.set("lab:camera:pid", b"42".to_vec()).await.unwrap();
    assert_eq!(
        backend.get("lab:camera:pid").await.unwrap(),
        Some(b"42".to_vec())
    );

    // Visible from another connection
    let other = connector.connect().await.unwrap();
    assert_eq!(
        other.get("lab:camera:pid").await.unwrap(),
        Some(b"42".to_vec())
    );
}

#[tokio::test]
async fn test_publish_reaches_subscriber() {
    let (connector, _state) = start_router().await;
    let backend = connector.connect().await.unwrap();

    let mut subscription = backend
        .subscribe(&["numbers".to_string(), "words".to_string()])
        .await
        .unwrap();
    wait_for_subscribers(&connector, "numbers", 1).await;

    assert_eq!(backend.publish("numbers", vec![7]).await.unwrap(), 1);
    assert_eq!(backend.publish("nobody", vec![8]).await.unwrap(), 0);

    let message = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let Some(message) = subscription.try_next().await.unwrap() {
                break message;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await
    .unwrap();
    assert_eq!(message.channel, "numbers");
    assert_eq!(message.payload, vec![7]);

    let mut channels = backend.channels().await.unwrap();
    channels.sort();
    assert_eq!(channels, vec!["numbers", "words"]);
}

#[tokio::test]
async fn test_dropped_subscription_is_forgotten() {
    let (connector, state) = start_router().await;
    let backend = connector.connect().await.unwrap();

    let subscription = backend.subscribe(&["numbers".to_string()]).await.unwrap();
    wait_for_subscribers(&connector, "numbers", 1).await;

    drop(subscription);
    wait_for_subscribers(&connector, "numbers", 0).await;
    assert!(backend.channels().await.unwrap().is_empty());
    assert!(state.client_count().await >= 1);
}

#[tokio::test]
async fn test_subscription_loop_over_router() {
    let (connector, _state) = start_router().await;
    let ctx = ConnectionContext::acquire(
        NodeIdentity::new("lab", "listener", "node"),
        Arc::new(connector.clone()),
        ReconnectStrategy::fixed(Duration::from_millis(5)),
    )
    .await
    .unwrap();

    let seen = Arc::new(Mutex::new(Vec::<Value>::new()));
    let sink = seen.clone();
    let handlers = TopicHandlers::single(
        "detections",
        handler_fn(move |value| {
            let sink = sink.clone();
            async move {
                sink.lock().unwrap().push(value);
                Ok(())
            }
        }),
    );

    let tracker = Arc::new(HealthTracker::new());
    let cancel = CancellationToken::new();
    let task = {
        let (ctx, tracker, cancel) = (ctx.clone(), tracker.clone(), cancel.clone());
        let subscription = SubscriptionLoop::new(handlers);
        tokio::spawn(async move { subscription.run(&ctx, &tracker, &cancel).await })
    };
    wait_for_subscribers(&connector, "detections", 1).await;

    let publisher = connector.connect().await.unwrap();
    let value = json!({ "frame": 3, "label": "crate" });
    publisher
        .publish("detections", codec::encode(&value).unwrap())
        .await
        .unwrap();

    tokio::time::timeout(Duration::from_secs(5), async {
        while seen.lock().unwrap().is_empty() {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await
    .unwrap();
    cancel.cancel();

    let stats = task.await.unwrap().unwrap();
    assert_eq!(stats.dispatched, 1);
    assert_eq!(seen.lock().unwrap()[0], value);

    let record = read_record(&ctx).await.unwrap().unwrap();
    assert_eq!(record.activity, NodeActivity::Active);
}

/// Router that answers `Publish` only after `delay` and records every `Set`
async fn start_slow_router(delay: Duration) -> (RouterConnector, Arc<Mutex<Vec<(String, Vec<u8>)>>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let writes = Arc::new(Mutex::new(Vec::new()));
    let recorded = writes.clone();
    tokio::spawn(async move {
        loop {
            let (mut stream, _) = listener.accept().await.unwrap();
            let writes = recorded.clone();
            tokio::spawn(async move {
                while let Ok(request) = read_frame::<_, Request>(&mut stream).await {
                    let response = match request {
                        Request::Ping => Response::Pong,
                        Request::Set { key, value } => {
                            writes.lock().unwrap().push((key, value));
                            Response::Ok
                        }
                        Request::Publish { .. } => {
                            tokio::time::sleep(delay).await;
                            Response::Published(0)
                        }
                        other => Response::Error(format!("unsupported: {:?}", other)),
                    };
                    if write_frame(&mut stream, &response).await.is_err() {
                        break;
                    }
                }
            });
        }
    });
    (RouterConnector::new(addr.to_string()), writes)
}

#[tokio::test]
async fn test_cancelled_request_does_not_desync_connection() {
    let (connector, _writes) = start_slow_router(Duration::from_millis(100)).await;
    let backend = connector.connect().await.unwrap();

    let cancelled =
        tokio::time::timeout(Duration::from_millis(20), backend.publish("t", vec![1])).await;
    assert!(cancelled.is_err());

    // The late Published reply must never answer a later request
    let err = backend.set("k:health", vec![2]).await.unwrap_err();
    assert!(err.is_transport());

    let fresh = connector.connect().await.unwrap();
    fresh.set("k:health", vec![2]).await.unwrap();
}

#[tokio::test]
async fn test_shutdown_after_cancelled_publish_writes_shutdown() {
    let (connector, writes) = start_slow_router(Duration::from_millis(100)).await;
    let node = Node::connect(
        NodeIdentity::new("lab", "camera", "camera"),
        Arc::new(connector),
        &OrchardConfig::default(),
    )
    .await
    .unwrap();

    let cancelled =
        tokio::time::timeout(Duration::from_millis(20), node.publish("image", &1)).await;
    assert!(cancelled.is_err());

    node.shutdown().await.unwrap();
    assert_eq!(node.context().renewals(), 1);

    let writes = writes.lock().unwrap();
    let (key, value) = writes.last().unwrap();
    assert_eq!(key, "lab:camera:health");
    let record: HealthRecord = codec::decode(value).unwrap();
    assert_eq!(record.activity, NodeActivity::Shutdown);
}
