/// Integration tests of the node runtime against the in-memory broker
use orchard_core::communication::{codec, MemoryBroker, ReconnectStrategy};
use orchard_core::core::health::read_record;
use orchard_core::core::supervisor::{self_register, LogFiles, ProcessSupervisor};
use orchard_core::{
    handler_fn, params, ConnectionContext, Connector, Handler, HealthTracker, NodeActivity,
    NodeIdentity, OrchardError, ParamFilter, ParamScope, SubscriptionLoop, TopicHandlers,
};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

async fn context(broker: &MemoryBroker, name: &str) -> ConnectionContext {
    ConnectionContext::acquire(
        NodeIdentity::new("mesh", name, "node"),
        Arc::new(broker.connector()),
        ReconnectStrategy::fixed(Duration::from_millis(5)),
    )
    .await
    .unwrap()
}

fn recorder() -> (Arc<Mutex<Vec<Value>>>, Arc<dyn Handler>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let handler = handler_fn(move |value| {
        let sink = sink.clone();
        async move {
            sink.lock().push(value);
            Ok(())
        }
    });
    (seen, handler)
}

async fn eventually(check: impl Fn() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

#[tokio::test]
async fn test_reconnect_resubscribes_same_topics_without_redelivery() {
    let broker = MemoryBroker::new();
    let ctx = context(&broker, "listener").await;
    let tracker = Arc::new(HealthTracker::new());
    let cancel = CancellationToken::new();
    let (seen, handler) = recorder();

    let handlers = TopicHandlers::single("a", handler.clone()).with("b", handler);
    let subscription = SubscriptionLoop::new(handlers);
    let task = {
        let (ctx, tracker, cancel) = (ctx.clone(), tracker.clone(), cancel.clone());
        tokio::spawn(async move { subscription.run(&ctx, &tracker, &cancel).await })
    };

    let topics = vec!["a".to_string(), "b".to_string()];
    let publisher = broker.connector().connect().await.unwrap();
    eventually(|| tracker.start_time().is_some()).await;
    publisher.publish("a", codec::encode(&1).unwrap()).await.unwrap();
    eventually(|| seen.lock().len() == 1).await;

    broker.sever();

    let publisher = broker.connector().connect().await.unwrap();
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let Ok(counts) = publisher.numsub(&topics).await {
                if counts.iter().all(|(_, count)| *count == 1) {
                    break;
                }
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await
    .expect("loop never resubscribed");
    assert_eq!(ctx.renewals(), 1);

    publisher.publish("b", codec::encode(&2).unwrap()).await.unwrap();
    eventually(|| seen.lock().len() == 2).await;
    cancel.cancel();

    let stats = task.await.unwrap().unwrap();
    assert_eq!(stats.reconnects, 1);
    assert_eq!(stats.dispatched, 2);
    assert_eq!(*seen.lock(), vec![json!(1), json!(2)]);
}

#[tokio::test]
async fn test_structured_values_round_trip() {
    let broker = MemoryBroker::new();
    let ctx = context(&broker, "listener").await;
    let tracker = Arc::new(HealthTracker::new());
    let cancel = CancellationToken::new();
    let (seen, handler) = recorder();

    let subscription = SubscriptionLoop::new(TopicHandlers::single("detections", handler));
    let task = {
        let (ctx, tracker, cancel) = (ctx.clone(), tracker.clone(), cancel.clone());
        tokio::spawn(async move { subscription.run(&ctx, &tracker, &cancel).await })
    };
    eventually(|| tracker.start_time().is_some()).await;

    let value = json!({
        "frame": 17,
        "boxes": [[0.5, 1.25, 10, 20], []],
        "label": "pallet",
        "meta": { "confident": true, "source": null }
    });
    let publisher = broker.connector().connect().await.unwrap();
    publisher
        .publish("detections", codec::encode(&value).unwrap())
        .await
        .unwrap();

    eventually(|| seen.lock().len() == 1).await;
    cancel.cancel();
    task.await.unwrap().unwrap();

    assert_eq!(seen.lock()[0], value);
    let record = read_record(&ctx).await.unwrap().unwrap();
    assert_eq!(record.activity, NodeActivity::Active);
}

#[tokio::test]
async fn test_parameter_update_flows_through_loop() {
    let broker = MemoryBroker::new();
    let ctx = context(&broker, "scaler").await;
    let tracker = Arc::new(HealthTracker::new());
    let cancel = CancellationToken::new();
    let (seen, handler) = recorder();

    let handlers = params::declare(&ctx, "ratio", &0.5, handler, ParamScope::Private)
        .await
        .unwrap();
    assert_eq!(*seen.lock(), vec![json!(0.5)]);

    let subscription = SubscriptionLoop::new(handlers);
    let task = {
        let (ctx, tracker, cancel) = (ctx.clone(), tracker.clone(), cancel.clone());
        tokio::spawn(async move { subscription.run(&ctx, &tracker, &cancel).await })
    };
    eventually(|| tracker.start_time().is_some()).await;

    let operator = broker.connector().connect().await.unwrap();
    let found = params::list(operator, &ParamFilter::default().mesh("mesh").name("scaler"))
        .await
        .unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].topic(), "!param:mesh:scaler:ratio");
    assert_eq!(found[0].initial_value, Some(json!(0.5)));

    found[0].update(&0.75).await.unwrap();
    eventually(|| seen.lock().len() == 2).await;
    cancel.cancel();
    task.await.unwrap().unwrap();

    assert_eq!(*seen.lock(), vec![json!(0.5), json!(0.75)]);
}

#[tokio::test]
async fn test_self_registered_process_is_running() {
    let broker = MemoryBroker::new();
    let ctx = context(&broker, "me").await;
    let dir = tempfile::tempdir().unwrap();
    let supervisor = ProcessSupervisor::new(LogFiles::new(dir.path()));

    assert!(!supervisor.is_running(&ctx).await.unwrap());
    self_register(&ctx, std::process::id()).await.unwrap();
    assert!(supervisor.is_running(&ctx).await.unwrap());
}

#[tokio::test]
async fn test_stop_without_registration_fails() {
    let broker = MemoryBroker::new();
    let ctx = context(&broker, "ghost").await;
    let dir = tempfile::tempdir().unwrap();
    let supervisor = ProcessSupervisor::new(LogFiles::new(dir.path()));

    let err = supervisor.stop(&ctx).await.unwrap_err();
    assert!(matches!(err, OrchardError::NotRegistered { ref name, .. } if name == "ghost"));
}
