mod common;

use anyhow::Result as AnyResult;
use common::{bus, enqueue, init_tracing};
use outbox_domain::domain_event::EventVersion;
use outbox_domain::eventing::{HandlerRegistry, OutboxProcessor, PollReport, ProcessorConfig};
use outbox_domain::persist::{InMemoryOutboxStore, OutboxStatus, OutboxStore};
use outbox_domain::schema::{FieldKind, PayloadSchema, SchemaRegistry};
use serde_json::json;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn processor(
    store: &InMemoryOutboxStore,
    registry: HandlerRegistry,
    schemas: Option<SchemaRegistry>,
) -> OutboxProcessor {
    OutboxProcessor::builder()
        .store(Arc::new(store.clone()))
        .bus(bus(registry))
        .maybe_schemas(schemas.map(Arc::new))
        .config(
            ProcessorConfig::builder()
                .max_attempts(3)
                .batch_size(10)
                .build(),
        )
        .build()
}

#[tokio::test]
async fn failing_handler_retries_until_parked_as_failed() -> AnyResult<()> {
    init_tracing();
    let store = InMemoryOutboxStore::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let registry = HandlerRegistry::new().subscribe_fn("order.created", "mailer", {
        let calls = calls.clone();
        move |_| {
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(anyhow::anyhow!("smtp unavailable"))
            }
        }
    });
    let processor = processor(&store, registry, None);
    let record = enqueue(&store, "order.created", "A1", json!({"orderId": "A1"})).await;

    let first = processor.poll_once().await?;
    assert_eq!(first.retried, 1);
    let after_one = store.find(record.id()).await?.unwrap();
    assert_eq!(after_one.status(), OutboxStatus::Pending);
    assert_eq!(after_one.attempts(), 1);
    assert!(after_one.error().unwrap().contains("smtp unavailable"));

    processor.poll_once().await?;
    let last = processor.poll_once().await?;
    assert_eq!(last.failed, 1);

    let parked = store.find(record.id()).await?.unwrap();
    assert_eq!(parked.status(), OutboxStatus::Failed);
    assert_eq!(parked.attempts(), 3);

    // FAILED 不再被自动认领
    assert_eq!(processor.poll_once().await?, PollReport::default());
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    Ok(())
}

#[tokio::test]
async fn successful_dispatch_completes_record() -> AnyResult<()> {
    let store = InMemoryOutboxStore::new();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let registry = HandlerRegistry::new().subscribe_fn("order.*", "projector", {
        let seen = seen.clone();
        move |event| {
            let seen = seen.clone();
            async move {
                seen.lock().unwrap().push(event.event_id().to_string());
                Ok(())
            }
        }
    });
    let processor = processor(&store, registry, None);
    let record = enqueue(&store, "order.created", "A1", json!({"orderId": "A1"})).await;

    let report = processor.poll_once().await?;
    assert_eq!(report.claimed, 1);
    assert_eq!(report.completed, 1);

    let done = store.find(record.id()).await?.unwrap();
    assert_eq!(done.status(), OutboxStatus::Completed);
    assert!(done.processed_at().is_some());
    // 信封 event_id 与记录 id 一致
    assert_eq!(*seen.lock().unwrap(), vec![record.id().to_string()]);
    Ok(())
}

#[tokio::test]
async fn record_without_handlers_completes() -> AnyResult<()> {
    let store = InMemoryOutboxStore::new();
    let processor = processor(&store, HandlerRegistry::new(), None);
    let record = enqueue(&store, "user.deleted", "U1", json!({})).await;

    assert_eq!(processor.poll_once().await?.completed, 1);
    assert_eq!(
        store.find(record.id()).await?.unwrap().status(),
        OutboxStatus::Completed
    );
    Ok(())
}

#[tokio::test]
async fn schema_violation_is_rejected_without_retry() -> AnyResult<()> {
    let store = InMemoryOutboxStore::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let registry = HandlerRegistry::new().subscribe_fn("**", "audit", {
        let calls = calls.clone();
        move |_| {
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        }
    });
    let schemas = SchemaRegistry::new().register(
        "order.created",
        EventVersion::new(1, 0),
        PayloadSchema::new().required("orderId", FieldKind::String),
    );
    let processor = processor(&store, registry, Some(schemas));

    let bad_payload = enqueue(&store, "order.created", "A1", json!({"orderId": 42})).await;
    let unknown_type = enqueue(&store, "invoice.issued", "I1", json!({})).await;
    let valid = enqueue(&store, "order.created", "A2", json!({"orderId": "A2"})).await;

    let report = processor.poll_once().await?;
    assert_eq!(report.rejected, 2);
    assert_eq!(report.completed, 1);

    for (id, reason) in [
        (bad_payload.id(), "payload mismatch"),
        (unknown_type.id(), "unknown event type"),
    ] {
        let record = store.find(id).await?.unwrap();
        assert_eq!(record.status(), OutboxStatus::Failed);
        assert_eq!(record.attempts(), 1);
        assert!(record.error().unwrap().contains(reason));
    }
    assert_eq!(
        store.find(valid.id()).await?.unwrap().status(),
        OutboxStatus::Completed
    );
    // 被拒绝的记录从未到达处理器
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(processor.poll_once().await?.is_idle());
    Ok(())
}

#[tokio::test]
async fn aggregate_records_complete_in_creation_order() -> AnyResult<()> {
    init_tracing();
    let store = InMemoryOutboxStore::new();
    let first = enqueue(&store, "order.created", "A1", json!({"orderId": "A1"})).await;
    let second = enqueue(&store, "order.paid", "A1", json!({"orderId": "A1"})).await;
    let other = enqueue(&store, "order.created", "B1", json!({"orderId": "B1"})).await;

    let failed_once = Arc::new(Mutex::new(HashSet::new()));
    let applied = Arc::new(Mutex::new(Vec::new()));
    let first_id = first.id().to_string();
    let registry = HandlerRegistry::new().subscribe_fn("order.*", "ledger", {
        let failed_once = failed_once.clone();
        let applied = applied.clone();
        move |event| {
            let failed_once = failed_once.clone();
            let applied = applied.clone();
            let first_id = first_id.clone();
            async move {
                let id = event.event_id().to_string();
                if id == first_id && failed_once.lock().unwrap().insert(id.clone()) {
                    anyhow::bail!("ledger timeout");
                }
                applied.lock().unwrap().push(id);
                Ok(())
            }
        }
    });
    let processor = processor(&store, registry, None);

    let report = processor.poll_once().await?;
    assert_eq!(report.claimed, 3);
    assert_eq!(report.retried, 1);
    assert_eq!(report.released, 1);
    assert_eq!(report.completed, 1);

    // 被释放的记录不消耗尝试次数
    let held = store.find(second.id()).await?.unwrap();
    assert_eq!(held.status(), OutboxStatus::Pending);
    assert_eq!(held.attempts(), 0);

    let report = processor.poll_once().await?;
    assert_eq!(report.completed, 2);

    let first = store.find(first.id()).await?.unwrap();
    let second = store.find(second.id()).await?.unwrap();
    assert!(first.processed_at() <= second.processed_at());
    assert_eq!(
        *applied.lock().unwrap(),
        vec![
            other.id().to_string(),
            first.id().to_string(),
            second.id().to_string()
        ]
    );
    Ok(())
}

#[tokio::test]
async fn handler_timeout_and_panic_count_as_failures() -> AnyResult<()> {
    let store = InMemoryOutboxStore::new();
    let registry = HandlerRegistry::new()
        .subscribe_fn("order.created", "slow", |_| async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok(())
        })
        .subscribe_fn("payment.captured", "buggy", |_| async {
            let amounts: Vec<i64> = Vec::new();
            let _ = amounts[1];
            Ok(())
        });
    let processor = processor(&store, registry, None);
    let slow = enqueue(&store, "order.created", "A1", json!({})).await;
    let buggy = enqueue(&store, "payment.captured", "P1", json!({})).await;

    let report = processor.poll_once().await?;
    assert_eq!(report.retried, 2);

    let slow = store.find(slow.id()).await?.unwrap();
    assert_eq!(slow.attempts(), 1);
    assert!(slow.error().unwrap().contains("timeout"));

    let buggy = store.find(buggy.id()).await?.unwrap();
    assert_eq!(buggy.attempts(), 1);
    assert!(buggy.error().unwrap().contains("panic"));
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn started_processor_drains_outbox_until_shutdown() -> AnyResult<()> {
    let store = InMemoryOutboxStore::new();
    let handled = Arc::new(AtomicUsize::new(0));
    let registry = HandlerRegistry::new().subscribe_fn("order.*", "counter", {
        let handled = handled.clone();
        move |_| {
            let handled = handled.clone();
            async move {
                handled.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        }
    });
    let processor = Arc::new(
        OutboxProcessor::builder()
            .store(Arc::new(store.clone()))
            .bus(bus(registry))
            .config(
                ProcessorConfig::builder()
                    .poll_interval(Duration::from_millis(20))
                    .batch_size(2)
                    .build(),
            )
            .build(),
    );
    for i in 0..5 {
        enqueue(&store, "order.created", &format!("A{i}"), json!({})).await;
    }

    let scheduler = processor.start()?;
    assert_eq!(scheduler.task_names(), vec!["outbox-poll", "outbox-sweep"]);

    let _ = tokio::time::timeout(Duration::from_secs(3), async {
        while handled.load(Ordering::SeqCst) < 5 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    scheduler.shutdown();
    scheduler.join().await;

    assert_eq!(handled.load(Ordering::SeqCst), 5);
    assert_eq!(
        store
            .list_by_status(OutboxStatus::Completed, 10)
            .await?
            .len(),
        5
    );
    Ok(())
}

#[tokio::test]
async fn invalid_config_refuses_to_start() {
    let store = InMemoryOutboxStore::new();
    let processor = Arc::new(
        OutboxProcessor::builder()
            .store(Arc::new(store))
            .bus(bus(HandlerRegistry::new()))
            .config(ProcessorConfig::builder().max_attempts(0).build())
            .build(),
    );
    assert!(processor.start().is_err());
}
