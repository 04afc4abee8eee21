mod common;

use anyhow::Result as AnyResult;
use chrono::{Duration as ChronoDuration, Utc};
use common::{bus, enqueue};
use outbox_domain::error::DomainError;
use outbox_domain::eventing::{
    BusConfig, HandlerRegistry, InProcessEventBus, OutboxProcessor, ProcessorConfig,
};
use outbox_domain::persist::{InMemoryOutboxStore, OutboxStatus, OutboxStore};
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[tokio::test]
async fn aborted_cycle_is_recovered_by_sweep() -> AnyResult<()> {
    let store = InMemoryOutboxStore::new();
    let handled = Arc::new(AtomicUsize::new(0));
    let registry = HandlerRegistry::new().subscribe_fn("order.*", "projector", {
        let handled = handled.clone();
        move |_| {
            let handled = handled.clone();
            async move {
                handled.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        }
    });
    let processor = OutboxProcessor::builder()
        .store(Arc::new(store.clone()))
        .bus(bus(registry))
        .config(
            ProcessorConfig::builder()
                .processing_timeout(Duration::from_secs(120))
                .build(),
        )
        .build();

    let record = enqueue(&store, "order.created", "A1", json!({"orderId": "A1"})).await;

    // 另一个实例认领后崩溃：记录停留在 PROCESSING
    let orphaned = store.claim_batch(3, 10).await?;
    assert_eq!(orphaned.len(), 1);
    assert!(processor.poll_once().await?.is_idle());

    // 未超时的记录不会被回收
    assert_eq!(processor.sweep_once().await?.requeued, 0);

    let reclaimer = processor.reclaimer();
    assert_eq!(reclaimer.processing_timeout(), Duration::from_secs(120));
    let later = Utc::now() + ChronoDuration::minutes(5);
    assert_eq!(reclaimer.sweep_at(later).await?.requeued, 1);
    assert_eq!(reclaimer.sweep_at(later).await?.requeued, 0);

    let requeued = store.find(record.id()).await?.unwrap();
    assert_eq!(requeued.status(), OutboxStatus::Pending);
    assert_eq!(requeued.attempts(), 0);

    assert_eq!(processor.poll_once().await?.completed, 1);
    assert_eq!(handled.load(Ordering::SeqCst), 1);
    Ok(())
}

fn slow_registry(deliveries: Arc<Mutex<HashMap<String, usize>>>) -> HandlerRegistry {
    HandlerRegistry::new().subscribe_fn("order.*", "slow-projector", move |event| {
        let deliveries = deliveries.clone();
        async move {
            *deliveries
                .lock()
                .unwrap()
                .entry(event.event_id().to_string())
                .or_default() += 1;
            tokio::time::sleep(Duration::from_millis(700)).await;
            Ok(())
        }
    })
}

fn slow_instance(store: &InMemoryOutboxStore, registry: HandlerRegistry) -> Arc<OutboxProcessor> {
    let bus = InProcessEventBus::new(
        registry,
        BusConfig::builder()
            .handler_timeout(Duration::from_secs(2))
            .build(),
    );
    Arc::new(
        OutboxProcessor::builder()
            .store(Arc::new(store.clone()))
            .bus(Arc::new(bus))
            .config(
                ProcessorConfig::builder()
                    .processing_timeout(Duration::from_secs(1))
                    .build(),
            )
            .build(),
    )
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn sweep_during_slow_batch_never_delivers_twice() -> AnyResult<()> {
    common::init_tracing();
    let store = InMemoryOutboxStore::new();
    let deliveries: Arc<Mutex<HashMap<String, usize>>> = Arc::default();
    let a = slow_instance(&store, slow_registry(deliveries.clone()));
    let b = slow_instance(&store, slow_registry(deliveries.clone()));

    let mut ids = Vec::new();
    for aggregate in ["A1", "A2", "A3"] {
        let record = enqueue(&store, "order.created", aggregate, json!({})).await;
        ids.push(record.id().to_string());
    }

    // A 认领全部三条：第一条处理到 0.7s，第二条在 0.7s 刷新认领后处理到 1.4s，
    // 第三条在批次中等待，认领时间停在 0s
    let batch = tokio::spawn({
        let a = a.clone();
        async move { a.poll_once().await }
    });

    tokio::time::sleep(Duration::from_millis(1100)).await;
    let sweep = b.sweep_once().await?;
    assert_eq!(sweep.requeued, 1, "only the record still waiting in A's batch is stale");
    let b_report = b.poll_once().await?;
    assert_eq!((b_report.claimed, b_report.completed), (1, 1));

    let a_report = batch.await??;
    assert_eq!(a_report.claimed, 3);
    assert_eq!(a_report.completed, 2);
    assert_eq!(a_report.lost, 1);

    let deliveries = deliveries.lock().unwrap();
    for id in &ids {
        assert_eq!(deliveries.get(id), Some(&1), "record {id} delivered once");
    }
    for id in &ids {
        let record = store.find(id).await?.unwrap();
        assert_eq!(record.status(), OutboxStatus::Completed);
        assert_eq!(record.attempts(), 0);
    }
    Ok(())
}

#[tokio::test]
async fn processing_timeout_shorter_than_dispatch_refuses_to_start() {
    let store = InMemoryOutboxStore::new();
    let processor = slow_instance(&store, slow_registry(Arc::default()));

    let Err(err) = processor.start() else {
        panic!("processor started with a processing_timeout below the dispatch budget");
    };
    assert!(matches!(err, DomainError::InvalidValue { .. }));
    assert!(err.to_string().contains("dispatch budget"));
}
