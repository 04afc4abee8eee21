#![allow(dead_code)]

use outbox_domain::eventing::{BusConfig, HandlerRegistry, InProcessEventBus};
use outbox_domain::persist::{InMemoryOutboxStore, NewOutboxRecord, OutboxRecord, OutboxWriter};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// 在独立事务中写入一条记录并提交
pub async fn enqueue(
    store: &InMemoryOutboxStore,
    event_type: &str,
    aggregate_id: &str,
    payload: Value,
) -> OutboxRecord {
    let mut tx = store.begin();
    let record = store
        .enqueue(
            &mut tx,
            NewOutboxRecord::builder()
                .event_type(event_type)
                .payload(payload)
                .aggregate_type(event_type.split('.').next().unwrap_or("unknown"))
                .aggregate_id(aggregate_id)
                .source("tests")
                .build(),
        )
        .await
        .unwrap();
    tx.commit().unwrap();
    record
}

pub fn bus(registry: HandlerRegistry) -> Arc<InProcessEventBus> {
    Arc::new(InProcessEventBus::new(
        registry,
        BusConfig::builder()
            .handler_timeout(Duration::from_millis(500))
            .build(),
    ))
}
