//! 进程内事件总线（InProcessEventBus）
//!
//! 由启动时构建好的 `HandlerRegistry` 驱动，不持有任何持久状态：
//! - `emit`/`emit_envelope`：按登记顺序逐个调用；
//! - `emit_async`/`emit_envelope_async`：并发调用（上限 `concurrency`），等待全部完成；
//! - 每次调用都被隔离：错误、panic 与超时均转为 `HandlerFailure` 并记录告警。
//!
use super::bus::{DispatchReport, EventBus, FailureKind, HandlerFailure};
use super::registry::{DEFAULT_DELIMITER, HandlerRegistration, HandlerRegistry};
use crate::config::{EnvSource, ProcessEnv, millis_or, parse_or};
use crate::domain_event::EventEnvelope;
use async_trait::async_trait;
use bon::Builder;
use futures_util::{FutureExt, StreamExt, stream};
use serde_json::Value;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// 总线配置
#[derive(Debug, Clone, Builder)]
pub struct BusConfig {
    /// 事件类型的段分隔符
    #[builder(default = DEFAULT_DELIMITER)]
    pub delimiter: char,
    /// 单次处理器调用的超时
    #[builder(default = Duration::from_secs(30))]
    pub handler_timeout: Duration,
    /// `emit_async` 的并发上限
    #[builder(default = 8)]
    pub concurrency: usize,
    /// `emit` 构造信封时使用的来源
    #[builder(default = "in-process".to_string(), into)]
    pub source: String,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl BusConfig {
    /// 读取 `OUTBOX_BUS_DELIMITER`、`OUTBOX_BUS_HANDLER_TIMEOUT_MS`、`OUTBOX_BUS_CONCURRENCY`、`OUTBOX_BUS_SOURCE`
    pub fn from_env() -> Self {
        Self::from_source(&ProcessEnv)
    }

    pub fn from_source(env: &impl EnvSource) -> Self {
        let default = Self::default();
        Self {
            delimiter: parse_or(env, "OUTBOX_BUS_DELIMITER", default.delimiter),
            handler_timeout: millis_or(
                env,
                "OUTBOX_BUS_HANDLER_TIMEOUT_MS",
                default.handler_timeout,
            ),
            concurrency: parse_or(env, "OUTBOX_BUS_CONCURRENCY", default.concurrency).max(1),
            source: env.get("OUTBOX_BUS_SOURCE").unwrap_or(default.source),
        }
    }

    /// 以配置的分隔符创建空注册表
    pub fn new_registry(&self) -> HandlerRegistry {
        HandlerRegistry::with_delimiter(self.delimiter)
    }
}

#[derive(Debug, Clone)]
pub struct InProcessEventBus {
    registry: Arc<HandlerRegistry>,
    config: BusConfig,
}

impl InProcessEventBus {
    pub fn new(registry: HandlerRegistry, config: BusConfig) -> Self {
        Self {
            registry: Arc::new(registry),
            config,
        }
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    pub fn config(&self) -> &BusConfig {
        &self.config
    }

    /// 顺序分发（尽力而为，不经过 Outbox）
    pub async fn emit(&self, event_type: &str, payload: Value) -> DispatchReport {
        self.emit_envelope(&self.envelope(event_type, payload))
            .await
    }

    /// 并发分发并等待全部处理器完成
    pub async fn emit_async(&self, event_type: &str, payload: Value) -> DispatchReport {
        self.emit_envelope_async(&self.envelope(event_type, payload))
            .await
    }

    pub async fn emit_envelope(&self, envelope: &EventEnvelope) -> DispatchReport {
        let mut report = DispatchReport::new(envelope);
        for registration in self.registry.matching(envelope.event_type()) {
            let outcome = self.invoke(registration, envelope).await;
            record(&mut report, registration, outcome);
        }
        report
    }

    pub async fn emit_envelope_async(&self, envelope: &EventEnvelope) -> DispatchReport {
        let matched = self.registry.matching(envelope.event_type());
        let calls: Vec<_> = matched
            .iter()
            .map(|registration| self.invoke(registration, envelope))
            .collect();
        let outcomes: Vec<_> = stream::iter(calls)
            .buffered(self.config.concurrency.max(1))
            .collect()
            .await;

        let mut report = DispatchReport::new(envelope);
        for (registration, outcome) in matched.into_iter().zip(outcomes) {
            record(&mut report, registration, outcome);
        }
        report
    }

    fn envelope(&self, event_type: &str, payload: Value) -> EventEnvelope {
        EventEnvelope::builder()
            .event_type(event_type)
            .source(self.config.source.clone())
            .payload(payload)
            .build()
    }

    async fn invoke(
        &self,
        registration: &HandlerRegistration,
        envelope: &EventEnvelope,
    ) -> Result<(), HandlerFailure> {
        let timeout = self.config.handler_timeout;
        let call = AssertUnwindSafe(registration.handler().handle(envelope)).catch_unwind();

        let (kind, message) = match tokio::time::timeout(timeout, call).await {
            Ok(Ok(Ok(()))) => {
                debug!(
                    event_id = envelope.event_id(),
                    event_type = envelope.event_type(),
                    handler = registration.handler_name(),
                    "handler completed"
                );
                return Ok(());
            }
            Ok(Ok(Err(err))) => (FailureKind::Error, format!("{err:#}")),
            Ok(Err(panic)) => (FailureKind::Panic, panic_message(panic.as_ref())),
            Err(_) => (
                FailureKind::Timeout,
                format!("handler timed out after {}ms", timeout.as_millis()),
            ),
        };

        warn!(
            event_id = envelope.event_id(),
            event_type = envelope.event_type(),
            handler = registration.handler_name(),
            kind = %kind,
            error = %message,
            "handler failed"
        );

        Err(HandlerFailure {
            handler_name: registration.handler_name().to_string(),
            kind,
            message,
        })
    }
}

#[async_trait]
impl EventBus for InProcessEventBus {
    async fn dispatch(&self, envelope: &EventEnvelope) -> DispatchReport {
        self.emit_envelope_async(envelope).await
    }

    /// 最坏情况：所有处理器都匹配且都跑满超时，按并发上限分批
    fn dispatch_budget(&self) -> Option<Duration> {
        let waves = self.registry.len().div_ceil(self.config.concurrency.max(1));
        Some(
            self.config
                .handler_timeout
                .saturating_mul(u32::try_from(waves).unwrap_or(u32::MAX)),
        )
    }
}

fn record(
    report: &mut DispatchReport,
    registration: &HandlerRegistration,
    outcome: Result<(), HandlerFailure>,
) {
    match outcome {
        Ok(()) => report
            .succeeded
            .push(registration.handler_name().to_string()),
        Err(failure) => report.failures.push(failure),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "handler panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use tokio::sync::Barrier;

    fn fast_config() -> BusConfig {
        BusConfig::builder()
            .handler_timeout(Duration::from_millis(200))
            .build()
    }

    #[tokio::test]
    async fn emit_runs_handlers_in_registration_order() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let mut registry = HandlerRegistry::new();
        for name in ["first", "second", "third"] {
            let calls = calls.clone();
            registry = registry.subscribe_fn("order.*", name, move |_| {
                let calls = calls.clone();
                async move {
                    calls.lock().unwrap().push(name);
                    Ok(())
                }
            });
        }
        let bus = InProcessEventBus::new(registry, fast_config());

        let report = bus.emit("order.created", json!({"orderId": "A1"})).await;

        assert!(report.is_success());
        assert_eq!(report.succeeded, vec!["first", "second", "third"]);
        assert_eq!(*calls.lock().unwrap(), vec!["first", "second", "third"]);
    }

    #[tokio::test]
    async fn emit_async_runs_handlers_concurrently() {
        let barrier = Arc::new(Barrier::new(2));
        let mut registry = HandlerRegistry::new();
        for name in ["left", "right"] {
            let barrier = barrier.clone();
            registry = registry.subscribe_fn("order.created", name, move |_| {
                let barrier = barrier.clone();
                async move {
                    barrier.wait().await;
                    Ok(())
                }
            });
        }
        let bus = InProcessEventBus::new(registry, fast_config());

        // 两个处理器互相等待：只有并发调用才能都完成
        let report = bus.emit_async("order.created", json!({})).await;
        assert!(report.is_success(), "{report:?}");
        assert_eq!(report.succeeded, vec!["left", "right"]);
    }

    #[tokio::test]
    async fn failures_are_isolated_per_handler() {
        let registry = HandlerRegistry::new()
            .subscribe_fn("order.created", "errors", |_| async {
                Err(anyhow::anyhow!("smtp unavailable"))
            })
            .subscribe_fn("order.created", "panics", |_| async {
                let lines: Vec<u32> = Vec::new();
                let _ = lines[3];
                Ok(())
            })
            .subscribe_fn("order.created", "hangs", |_| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            })
            .subscribe_fn("order.created", "works", |_| async { Ok(()) });
        let bus = InProcessEventBus::new(registry, fast_config());

        for report in [
            bus.emit("order.created", json!({})).await,
            bus.emit_async("order.created", json!({})).await,
        ] {
            assert_eq!(report.succeeded, vec!["works"]);
            let kinds: HashMap<_, _> = report
                .failures
                .iter()
                .map(|f| (f.handler_name.as_str(), f.kind))
                .collect();
            assert_eq!(kinds["errors"], FailureKind::Error);
            assert_eq!(kinds["panics"], FailureKind::Panic);
            assert_eq!(kinds["hangs"], FailureKind::Timeout);

            let summary = report.error_summary().unwrap();
            assert!(summary.contains("smtp unavailable"));
            assert!(summary.contains("index out of bounds"));
        }
    }

    #[tokio::test]
    async fn unmatched_event_is_a_successful_no_op() {
        let bus = InProcessEventBus::new(HandlerRegistry::new(), BusConfig::default());
        let report = bus.dispatch(&bus.envelope("user.deleted", json!({}))).await;
        assert!(report.is_success());
        assert_eq!(report.matched(), 0);
        assert_eq!(report.error_summary(), None);
    }

    #[test]
    fn dispatch_budget_scales_with_handlers_per_wave() {
        let config = BusConfig::builder()
            .handler_timeout(Duration::from_millis(200))
            .concurrency(2)
            .build();
        let empty = InProcessEventBus::new(HandlerRegistry::new(), config.clone());
        assert_eq!(empty.dispatch_budget(), Some(Duration::ZERO));

        let mut registry = HandlerRegistry::new();
        for name in ["a", "b", "c"] {
            registry = registry.subscribe_fn("order.*", name, |_| async { Ok(()) });
        }
        let bus = InProcessEventBus::new(registry, config);
        assert_eq!(bus.dispatch_budget(), Some(Duration::from_millis(400)));
    }

    #[test]
    fn config_reads_overrides_from_source() {
        let env = |key: &str| match key {
            "OUTBOX_BUS_DELIMITER" => Some(":".to_string()),
            "OUTBOX_BUS_HANDLER_TIMEOUT_MS" => Some("1500".to_string()),
            "OUTBOX_BUS_CONCURRENCY" => Some("0".to_string()),
            _ => None,
        };
        let config = BusConfig::from_source(&env);
        assert_eq!(config.delimiter, ':');
        assert_eq!(config.handler_timeout, Duration::from_millis(1500));
        assert_eq!(config.concurrency, 1);
        assert_eq!(config.source, "in-process");
        assert_eq!(config.new_registry().delimiter(), ':');
    }
}
