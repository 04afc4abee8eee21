//! 事件处理器（EventHandler）
//!
//! 处理器以名称标识（幂等标记与失败报告均按名称记录），并提供三种构造方式：
//! - 直接实现 `EventHandler`，拿到完整信封；
//! - `handler_fn`：以闭包注册；
//! - `TypedHandler`：实现 `VersionedHandler<E>`，由注册表解析版本分支后拿到解码好的事件。
//!
use crate::domain_event::EventEnvelope;
use crate::schema::{SchemaRegistry, VersionedEvent};
use async_trait::async_trait;
use std::future::Future;
use std::marker::PhantomData;

/// 事件处理器：处理匹配到的事件
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// 处理器名称（用于幂等标记、失败报告与审计）
    fn handler_name(&self) -> &str;
    /// 处理事件
    async fn handle(&self, event: &EventEnvelope) -> anyhow::Result<()>;
}

/// 以闭包实现的处理器
pub struct FnHandler<F> {
    name: String,
    f: F,
}

/// 以闭包构造处理器，闭包拿到信封的一份拷贝
pub fn handler_fn<F, Fut>(name: impl Into<String>, f: F) -> FnHandler<F>
where
    F: Fn(EventEnvelope) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    FnHandler {
        name: name.into(),
        f,
    }
}

#[async_trait]
impl<F, Fut> EventHandler for FnHandler<F>
where
    F: Fn(EventEnvelope) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    fn handler_name(&self) -> &str {
        &self.name
    }

    async fn handle(&self, event: &EventEnvelope) -> anyhow::Result<()> {
        (self.f)(event.clone()).await
    }
}

/// 版本化事件处理器：按 major 分支匹配 `E` 的变体
#[async_trait]
pub trait VersionedHandler<E: VersionedEvent>: Send + Sync {
    fn handler_name(&self) -> &str;

    async fn handle(&self, event: E, envelope: &EventEnvelope) -> anyhow::Result<()>;
}

/// 将 `VersionedHandler<E>` 适配为总线处理器
pub struct TypedHandler<E, H> {
    schemas: SchemaRegistry,
    inner: H,
    _event: PhantomData<fn() -> E>,
}

impl<E, H> TypedHandler<E, H>
where
    E: VersionedEvent,
    H: VersionedHandler<E>,
{
    pub fn new(inner: H) -> Self {
        Self {
            schemas: SchemaRegistry::new().register_event::<E>(),
            inner,
            _event: PhantomData,
        }
    }

    pub fn inner(&self) -> &H {
        &self.inner
    }
}

#[async_trait]
impl<E, H> EventHandler for TypedHandler<E, H>
where
    E: VersionedEvent,
    H: VersionedHandler<E>,
{
    fn handler_name(&self) -> &str {
        self.inner.handler_name()
    }

    async fn handle(&self, event: &EventEnvelope) -> anyhow::Result<()> {
        let variant = self
            .schemas
            .resolve_handler(event.event_type(), event.version())?;
        let decoded = E::decode(&variant, event.payload())?;
        self.inner.handle(decoded, event).await
    }
}
