//! 处理器注册表（HandlerRegistry）
//!
//! 进程启动时显式构建，之后只读。每条登记把一个事件类型模式绑定到一个处理器：
//! - 精确名称：`order.created`
//! - `*` 匹配恰好一段：`order.*`
//! - `**` 匹配零段或多段：`order.**`、`**`
//!
//! 段分隔符可配置（默认 `.`）。
//!
use super::handler::{EventHandler, TypedHandler, VersionedHandler, handler_fn};
use crate::domain_event::EventEnvelope;
use crate::schema::VersionedEvent;
use std::collections::HashSet;
use std::fmt::{Debug, Formatter};
use std::future::Future;
use std::sync::Arc;

pub const DEFAULT_DELIMITER: char = '.';

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    One,
    Many,
}

/// 事件类型模式
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventPattern {
    raw: String,
    segments: Vec<Segment>,
}

impl EventPattern {
    pub fn parse(raw: impl Into<String>, delimiter: char) -> Self {
        let raw = raw.into();
        let segments = raw
            .split(delimiter)
            .map(|part| match part {
                "*" => Segment::One,
                "**" => Segment::Many,
                literal => Segment::Literal(literal.to_string()),
            })
            .collect();

        Self { raw, segments }
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn is_wildcard(&self) -> bool {
        self.segments.iter().any(|s| !matches!(s, Segment::Literal(_)))
    }

    pub fn matches(&self, event_type: &str, delimiter: char) -> bool {
        let parts: Vec<&str> = event_type.split(delimiter).collect();
        match_segments(&self.segments, &parts)
    }
}

fn match_segments(pattern: &[Segment], parts: &[&str]) -> bool {
    match pattern.split_first() {
        None => parts.is_empty(),
        Some((Segment::Many, rest)) => {
            (0..=parts.len()).any(|skip| match_segments(rest, &parts[skip..]))
        }
        Some((Segment::One, rest)) => {
            !parts.is_empty() && match_segments(rest, &parts[1..])
        }
        Some((Segment::Literal(literal), rest)) => {
            parts.first().is_some_and(|part| part == literal) && match_segments(rest, &parts[1..])
        }
    }
}

/// 一条登记：模式 + 处理器名称 + 处理器
#[derive(Clone)]
pub struct HandlerRegistration {
    pattern: EventPattern,
    handler_name: String,
    handler: Arc<dyn EventHandler>,
}

impl HandlerRegistration {
    pub fn pattern(&self) -> &EventPattern {
        &self.pattern
    }

    pub fn handler_name(&self) -> &str {
        &self.handler_name
    }

    pub fn handler(&self) -> &Arc<dyn EventHandler> {
        &self.handler
    }
}

impl Debug for HandlerRegistration {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistration")
            .field("pattern", &self.pattern.as_str())
            .field("handler_name", &self.handler_name)
            .finish()
    }
}

/// 处理器注册表：按登记顺序保存，匹配时保持该顺序
#[derive(Debug, Clone)]
pub struct HandlerRegistry {
    delimiter: char,
    registrations: Vec<HandlerRegistration>,
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::with_delimiter(DEFAULT_DELIMITER)
    }

    pub fn with_delimiter(delimiter: char) -> Self {
        Self {
            delimiter,
            registrations: Vec::new(),
        }
    }

    pub fn delimiter(&self) -> char {
        self.delimiter
    }

    /// 登记处理器，处理器名称取自 `handler_name()`
    pub fn subscribe(self, pattern: &str, handler: Arc<dyn EventHandler>) -> Self {
        let name = handler.handler_name().to_string();
        self.subscribe_as(pattern, name, handler)
    }

    /// 以指定名称登记处理器
    pub fn subscribe_as(
        mut self,
        pattern: &str,
        handler_name: impl Into<String>,
        handler: Arc<dyn EventHandler>,
    ) -> Self {
        self.registrations.push(HandlerRegistration {
            pattern: EventPattern::parse(pattern, self.delimiter),
            handler_name: handler_name.into(),
            handler,
        });
        self
    }

    pub fn subscribe_fn<F, Fut>(self, pattern: &str, handler_name: &str, f: F) -> Self
    where
        F: Fn(EventEnvelope) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.subscribe(pattern, Arc::new(handler_fn(handler_name, f)))
    }

    /// 以 `E::EVENT_TYPE` 为模式登记版本化处理器
    pub fn subscribe_typed<E, H>(self, handler: H) -> Self
    where
        E: VersionedEvent,
        H: VersionedHandler<E> + 'static,
    {
        self.subscribe(E::EVENT_TYPE, Arc::new(TypedHandler::<E, H>::new(handler)))
    }

    pub fn registrations(&self) -> &[HandlerRegistration] {
        &self.registrations
    }

    pub fn len(&self) -> usize {
        self.registrations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registrations.is_empty()
    }

    /// 按登记顺序返回匹配的处理器；同名处理器多次命中时只保留首次登记
    pub fn matching(&self, event_type: &str) -> Vec<&HandlerRegistration> {
        let mut seen = HashSet::new();
        self.registrations
            .iter()
            .filter(|r| r.pattern.matches(event_type, self.delimiter))
            .filter(|r| seen.insert(r.handler_name.as_str()))
            .collect()
    }
}
