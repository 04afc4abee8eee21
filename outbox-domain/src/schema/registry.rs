use super::payload_schema::PayloadSchema;
use super::versioned::VersionedEvent;
use crate::domain_event::{EventEnvelope, EventVersion};
use crate::error::SchemaError;
use std::collections::{BTreeMap, HashMap};
use tracing::warn;

/// 版本解析结果：某事件应交由哪个版本分支处理
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerVariant {
    event_type: String,
    requested: EventVersion,
    resolved: EventVersion,
}

impl HandlerVariant {
    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    /// 信封上声明的版本
    pub fn requested(&self) -> EventVersion {
        self.requested
    }

    /// 实际选用的已注册版本
    pub fn resolved(&self) -> EventVersion {
        self.resolved
    }

    /// 声明的 major 未注册，已降级到最高已知版本
    pub fn is_fallback(&self) -> bool {
        self.requested.major() != self.resolved.major()
    }
}

/// 模式注册表：按 (事件类型, 版本) 登记载荷形状，负责校验与版本分支解析
///
/// 启动时构建，之后只读（通常以 `Arc<SchemaRegistry>` 共享）。
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    schemas: HashMap<String, BTreeMap<EventVersion, PayloadSchema>>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 登记某事件类型某版本的载荷形状（重复登记时覆盖）
    pub fn register(
        mut self,
        event_type: impl Into<String>,
        version: EventVersion,
        schema: PayloadSchema,
    ) -> Self {
        self.schemas
            .entry(event_type.into())
            .or_default()
            .insert(version, schema);
        self
    }

    /// 登记一个带版本分支的事件类型的全部已知版本
    pub fn register_event<E: VersionedEvent>(self) -> Self {
        E::schemas()
            .into_iter()
            .fold(self, |registry, (version, schema)| {
                registry.register(E::EVENT_TYPE, version, schema)
            })
    }

    pub fn is_registered(&self, event_type: &str) -> bool {
        self.schemas.contains_key(event_type)
    }

    /// 某事件类型的最高已知版本
    pub fn latest_version(&self, event_type: &str) -> Option<EventVersion> {
        self.schemas
            .get(event_type)
            .and_then(|versions| versions.keys().next_back().copied())
    }

    /// 解析应使用的版本分支
    ///
    /// 精确命中优先；同 major 下取不高于声明版本的最高 minor（不存在时取该 major 最低 minor）；
    /// major 未知时降级到最高已知版本并记录告警。
    pub fn resolve_handler(
        &self,
        event_type: &str,
        version: EventVersion,
    ) -> Result<HandlerVariant, SchemaError> {
        let versions = self
            .schemas
            .get(event_type)
            .ok_or_else(|| SchemaError::UnknownEventType {
                event_type: event_type.to_string(),
            })?;

        let variant = |resolved: EventVersion| HandlerVariant {
            event_type: event_type.to_string(),
            requested: version,
            resolved,
        };

        if versions.contains_key(&version) {
            return Ok(variant(version));
        }

        let mut same_major = versions
            .keys()
            .filter(|known| known.is_compatible_with(&version));

        if let Some(known) = same_major.clone().rev().find(|known| **known <= version) {
            return Ok(variant(*known));
        }
        if let Some(known) = same_major.next() {
            return Ok(variant(*known));
        }

        let highest = versions
            .keys()
            .next_back()
            .copied()
            .ok_or_else(|| SchemaError::UnknownEventType {
                event_type: event_type.to_string(),
            })?;

        warn!(
            event_type,
            requested = %version,
            fallback = %highest,
            "unknown event version, falling back to highest known version"
        );

        Ok(variant(highest))
    }

    /// 校验信封：事件类型已注册且载荷符合所解析版本的形状
    pub fn validate(&self, envelope: EventEnvelope) -> Result<EventEnvelope, SchemaError> {
        let variant = self.resolve_handler(envelope.event_type(), envelope.version())?;

        let schema = self
            .schemas
            .get(envelope.event_type())
            .and_then(|versions| versions.get(&variant.resolved()))
            .ok_or_else(|| SchemaError::UnknownEventType {
                event_type: envelope.event_type().to_string(),
            })?;

        schema
            .check(envelope.payload())
            .map_err(|reason| SchemaError::PayloadMismatch {
                event_type: envelope.event_type().to_string(),
                version: envelope.version().to_string(),
                reason,
            })?;

        Ok(envelope)
    }
}
