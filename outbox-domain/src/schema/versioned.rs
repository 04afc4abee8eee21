use super::payload_schema::PayloadSchema;
use super::registry::HandlerVariant;
use crate::domain_event::EventVersion;
use crate::error::SchemaError;
use serde::de::DeserializeOwned;
use serde_json::Value;

/// 带版本分支的事件：每个 major 对应一个变体（tagged variant）
///
/// 由 `SchemaRegistry` 解析出 `HandlerVariant` 后再解码，处理器拿到的是已经区分好
/// 版本的枚举值，不需要自行嗅探载荷字段。
///
/// ```ignore
/// enum OrderCreated {
///     V1(OrderCreatedV1),
///     V2(OrderCreatedV2),
/// }
/// ```
pub trait VersionedEvent: Sized + Send + Sync + 'static {
    /// 事件类型（点分名称）
    const EVENT_TYPE: &'static str;

    /// 全部已知版本及其载荷形状
    fn schemas() -> Vec<(EventVersion, PayloadSchema)>;

    /// 按解析出的版本分支解码载荷
    fn decode(variant: &HandlerVariant, payload: &Value) -> Result<Self, SchemaError>;
}

/// 将载荷反序列化为某个版本分支的具体结构
pub fn decode_payload<T: DeserializeOwned>(
    variant: &HandlerVariant,
    payload: &Value,
) -> Result<T, SchemaError> {
    serde_json::from_value(payload.clone()).map_err(|e| SchemaError::Decode {
        event_type: variant.event_type().to_string(),
        version: variant.resolved().to_string(),
        reason: e.to_string(),
    })
}
