use serde_json::Value;

/// 载荷字段类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    String,
    Integer,
    Number,
    Bool,
    Object,
    Array,
    Any,
}

impl FieldKind {
    fn accepts(&self, value: &Value) -> bool {
        match self {
            FieldKind::String => value.is_string(),
            FieldKind::Integer => value.is_i64() || value.is_u64(),
            FieldKind::Number => value.is_number(),
            FieldKind::Bool => value.is_boolean(),
            FieldKind::Object => value.is_object(),
            FieldKind::Array => value.is_array(),
            FieldKind::Any => true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSpec {
    name: String,
    kind: FieldKind,
    required: bool,
}

impl FieldSpec {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> FieldKind {
        self.kind
    }

    pub fn is_required(&self) -> bool {
        self.required
    }
}

/// 某一版本事件载荷的形状描述
///
/// 载荷必须为 JSON 对象；必填字段须存在且类型匹配，可选字段存在且非 null 时须类型匹配。
/// 未声明的额外字段一律放行，使同一 major 内的新增可选字段无需迁移即可被旧消费者读取。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PayloadSchema {
    fields: Vec<FieldSpec>,
}

impl PayloadSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn required(mut self, name: impl Into<String>, kind: FieldKind) -> Self {
        self.fields.push(FieldSpec {
            name: name.into(),
            kind,
            required: true,
        });
        self
    }

    pub fn optional(mut self, name: impl Into<String>, kind: FieldKind) -> Self {
        self.fields.push(FieldSpec {
            name: name.into(),
            kind,
            required: false,
        });
        self
    }

    pub fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }

    /// 校验载荷，失败时返回人类可读的原因
    pub fn check(&self, payload: &Value) -> Result<(), String> {
        let Some(object) = payload.as_object() else {
            return Err("payload must be a JSON object".to_string());
        };

        for field in &self.fields {
            match object.get(&field.name) {
                None | Some(Value::Null) if field.required => {
                    return Err(format!("missing required field `{}`", field.name));
                }
                None | Some(Value::Null) => {}
                Some(value) if !field.kind.accepts(value) => {
                    return Err(format!(
                        "field `{}` expected {:?}, found {}",
                        field.name,
                        field.kind,
                        json_type_name(value)
                    ));
                }
                Some(_) => {}
            }
        }

        Ok(())
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
