use crate::error::SchemaError;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::str::FromStr;

/// 事件版本（major.minor）
///
/// - minor 递增：仅新增可选字段，无需迁移；
/// - major 递增：新增/删除必填字段、修改字段类型或重命名，需要显式的处理分支。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EventVersion {
    major: u32,
    minor: u32,
}

impl EventVersion {
    pub const fn new(major: u32, minor: u32) -> Self {
        Self { major, minor }
    }

    pub fn major(&self) -> u32 {
        self.major
    }

    pub fn minor(&self) -> u32 {
        self.minor
    }

    /// 是否与另一版本同属一个 major（可互相兼容读取）
    pub fn is_compatible_with(&self, other: &EventVersion) -> bool {
        self.major == other.major
    }
}

impl Default for EventVersion {
    fn default() -> Self {
        Self::new(1, 0)
    }
}

impl Display for EventVersion {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

impl FromStr for EventVersion {
    type Err = SchemaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || SchemaError::InvalidVersion {
            value: s.to_string(),
        };

        let trimmed = s.trim();
        let (major, minor) = match trimmed.split_once('.') {
            Some((major, minor)) => (major, minor),
            // 仅给出 major 时视为 major.0
            None => (trimmed, "0"),
        };

        let major = major.parse::<u32>().map_err(|_| invalid())?;
        let minor = minor.parse::<u32>().map_err(|_| invalid())?;

        Ok(Self::new(major, minor))
    }
}

impl TryFrom<String> for EventVersion {
    type Error = SchemaError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<EventVersion> for String {
    fn from(value: EventVersion) -> Self {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_major_minor_and_bare_major() {
        assert_eq!("1.2".parse::<EventVersion>().unwrap(), EventVersion::new(1, 2));
        assert_eq!("3".parse::<EventVersion>().unwrap(), EventVersion::new(3, 0));
        assert!("v1".parse::<EventVersion>().is_err());
        assert!("1.x".parse::<EventVersion>().is_err());
    }

    #[test]
    fn orders_by_major_then_minor() {
        let mut versions = vec![
            EventVersion::new(2, 0),
            EventVersion::new(1, 10),
            EventVersion::new(1, 2),
        ];
        versions.sort();
        assert_eq!(
            versions,
            vec![
                EventVersion::new(1, 2),
                EventVersion::new(1, 10),
                EventVersion::new(2, 0)
            ]
        );
    }

    #[test]
    fn serializes_as_dotted_string() {
        let json = serde_json::to_string(&EventVersion::new(2, 1)).unwrap();
        assert_eq!(json, "\"2.1\"");
        let back: EventVersion = serde_json::from_str("\"2.1\"").unwrap();
        assert_eq!(back, EventVersion::new(2, 1));
    }
}
