//! 环境变量配置辅助
//!
//! 各组件配置提供 `from_env()`，从 `OUTBOX_*` 变量覆盖默认值；
//! 变量缺失或解析失败时保留默认值并记录告警。
//!
use crate::error::{DomainError, DomainResult};
use chrono::{DateTime, Utc};
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

/// 变量来源；`from_env` 使用进程环境，测试可注入任意映射
pub trait EnvSource {
    fn get(&self, key: &str) -> Option<String>;
}

/// 进程环境变量
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessEnv;

impl EnvSource for ProcessEnv {
    fn get(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

impl<F> EnvSource for F
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, key: &str) -> Option<String> {
        self(key)
    }
}

pub(crate) fn parse_or<T>(env: &impl EnvSource, key: &str, default: T) -> T
where
    T: FromStr,
{
    let Some(raw) = env.get(key) else {
        return default;
    };

    match raw.trim().parse() {
        Ok(value) => value,
        Err(_) => {
            warn!(key, value = %raw, "invalid config value, using default");
            default
        }
    }
}

pub(crate) fn secs_or(env: &impl EnvSource, key: &str, default: Duration) -> Duration {
    Duration::from_secs(parse_or(env, key, default.as_secs()))
}

pub(crate) fn millis_or(env: &impl EnvSource, key: &str, default: Duration) -> Duration {
    let millis = u64::try_from(default.as_millis()).unwrap_or(u64::MAX);
    Duration::from_millis(parse_or(env, key, millis))
}

/// `now - window`；超出可表示的时间范围时返回 `InvalidValue`
#[cfg_attr(not(feature = "eventing"), allow(dead_code))]
pub(crate) fn cutoff_before(
    now: DateTime<Utc>,
    window: Duration,
    what: &str,
) -> DomainResult<DateTime<Utc>> {
    chrono::Duration::from_std(window)
        .ok()
        .and_then(|window| now.checked_sub_signed(window))
        .ok_or_else(|| {
            DomainError::invalid_value(format!(
                "{what} of {}s is out of range",
                window.as_secs()
            ))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn source(pairs: &[(&str, &str)]) -> impl EnvSource {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn missing_or_invalid_values_keep_default() {
        let env = source(&[("OUTBOX_BATCH_SIZE", "lots")]);
        assert_eq!(parse_or(&env, "OUTBOX_BATCH_SIZE", 50usize), 50);
        assert_eq!(parse_or(&env, "OUTBOX_MAX_ATTEMPTS", 3u32), 3);
    }

    #[test]
    fn durations_parse_in_their_units() {
        let env = source(&[("POLL", " 7 "), ("TIMEOUT", "250")]);
        assert_eq!(
            secs_or(&env, "POLL", Duration::from_secs(5)),
            Duration::from_secs(7)
        );
        assert_eq!(
            millis_or(&env, "TIMEOUT", Duration::from_secs(30)),
            Duration::from_millis(250)
        );
    }

    #[test]
    fn cutoff_rejects_windows_beyond_the_calendar() {
        let now = Utc::now();
        assert_eq!(
            cutoff_before(now, Duration::from_secs(60), "timeout").unwrap(),
            now - chrono::Duration::seconds(60)
        );

        let huge = Duration::from_secs(1_000_000_000_000_000);
        assert!(matches!(
            cutoff_before(now, huge, "timeout"),
            Err(DomainError::InvalidValue { .. })
        ));
        assert!(matches!(
            cutoff_before(now, Duration::MAX, "timeout"),
            Err(DomainError::InvalidValue { .. })
        ));
    }
}
