//! Redis datasource: the query names an `INFO` section (default `default`)
//! or, if it starts with `CMD `, a raw command to run — its reply fields (or
//! return value) become the metric map. Parsing INFO's wire format is kept
//! deliberately simple; the spec treats the concrete wire protocol as out of
//! scope for the core.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{expand_env_vars, DataSource};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    pub connection_string: String,
}

pub struct RedisDataSource {
    client: redis::Client,
}

impl RedisDataSource {
    pub fn new(config: &RedisConfig) -> anyhow::Result<Self> {
        let url = expand_env_vars(&config.connection_string);
        let client = redis::Client::open(url)?;
        Ok(Self { client })
    }
}

#[async_trait]
impl DataSource for RedisDataSource {
    async fn fetch(&self, query: &str) -> anyhow::Result<HashMap<String, Value>> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        if let Some(raw_command) = query.strip_prefix("CMD ") {
            let mut parts = raw_command.split_whitespace();
            let cmd_name = parts
                .next()
                .ok_or_else(|| anyhow::anyhow!("empty redis command"))?;
            let mut cmd = redis::cmd(cmd_name);
            for arg in parts {
                cmd.arg(arg);
            }
            let reply: redis::Value = cmd.query_async(&mut conn).await?;
            let mut map = HashMap::new();
            map.insert("value".to_string(), redis_value_to_json(&reply));
            return Ok(map);
        }

        let section = if query.is_empty() { "default" } else { query };
        let info: String = redis::cmd("INFO")
            .arg(section)
            .query_async(&mut conn)
            .await?;
        Ok(parse_info(&info))
    }

    async fn health_check(&self) -> bool {
        match self.client.get_multiplexed_async_connection().await {
            Ok(mut conn) => redis::cmd("PING")
                .query_async::<String>(&mut conn)
                .await
                .is_ok(),
            Err(_) => false,
        }
    }
}

/// Parse Redis `INFO`'s `key:value\r\n` text format into a metric map,
/// coercing values that parse as numbers.
fn parse_info(raw: &str) -> HashMap<String, Value> {
    let mut map = HashMap::new();
    for line in raw.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some((key, value)) = line.split_once(':') {
            let parsed = value
                .parse::<f64>()
                .ok()
                .and_then(serde_json::Number::from_f64)
                .map(Value::Number)
                .unwrap_or_else(|| Value::String(value.to_string()));
            map.insert(key.to_string(), parsed);
        }
    }
    map
}

/// Convert a Redis reply to JSON without depending on the exact shape of
/// `redis::Value`'s variants (which have churned across crate versions):
/// try the numeric/string conversions `FromRedisValue` already implements,
/// falling back to `Nil` on anything else.
fn redis_value_to_json(value: &redis::Value) -> Value {
    if matches!(value, redis::Value::Nil) {
        return Value::Null;
    }
    if let Ok(i) = redis::from_redis_value::<i64>(value) {
        return Value::from(i);
    }
    if let Ok(f) = redis::from_redis_value::<f64>(value) {
        if let Some(n) = serde_json::Number::from_f64(f) {
            return Value::Number(n);
        }
    }
    if let Ok(s) = redis::from_redis_value::<String>(value) {
        return Value::String(s);
    }
    Value::Null
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_info_into_typed_metrics() {
        let raw = "# Memory\r\nused_memory:1048576\r\nmaintenance_mode:enabled\r\n";
        let parsed = parse_info(raw);
        assert_eq!(parsed.get("used_memory"), Some(&Value::from(1048576.0)));
        assert_eq!(
            parsed.get("maintenance_mode"),
            Some(&Value::String("enabled".to_string()))
        );
    }
}
