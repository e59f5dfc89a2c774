//! PostgreSQL datasource: the query is executed as-is and its first row is
//! flattened into the metric map (column name to JSON-coerced value).

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::{postgres::PgPoolOptions, Column, PgPool, Row, TypeInfo};

use super::{expand_env_vars, DataSource};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostgresConfig {
    pub connection_string: String,
    #[serde(default = "default_timeout")]
    pub timeout: u64,
}

fn default_timeout() -> u64 {
    30
}

pub struct PostgresDataSource {
    pool: tokio::sync::OnceCell<PgPool>,
    connection_string: String,
    timeout_secs: u64,
}

impl PostgresDataSource {
    pub fn new(config: &PostgresConfig) -> Self {
        Self {
            pool: tokio::sync::OnceCell::new(),
            connection_string: config.connection_string.clone(),
            timeout_secs: config.timeout,
        }
    }

    async fn pool(&self) -> anyhow::Result<&PgPool> {
        self.pool
            .get_or_try_init(|| async {
                let url = expand_env_vars(&self.connection_string);
                PgPoolOptions::new()
                    .max_connections(5)
                    .acquire_timeout(Duration::from_secs(self.timeout_secs))
                    .connect(&url)
                    .await
                    .map_err(anyhow::Error::from)
            })
            .await
    }
}

#[async_trait]
impl DataSource for PostgresDataSource {
    async fn connect(&self) -> anyhow::Result<()> {
        self.pool().await?;
        Ok(())
    }

    async fn fetch(&self, query: &str) -> anyhow::Result<HashMap<String, Value>> {
        let pool = self.pool().await?;
        let row = sqlx::query(query).fetch_one(pool).await?;
        Ok(row_to_map(&row))
    }

    async fn close(&self) -> anyhow::Result<()> {
        if let Some(pool) = self.pool.get() {
            pool.close().await;
        }
        Ok(())
    }

    async fn health_check(&self) -> bool {
        matches!(self.pool().await, Ok(pool) if sqlx::query("SELECT 1").fetch_one(pool).await.is_ok())
    }
}

fn row_to_map(row: &sqlx::postgres::PgRow) -> HashMap<String, Value> {
    let mut map = HashMap::new();
    for column in row.columns() {
        let name = column.name().to_string();
        let value = match column.type_info().name() {
            "INT2" | "INT4" | "INT8" => row
                .try_get::<i64, _>(column.ordinal())
                .ok()
                .map(Value::from)
                .unwrap_or(Value::Null),
            "FLOAT4" | "FLOAT8" | "NUMERIC" => row
                .try_get::<f64, _>(column.ordinal())
                .ok()
                .and_then(|v| serde_json::Number::from_f64(v).map(Value::Number))
                .unwrap_or(Value::Null),
            "BOOL" => row
                .try_get::<bool, _>(column.ordinal())
                .ok()
                .map(Value::Bool)
                .unwrap_or(Value::Null),
            _ => row
                .try_get::<String, _>(column.ordinal())
                .ok()
                .map(Value::String)
                .unwrap_or(Value::Null),
        };
        map.insert(name, value);
    }
    map
}
