mod postgres;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::sync::Arc;

use crate::error::{AppError, Result};

pub use postgres::PostgresEngine;

/// Database engines an instance can run. Adding an engine adds a variant here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseType {
    Postgres,
}

impl DatabaseType {
    pub const ALL: [DatabaseType; 1] = [DatabaseType::Postgres];

    pub fn as_str(&self) -> &'static str {
        self.engine().name()
    }

    pub fn parse(name: &str) -> Result<Self> {
        match name.to_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(Self::Postgres),
            _ => Err(AppError::Validation(format!(
                "unsupported database type: {name}"
            ))),
        }
    }

    pub fn engine(&self) -> &'static dyn Engine {
        match self {
            Self::Postgres => &PostgresEngine,
        }
    }
}

/// Provisioning side of an engine: how its container is configured and reached.
pub trait Engine: Send + Sync {
    fn name(&self) -> &'static str;

    /// Port the server listens on inside the container
    fn container_port(&self) -> u16;

    /// Environment variables for container initialization
    fn env_vars(&self, db_name: &str, user: &str, password: &str) -> Vec<(String, String)>;

    /// Client-facing URL; embeds the credential in cleartext.
    fn connection_string(
        &self,
        user: &str,
        password: &str,
        host: &str,
        port: u16,
        db_name: &str,
    ) -> String;

    /// Catalog-introspection client for this engine
    fn introspector(&self) -> Arc<dyn Introspector>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub column_name: String,
    pub data_type: String,
}

/// Read-only catalog queries against a running instance.
///
/// Every call opens its own connection and drops it before returning.
#[async_trait]
pub trait Introspector: Send + Sync {
    /// Single liveness round trip; fails with `ConnectionFailed`.
    async fn ping(&self, connection_string: &str) -> Result<()>;

    /// Public-schema table names, sorted.
    async fn list_tables(&self, connection_string: &str) -> Result<Vec<String>>;

    /// Column name/type pairs in declaration order.
    async fn list_columns(&self, connection_string: &str, table: &str) -> Result<Vec<ColumnInfo>>;

    /// Every row of `table` as a JSON object. Callers validate `table` first.
    async fn fetch_rows(&self, connection_string: &str, table: &str) -> Result<Vec<JsonValue>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_accepts_aliases() {
        assert_eq!(DatabaseType::parse("Postgres").unwrap(), DatabaseType::Postgres);
        assert_eq!(DatabaseType::parse("postgresql").unwrap(), DatabaseType::Postgres);
        assert!(matches!(
            DatabaseType::parse("mongodb"),
            Err(AppError::Validation(_))
        ));
    }

    #[test]
    fn serializes_lowercase() {
        let json = serde_json::to_string(&DatabaseType::Postgres).unwrap();
        assert_eq!(json, "\"postgres\"");
        assert_eq!(DatabaseType::Postgres.as_str(), "postgres");
    }
}
