use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::docker::{ContainerRuntime, ContainerState};
use crate::error::{AppError, Result};
use crate::storage::{CacheKey, TtlCache};

use super::engines::{ColumnInfo, DatabaseType, Introspector};
use super::instance::DatabaseInstance;
use super::manager::InstanceManager;

/// Identifies the instance an introspection call targets.
#[derive(Debug, Clone)]
pub struct Target {
    pub container_id: String,
    pub connection_string: String,
}

/// Serves catalog-introspection queries, starting dormant containers first.
pub struct AccessProxy {
    manager: Arc<InstanceManager>,
    runtime: Arc<dyn ContainerRuntime>,
    cache: Arc<TtlCache>,
    introspectors: HashMap<DatabaseType, Arc<dyn Introspector>>,
    tables_ttl: Duration,
}

impl AccessProxy {
    pub fn new(
        manager: Arc<InstanceManager>,
        runtime: Arc<dyn ContainerRuntime>,
        cache: Arc<TtlCache>,
        tables_ttl: Duration,
    ) -> Self {
        let introspectors = DatabaseType::ALL
            .into_iter()
            .map(|db_type| (db_type, db_type.engine().introspector()))
            .collect();

        Self::with_introspectors(manager, runtime, cache, tables_ttl, introspectors)
    }

    pub fn with_introspectors(
        manager: Arc<InstanceManager>,
        runtime: Arc<dyn ContainerRuntime>,
        cache: Arc<TtlCache>,
        tables_ttl: Duration,
        introspectors: HashMap<DatabaseType, Arc<dyn Introspector>>,
    ) -> Self {
        Self {
            manager,
            runtime,
            cache,
            introspectors,
            tables_ttl,
        }
    }

    fn introspector(&self, db_type: DatabaseType) -> Result<&Arc<dyn Introspector>> {
        self.introspectors
            .get(&db_type)
            .ok_or_else(|| AppError::Internal(format!("no introspector for {}", db_type.as_str())))
    }

    /// Liveness ping for an arbitrary connection string, retried once.
    pub async fn is_connected(&self, connection_string: &str) -> Result<()> {
        if connection_string.trim().is_empty() {
            return Err(AppError::Validation(
                "connectionString is required".to_string(),
            ));
        }
        let introspector = self.introspector(DatabaseType::Postgres)?;
        ping_with_retry(introspector.as_ref(), connection_string).await
    }

    pub async fn list_tables(&self, principal_id: Uuid, target: &Target) -> Result<Vec<String>> {
        let key = CacheKey::Tables {
            container_id: target.container_id.clone(),
            connection_string: target.connection_string.clone(),
        };

        self.cached(principal_id, target, key, Some(self.tables_ttl), |introspector, cs| async move {
            introspector.list_tables(&cs).await
        })
        .await
    }

    pub async fn list_columns(
        &self,
        principal_id: Uuid,
        target: &Target,
        table: &str,
    ) -> Result<Vec<ColumnInfo>> {
        let key = CacheKey::Columns {
            container_id: target.container_id.clone(),
            connection_string: target.connection_string.clone(),
            table: table.to_string(),
        };
        let table = table.to_string();

        self.cached(principal_id, target, key, None, |introspector, cs| async move {
            ensure_known_table(introspector.as_ref(), &cs, &table).await?;
            introspector.list_columns(&cs, &table).await
        })
        .await
    }

    pub async fn fetch_rows(
        &self,
        principal_id: Uuid,
        target: &Target,
        table: &str,
    ) -> Result<Vec<JsonValue>> {
        let key = CacheKey::Rows {
            container_id: target.container_id.clone(),
            connection_string: target.connection_string.clone(),
            table: table.to_string(),
        };
        let table = table.to_string();

        self.cached(principal_id, target, key, None, |introspector, cs| async move {
            ensure_known_table(introspector.as_ref(), &cs, &table).await?;
            introspector.fetch_rows(&cs, &table).await
        })
        .await
    }

    /// Ownership, cache, wake, ping, query, cache write; in that order.
    async fn cached<T, F, Fut>(
        &self,
        principal_id: Uuid,
        target: &Target,
        key: CacheKey,
        ttl: Option<Duration>,
        query: F,
    ) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce(Arc<dyn Introspector>, String) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let record = self
            .manager
            .authorize(principal_id, &target.container_id)
            .await?;
        if record.connection_string != target.connection_string {
            warn!(
                "Connection string mismatch for container {}",
                target.container_id
            );
            return Err(AppError::Forbidden);
        }

        if let Some(hit) = self.cache.get::<T>(&key) {
            debug!("Cache hit for {}", record.container_id);
            return Ok(hit);
        }

        self.ensure_running(&record).await?;

        let introspector = self.introspector(record.database_type)?.clone();
        ping_with_retry(introspector.as_ref(), &target.connection_string).await?;

        let value = query(introspector, target.connection_string.clone()).await?;
        self.cache.set(key, &value, ttl);
        Ok(value)
    }

    /// Wake-on-access: start a container that is not running and confirm it came up.
    async fn ensure_running(&self, record: &DatabaseInstance) -> Result<()> {
        let container_id = record.container_id.as_str();
        let state = self.runtime.inspect_container(container_id).await?;
        if state == ContainerState::Running {
            return Ok(());
        }

        info!("Container {} is {:?}; starting it", container_id, state);
        self.runtime
            .start_container(container_id)
            .await
            .map_err(|e| AppError::StartFailed(e.to_string()))?;

        match self.runtime.inspect_container(container_id).await? {
            ContainerState::Running => {
                info!("Container {} is running", container_id);
                Ok(())
            }
            state => {
                warn!(
                    "Container {} still {:?} after start",
                    container_id, state
                );
                Err(AppError::StartFailed(format!(
                    "container {} is not running",
                    container_id
                )))
            }
        }
    }
}

/// One ping, and one more if the first fails.
async fn ping_with_retry(introspector: &dyn Introspector, connection_string: &str) -> Result<()> {
    match introspector.ping(connection_string).await {
        Ok(()) => Ok(()),
        Err(first) => {
            debug!("Liveness ping failed, retrying once: {}", first);
            introspector.ping(connection_string).await.map_err(|e| match e {
                AppError::ConnectionFailed(_) => e,
                other => AppError::ConnectionFailed(other.to_string()),
            })
        }
    }
}

/// Table names reach SQL as identifiers, so they must name an existing public table.
async fn ensure_known_table(
    introspector: &dyn Introspector,
    connection_string: &str,
    table: &str,
) -> Result<()> {
    let tables = introspector.list_tables(connection_string).await?;
    if tables.iter().any(|t| t == table) {
        Ok(())
    } else {
        Err(AppError::Validation(format!("unknown table: {}", table)))
    }
}
