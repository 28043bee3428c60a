use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::info;
use uuid::Uuid;

use crate::db::engines::DatabaseType;
use crate::db::instance::{DatabaseInstance, InstanceStatus, Principal, ResourceUsage};
use crate::error::{AppError, Result};

const INSTANCE_COLUMNS: &str = "id, container_id, container_name, owner, instance_name, \
     database_type, version, status, host, port, connection_string, cpu, memory, storage, \
     configuration, revision, created_at, updated_at";

const PRINCIPAL_COLUMNS: &str =
    "id, username, email, credential_hash, is_active, database_instances, created_at, updated_at";

/// SQLite-backed catalog of instances and principals.
///
/// Every worker process opens the same file; uniqueness and revision checks
/// are enforced by SQLite, so they hold across processes.
#[derive(Clone)]
pub struct CatalogStore {
    conn: Arc<Mutex<Connection>>,
}

impl CatalogStore {
    /// Open the catalog, initializing the schema if needed
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        if let Some(parent) = db_path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    AppError::Storage(format!("Failed to create catalog directory: {}", e))
                })?;
            }
        }

        let conn = Connection::open(db_path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |_| Ok(()))?;
        Self::init(conn)
    }

    pub fn in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            r#"
            PRAGMA foreign_keys = ON;

            CREATE TABLE IF NOT EXISTS principals (
                id TEXT PRIMARY KEY,
                username TEXT NOT NULL UNIQUE,
                email TEXT NOT NULL UNIQUE,
                credential_hash TEXT NOT NULL,
                is_active INTEGER NOT NULL DEFAULT 1,
                database_instances TEXT NOT NULL DEFAULT '[]',
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS instances (
                id TEXT PRIMARY KEY,
                container_id TEXT NOT NULL UNIQUE,
                container_name TEXT NOT NULL,
                owner TEXT NOT NULL REFERENCES principals(id),
                instance_name TEXT NOT NULL UNIQUE,
                database_type TEXT NOT NULL,
                version TEXT NOT NULL,
                status TEXT NOT NULL,
                host TEXT NOT NULL,
                port INTEGER NOT NULL UNIQUE,
                connection_string TEXT NOT NULL,
                cpu INTEGER NOT NULL,
                memory INTEGER NOT NULL,
                storage INTEGER NOT NULL,
                configuration TEXT NOT NULL,
                revision INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_instances_owner ON instances(owner);
            "#,
        )?;

        info!("Catalog store initialized");

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `f` on the connection off the async executor.
    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn
                .lock()
                .map_err(|_| AppError::Storage("catalog connection poisoned".to_string()))?;
            f(&conn)
        })
        .await
        .map_err(|e| AppError::Internal(format!("catalog task failed: {}", e)))?
    }

    // ------------------------------------------------------------------
    // Instances
    // ------------------------------------------------------------------

    pub async fn insert_instance(&self, instance: &DatabaseInstance) -> Result<()> {
        let instance = instance.clone();
        self.with_conn(move |conn| {
            let configuration = serde_json::to_string(&instance.configuration)
                .map_err(|e| AppError::Internal(e.to_string()))?;
            conn.execute(
                &format!(
                    "INSERT INTO instances ({INSTANCE_COLUMNS}) VALUES \
                     (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)"
                ),
                params![
                    instance.id.to_string(),
                    instance.container_id,
                    instance.container_name,
                    instance.owner.to_string(),
                    instance.instance_name,
                    instance.database_type.as_str(),
                    instance.version,
                    instance.status.as_str(),
                    instance.host,
                    instance.port,
                    instance.connection_string,
                    instance.resource_usage.cpu,
                    instance.resource_usage.memory,
                    instance.resource_usage.storage,
                    configuration,
                    instance.revision,
                    instance.created_at.to_rfc3339(),
                    instance.updated_at.to_rfc3339(),
                ],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn get_instance(&self, id: Uuid) -> Result<Option<DatabaseInstance>> {
        self.query_one_instance("id", id.to_string()).await
    }

    pub async fn find_by_container_id(&self, container_id: &str) -> Result<Option<DatabaseInstance>> {
        self.query_one_instance("container_id", container_id.to_string())
            .await
    }

    pub async fn find_by_name(&self, instance_name: &str) -> Result<Option<DatabaseInstance>> {
        self.query_one_instance("instance_name", instance_name.to_string())
            .await
    }

    async fn query_one_instance(
        &self,
        column: &'static str,
        value: String,
    ) -> Result<Option<DatabaseInstance>> {
        self.with_conn(move |conn| {
            let instance = conn
                .query_row(
                    &format!("SELECT {INSTANCE_COLUMNS} FROM instances WHERE {column} = ?1"),
                    params![value],
                    row_to_instance,
                )
                .optional()?;
            Ok(instance)
        })
        .await
    }

    /// Instances owned by `owner`, newest first
    pub async fn list_by_owner(&self, owner: Uuid) -> Result<Vec<DatabaseInstance>> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {INSTANCE_COLUMNS} FROM instances WHERE owner = ?1 \
                 ORDER BY created_at DESC"
            ))?;
            let instances = stmt
                .query_map(params![owner.to_string()], row_to_instance)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(instances)
        })
        .await
    }

    pub async fn list_instances(&self) -> Result<Vec<DatabaseInstance>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!("SELECT {INSTANCE_COLUMNS} FROM instances"))?;
            let instances = stmt
                .query_map([], row_to_instance)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(instances)
        })
        .await
    }

    pub async fn list_ports(&self) -> Result<Vec<u16>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT port FROM instances")?;
            let ports = stmt
                .query_map([], |row| row.get::<_, u16>(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(ports)
        })
        .await
    }

    /// Compare-and-set the status of one instance.
    ///
    /// Succeeds only if the stored revision still equals `expected_revision`;
    /// otherwise another writer got there first and `Conflict` is returned.
    pub async fn update_status(
        &self,
        container_id: &str,
        expected_revision: i64,
        status: InstanceStatus,
    ) -> Result<DatabaseInstance> {
        let container_id = container_id.to_string();
        self.with_conn(move |conn| {
            let now = Utc::now().to_rfc3339();
            let updated = conn.execute(
                "UPDATE instances SET status = ?1, revision = revision + 1, updated_at = ?2 \
                 WHERE container_id = ?3 AND revision = ?4",
                params![status.as_str(), now, container_id, expected_revision],
            )?;

            if updated == 0 {
                return Err(AppError::Conflict(
                    "instance was modified concurrently".to_string(),
                ));
            }

            let instance = conn.query_row(
                &format!("SELECT {INSTANCE_COLUMNS} FROM instances WHERE container_id = ?1"),
                params![container_id],
                row_to_instance,
            )?;
            Ok(instance)
        })
        .await
    }

    /// Returns whether a row was removed.
    pub async fn delete_by_container_id(&self, container_id: &str) -> Result<bool> {
        let container_id = container_id.to_string();
        self.with_conn(move |conn| {
            let deleted = conn.execute(
                "DELETE FROM instances WHERE container_id = ?1",
                params![container_id],
            )?;
            Ok(deleted > 0)
        })
        .await
    }

    // ------------------------------------------------------------------
    // Principals
    // ------------------------------------------------------------------

    pub async fn insert_principal(&self, principal: &Principal) -> Result<()> {
        let principal = principal.clone();
        self.with_conn(move |conn| {
            let owned = serde_json::to_string(&principal.database_instances)
                .map_err(|e| AppError::Internal(e.to_string()))?;
            conn.execute(
                &format!(
                    "INSERT INTO principals ({PRINCIPAL_COLUMNS}) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"
                ),
                params![
                    principal.id.to_string(),
                    principal.username,
                    principal.email,
                    principal.credential_hash,
                    principal.is_active,
                    owned,
                    principal.created_at.to_rfc3339(),
                    principal.updated_at.to_rfc3339(),
                ],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn get_principal(&self, id: Uuid) -> Result<Option<Principal>> {
        self.with_conn(move |conn| {
            let principal = conn
                .query_row(
                    &format!("SELECT {PRINCIPAL_COLUMNS} FROM principals WHERE id = ?1"),
                    params![id.to_string()],
                    row_to_principal,
                )
                .optional()?;
            Ok(principal)
        })
        .await
    }

    /// Append to the owned-instance index. Entries are never removed.
    pub async fn append_owned_instance(&self, principal_id: Uuid, instance_id: Uuid) -> Result<()> {
        self.with_conn(move |conn| {
            let tx = conn.unchecked_transaction()?;
            let owned: Option<String> = tx
                .query_row(
                    "SELECT database_instances FROM principals WHERE id = ?1",
                    params![principal_id.to_string()],
                    |row| row.get(0),
                )
                .optional()?;
            let owned = owned
                .ok_or_else(|| AppError::NotFound(format!("principal {}", principal_id)))?;

            let mut ids: Vec<Uuid> = serde_json::from_str(&owned)
                .map_err(|e| AppError::Storage(format!("corrupt owned-instance list: {}", e)))?;
            ids.push(instance_id);
            let owned = serde_json::to_string(&ids).map_err(|e| AppError::Internal(e.to_string()))?;

            tx.execute(
                "UPDATE principals SET database_instances = ?1, updated_at = ?2 WHERE id = ?3",
                params![owned, Utc::now().to_rfc3339(), principal_id.to_string()],
            )?;
            tx.commit()?;
            Ok(())
        })
        .await
    }
}

fn conversion_error<E>(idx: usize, e: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e))
}

fn invalid_value(idx: usize, what: &str, value: &str) -> rusqlite::Error {
    conversion_error(
        idx,
        std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("invalid {}: {}", what, value),
        ),
    )
}

fn get_uuid(row: &Row, idx: usize) -> rusqlite::Result<Uuid> {
    let s: String = row.get(idx)?;
    Uuid::parse_str(&s).map_err(|e| conversion_error(idx, e))
}

fn get_timestamp(row: &Row, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let s: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion_error(idx, e))
}

fn get_json<T: serde::de::DeserializeOwned>(row: &Row, idx: usize) -> rusqlite::Result<T> {
    let s: String = row.get(idx)?;
    serde_json::from_str(&s).map_err(|e| conversion_error(idx, e))
}

fn row_to_instance(row: &Row) -> rusqlite::Result<DatabaseInstance> {
    let database_type: String = row.get(5)?;
    let status: String = row.get(7)?;

    Ok(DatabaseInstance {
        id: get_uuid(row, 0)?,
        container_id: row.get(1)?,
        container_name: row.get(2)?,
        owner: get_uuid(row, 3)?,
        instance_name: row.get(4)?,
        database_type: DatabaseType::parse(&database_type)
            .map_err(|_| invalid_value(5, "database type", &database_type))?,
        version: row.get(6)?,
        status: InstanceStatus::from_str(&status)
            .ok_or_else(|| invalid_value(7, "status", &status))?,
        host: row.get(8)?,
        port: row.get(9)?,
        connection_string: row.get(10)?,
        resource_usage: ResourceUsage {
            cpu: row.get(11)?,
            memory: row.get(12)?,
            storage: row.get(13)?,
        },
        configuration: get_json(row, 14)?,
        revision: row.get(15)?,
        created_at: get_timestamp(row, 16)?,
        updated_at: get_timestamp(row, 17)?,
    })
}

fn row_to_principal(row: &Row) -> rusqlite::Result<Principal> {
    Ok(Principal {
        id: get_uuid(row, 0)?,
        username: row.get(1)?,
        email: row.get(2)?,
        credential_hash: row.get(3)?,
        is_active: row.get(4)?,
        database_instances: get_json(row, 5)?,
        created_at: get_timestamp(row, 6)?,
        updated_at: get_timestamp(row, 7)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{sample_instance, seed_principal};

    #[tokio::test]
    async fn insert_and_find() {
        let catalog = CatalogStore::in_memory().unwrap();
        let alice = seed_principal(&catalog, "alice").await;
        let instance = sample_instance("mydatabase", alice.id);
        catalog.insert_instance(&instance).await.unwrap();

        let by_container = catalog
            .find_by_container_id(&instance.container_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(by_container, instance);

        let by_name = catalog.find_by_name("mydatabase").await.unwrap().unwrap();
        assert_eq!(by_name.id, instance.id);
        assert!(catalog.find_by_name("other").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn duplicate_name_or_port_is_conflict() {
        let catalog = CatalogStore::in_memory().unwrap();
        let alice = seed_principal(&catalog, "alice").await;
        let first = sample_instance("mydatabase", alice.id);
        catalog.insert_instance(&first).await.unwrap();

        let same_name = sample_instance("mydatabase", alice.id);
        assert!(matches!(
            catalog.insert_instance(&same_name).await,
            Err(AppError::Conflict(_))
        ));

        let mut same_port = sample_instance("another", alice.id);
        same_port.port = first.port;
        assert!(matches!(
            catalog.insert_instance(&same_port).await,
            Err(AppError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn owner_must_exist() {
        let catalog = CatalogStore::in_memory().unwrap();
        let orphan = sample_instance("mydatabase", Uuid::new_v4());
        assert!(catalog.insert_instance(&orphan).await.is_err());
    }

    #[tokio::test]
    async fn status_update_is_compare_and_set() {
        let catalog = CatalogStore::in_memory().unwrap();
        let alice = seed_principal(&catalog, "alice").await;
        let instance = sample_instance("mydatabase", alice.id);
        catalog.insert_instance(&instance).await.unwrap();

        let paused = catalog
            .update_status(&instance.container_id, 0, InstanceStatus::Paused)
            .await
            .unwrap();
        assert_eq!(paused.status, InstanceStatus::Paused);
        assert_eq!(paused.revision, 1);

        // A writer holding the stale revision loses.
        let stale = catalog
            .update_status(&instance.container_id, 0, InstanceStatus::Running)
            .await;
        assert!(matches!(stale, Err(AppError::Conflict(_))));

        let current = catalog
            .find_by_container_id(&instance.container_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(current.status, InstanceStatus::Paused);
    }

    #[tokio::test]
    async fn owned_instances_are_append_only() {
        let catalog = CatalogStore::in_memory().unwrap();
        let alice = seed_principal(&catalog, "alice").await;
        let instance = sample_instance("mydatabase", alice.id);
        catalog.insert_instance(&instance).await.unwrap();
        catalog
            .append_owned_instance(alice.id, instance.id)
            .await
            .unwrap();

        assert!(catalog
            .delete_by_container_id(&instance.container_id)
            .await
            .unwrap());

        let principal = catalog.get_principal(alice.id).await.unwrap().unwrap();
        assert_eq!(principal.database_instances, vec![instance.id]);
        assert!(catalog.list_by_owner(alice.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn list_by_owner_is_newest_first() {
        let catalog = CatalogStore::in_memory().unwrap();
        let alice = seed_principal(&catalog, "alice").await;
        let bob = seed_principal(&catalog, "bob").await;

        let mut older = sample_instance("older", alice.id);
        older.created_at = Utc::now() - chrono::Duration::minutes(5);
        let newer = sample_instance("newer", alice.id);
        let foreign = sample_instance("foreign", bob.id);
        for instance in [&older, &newer, &foreign] {
            catalog.insert_instance(instance).await.unwrap();
        }

        let names: Vec<String> = catalog
            .list_by_owner(alice.id)
            .await
            .unwrap()
            .into_iter()
            .map(|i| i.instance_name)
            .collect();
        assert_eq!(names, vec!["newer", "older"]);
    }

    #[tokio::test]
    async fn file_backed_catalog_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("catalog.db");

        let alice_id = {
            let catalog = CatalogStore::new(&path).unwrap();
            seed_principal(&catalog, "alice").await.id
        };

        let reopened = CatalogStore::new(&path).unwrap();
        let principal = reopened.get_principal(alice_id).await.unwrap().unwrap();
        assert_eq!(principal.username, "alice");
    }
}
