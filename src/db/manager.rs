use chrono::Utc;
use futures::StreamExt;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::docker::{ContainerRuntime, ContainerSpec, ContainerState};
use crate::error::{AppError, Result};
use crate::storage::{CacheKey, CatalogStore, TtlCache};

use super::engines::DatabaseType;
use super::identity::{generate_container_name, generate_password, validate_identifier};
use super::instance::{DatabaseInstance, InstanceStatus, Principal, ResourceUsage};
use super::locks::KeyedLocks;
use super::ports::PortAllocator;

pub const DEFAULT_DB_NAME: &str = "mydatabase";

/// Result of a successful create.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedInstance {
    pub instance_url: String,
    pub container_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Transition {
    Pause,
    Unpause,
}

impl Transition {
    fn target(self) -> (ContainerState, InstanceStatus) {
        match self {
            Self::Pause => (ContainerState::Paused, InstanceStatus::Paused),
            Self::Unpause => (ContainerState::Running, InstanceStatus::Running),
        }
    }
}

/// Owns every instance state transition.
///
/// Runtime first, catalog second, cache flush last. Nothing is rolled back:
/// a failure between steps is reported and the inconsistency is left visible.
pub struct InstanceManager {
    runtime: Arc<dyn ContainerRuntime>,
    catalog: CatalogStore,
    cache: Arc<TtlCache>,
    ports: PortAllocator,
    /// Held from port selection until the catalog row holding the port exists.
    allocation: Mutex<()>,
    container_locks: KeyedLocks,
    config: Config,
}

impl InstanceManager {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        catalog: CatalogStore,
        cache: Arc<TtlCache>,
        config: Config,
    ) -> Self {
        Self {
            runtime,
            catalog,
            cache,
            ports: PortAllocator::new(config.port_range()),
            allocation: Mutex::new(()),
            container_locks: KeyedLocks::new(),
            config,
        }
    }

    pub fn catalog(&self) -> &CatalogStore {
        &self.catalog
    }

    /// Provision a new instance for `owner` and return its connection string.
    pub async fn create_instance(
        &self,
        owner: &Principal,
        db_name: Option<&str>,
    ) -> Result<CreatedInstance> {
        let db_name = match db_name.map(str::trim) {
            Some(name) if !name.is_empty() => name,
            _ => DEFAULT_DB_NAME,
        };
        validate_identifier("database name", db_name)?;
        validate_identifier("username", &owner.username)?;

        if self.catalog.find_by_name(db_name).await?.is_some() {
            warn!("Database {} already exists", db_name);
            return Err(AppError::Conflict(
                "Database with the same name already exists.".to_string(),
            ));
        }

        let database_type = DatabaseType::Postgres;
        let engine = database_type.engine();
        let image = self.config.postgres_image.as_str();

        if !self.runtime.image_available(image).await? {
            self.runtime.pull_image(image).await?;
        }

        let container_name = generate_container_name();
        let password = generate_password(self.config.credential_length);
        let host = self.config.instance_host.clone();

        let allocation = self.allocation.lock().await;
        let port = self
            .ports
            .allocate(self.runtime.as_ref(), &self.catalog)
            .await?;

        info!(
            "Creating {} instance {} for {} on port {}",
            engine.name(),
            db_name,
            owner.id,
            port
        );

        let spec = ContainerSpec {
            name: container_name.clone(),
            image: image.to_string(),
            env: engine.env_vars(db_name, &owner.username, &password),
            container_port: engine.container_port(),
            host_port: port,
            memory_mb: self.config.container_memory_mb,
            cpu_shares: self.config.container_cpu_shares,
        };

        let container_id = self.runtime.create_container(&spec).await?;
        if let Err(e) = self.runtime.start_container(&container_id).await {
            error!(
                "Container {} was created but failed to start; left in place: {}",
                container_id, e
            );
            return Err(e);
        }

        let connection_string =
            engine.connection_string(&owner.username, &password, &host, port, db_name);

        let now = Utc::now();
        let instance = DatabaseInstance {
            id: Uuid::new_v4(),
            container_id: container_id.clone(),
            container_name,
            owner: owner.id,
            instance_name: db_name.to_string(),
            database_type,
            version: "latest".to_string(),
            status: InstanceStatus::Running,
            host,
            port,
            connection_string: connection_string.clone(),
            resource_usage: ResourceUsage {
                cpu: self.config.container_cpu_shares,
                memory: self.config.container_memory_mb,
                storage: 0,
            },
            configuration: serde_json::json!({}),
            revision: 0,
            created_at: now,
            updated_at: now,
        };

        if let Err(e) = self.catalog.insert_instance(&instance).await {
            error!(
                "Container {} is running but its catalog record could not be saved: {}",
                container_id, e
            );
            return Err(e);
        }
        drop(allocation);

        if let Err(e) = self
            .catalog
            .append_owned_instance(owner.id, instance.id)
            .await
        {
            warn!(
                "Failed to add instance {} to principal {}: {}",
                instance.id, owner.id, e
            );
        }

        self.cache.flush_all();
        info!("Instance {} created in container {}", instance.id, container_id);

        Ok(CreatedInstance {
            instance_url: connection_string,
            container_id,
        })
    }

    pub async fn pause_instance(
        &self,
        principal_id: Uuid,
        container_id: &str,
    ) -> Result<DatabaseInstance> {
        self.transition(principal_id, container_id, Transition::Pause)
            .await
    }

    pub async fn unpause_instance(
        &self,
        principal_id: Uuid,
        container_id: &str,
    ) -> Result<DatabaseInstance> {
        self.transition(principal_id, container_id, Transition::Unpause)
            .await
    }

    async fn transition(
        &self,
        principal_id: Uuid,
        container_id: &str,
        transition: Transition,
    ) -> Result<DatabaseInstance> {
        let _guard = self.container_locks.lock(container_id).await;
        let record = self.authorize(principal_id, container_id).await?;
        let (runtime_state, status) = transition.target();

        let outcome = match transition {
            Transition::Pause => self.runtime.pause_container(container_id).await,
            Transition::Unpause => self.runtime.unpause_container(container_id).await,
        };
        if let Err(e) = outcome {
            if !self.already_in(container_id, &e, runtime_state).await {
                warn!("{:?} failed for container {}: {}", transition, container_id, e);
                return Err(e);
            }
            debug!("Container {} already {:?}", container_id, runtime_state);
        }

        let updated = if record.status == status {
            record
        } else {
            self.catalog
                .update_status(container_id, record.revision, status)
                .await?
        };

        self.cache.flush_all();
        info!("Container {} is now {}", container_id, status.as_str());
        Ok(updated)
    }

    /// A conflicting transition is a no-op when the runtime already reports the target state.
    async fn already_in(&self, container_id: &str, err: &AppError, target: ContainerState) -> bool {
        matches!(err, AppError::OperationConflict(_))
            && matches!(self.runtime.inspect_container(container_id).await, Ok(state) if state == target)
    }

    /// Stop, remove, then forget the instance.
    ///
    /// A failed remove after a successful stop still deletes the catalog row;
    /// the remove error is returned afterwards.
    pub async fn delete_instance(&self, principal_id: Uuid, container_id: &str) -> Result<()> {
        let _guard = self.container_locks.lock(container_id).await;
        self.authorize(principal_id, container_id).await?;

        match self.runtime.stop_container(container_id).await {
            Ok(()) | Err(AppError::ContainerNotFound(_)) => {}
            Err(e) => {
                warn!("Failed to stop container {}: {}", container_id, e);
                return Err(e);
            }
        }

        let removed = match self.runtime.remove_container(container_id).await {
            Ok(()) | Err(AppError::ContainerNotFound(_)) => Ok(()),
            Err(e) => {
                error!(
                    "Container {} stopped but not removed; deleting catalog record anyway: {}",
                    container_id, e
                );
                Err(e)
            }
        };

        self.catalog.delete_by_container_id(container_id).await?;
        self.cache.flush_all();
        info!("Instance in container {} deleted", container_id);

        removed
    }

    /// Timestamped stdout/stderr of an owned instance's container.
    pub async fn logs(&self, principal_id: Uuid, container_id: &str) -> Result<String> {
        self.authorize(principal_id, container_id).await?;

        let mut stream = self.runtime.logs(container_id).await?;
        let mut bytes = Vec::new();
        while let Some(chunk) = stream.next().await {
            bytes.extend_from_slice(&chunk?);
        }

        info!("Fetched logs for container {}", container_id);
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Catalog record for `container_id` if `principal_id` owns it.
    ///
    /// Missing and foreign records are indistinguishable to the caller.
    pub async fn authorize(&self, principal_id: Uuid, container_id: &str) -> Result<DatabaseInstance> {
        match self.catalog.find_by_container_id(container_id).await? {
            Some(record) if record.owner == principal_id => Ok(record),
            Some(_) => {
                warn!(
                    "Principal {} denied access to container {}",
                    principal_id, container_id
                );
                Err(AppError::Forbidden)
            }
            None => {
                warn!("Container {} not found in catalog", container_id);
                Err(AppError::Forbidden)
            }
        }
    }

    pub async fn get_instance(&self, principal_id: Uuid, instance_id: Uuid) -> Result<DatabaseInstance> {
        let key = CacheKey::Instance(instance_id);
        let instance = match self.cache.get::<DatabaseInstance>(&key) {
            Some(instance) => {
                debug!("Cache hit for instance {}", instance_id);
                instance
            }
            None => {
                let instance = self
                    .catalog
                    .get_instance(instance_id)
                    .await?
                    .ok_or(AppError::Forbidden)?;
                self.cache
                    .set(key, &instance, Some(self.config.cache_instance_ttl));
                instance
            }
        };

        if instance.owner != principal_id {
            return Err(AppError::Forbidden);
        }
        Ok(instance)
    }

    /// The principal's instances from the live catalog, newest first.
    pub async fn list_instances(&self, principal_id: Uuid) -> Result<Vec<DatabaseInstance>> {
        let key = CacheKey::Containers(principal_id);
        if let Some(instances) = self.cache.get::<Vec<DatabaseInstance>>(&key) {
            debug!("Cache hit for containers of {}", principal_id);
            return Ok(instances);
        }

        let instances = self.catalog.list_by_owner(principal_id).await?;
        self.cache.set(key, &instances, None);
        Ok(instances)
    }

    pub async fn profile(&self, principal_id: Uuid) -> Result<Principal> {
        let key = CacheKey::Profile(principal_id);
        if let Some(principal) = self.cache.get::<Principal>(&key) {
            debug!("Cache hit for profile {}", principal_id);
            return Ok(principal);
        }

        let principal = self
            .catalog
            .get_principal(principal_id)
            .await?
            .ok_or_else(|| AppError::NotFound("User not found".to_string()))?;
        self.cache.set(key, &principal, None);
        Ok(principal)
    }

    /// Mark catalog records whose container the runtime no longer knows as `error`.
    ///
    /// Returns how many records were marked. Nothing is recreated.
    pub async fn reconcile(&self) -> Result<usize> {
        let mut marked = 0;

        for record in self.catalog.list_instances().await? {
            if record.status == InstanceStatus::Error {
                continue;
            }

            let _guard = self.container_locks.lock(&record.container_id).await;
            match self.runtime.inspect_container(&record.container_id).await {
                Ok(_) => {}
                Err(AppError::ContainerNotFound(_)) => {
                    warn!(
                        "Container {} for instance {} is gone; marking as error",
                        record.container_id, record.id
                    );
                    match self
                        .catalog
                        .update_status(&record.container_id, record.revision, InstanceStatus::Error)
                        .await
                    {
                        Ok(_) => marked += 1,
                        Err(AppError::Conflict(_)) => {
                            debug!("Instance {} changed during reconcile", record.id);
                        }
                        Err(e) => return Err(e),
                    }
                }
                Err(e) => return Err(e),
            }
        }

        if marked > 0 {
            self.cache.flush_all();
        }
        Ok(marked)
    }
}
