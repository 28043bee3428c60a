mod container;

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::error::Result;

pub use container::DockerManager;

/// Everything needed to create one instance container.
#[derive(Debug, Clone)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub env: Vec<(String, String)>,
    pub container_port: u16,
    pub host_port: u16,
    pub memory_mb: u32,
    pub cpu_shares: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerState {
    Running,
    Paused,
    Stopped,
}

/// Capability surface over the container runtime.
///
/// Implementations never retry; failures surface as `RuntimeUnavailable`,
/// `ContainerNotFound` or `OperationConflict`.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Create (but do not start) a container; returns its id.
    async fn create_container(&self, spec: &ContainerSpec) -> Result<String>;

    /// Start a stopped container, or resume a paused one.
    async fn start_container(&self, container_id: &str) -> Result<()>;

    /// Stop a container. Already-stopped and paused containers are accepted.
    async fn stop_container(&self, container_id: &str) -> Result<()>;

    async fn pause_container(&self, container_id: &str) -> Result<()>;

    async fn unpause_container(&self, container_id: &str) -> Result<()>;

    async fn remove_container(&self, container_id: &str) -> Result<()>;

    async fn inspect_container(&self, container_id: &str) -> Result<ContainerState>;

    /// Timestamped stdout and stderr, in emission order.
    async fn logs(&self, container_id: &str) -> Result<BoxStream<'static, Result<Vec<u8>>>>;

    async fn image_available(&self, image: &str) -> Result<bool>;

    async fn pull_image(&self, image: &str) -> Result<()>;

    /// Host ports currently published by any container on this runtime.
    async fn published_ports(&self) -> Result<Vec<u16>>;
}
