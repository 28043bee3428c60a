use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, ListContainersOptions, LogsOptions, RemoveContainerOptions,
    StartContainerOptions, StopContainerOptions,
};
use bollard::image::CreateImageOptions;
use bollard::models::{HostConfig, PortBinding};
use bollard::Docker;
use futures::stream::BoxStream;
use futures::StreamExt;
use std::collections::HashMap;
use tracing::{debug, info, warn};

use crate::error::{AppError, Result};

use super::{ContainerRuntime, ContainerSpec, ContainerState};

pub struct DockerManager {
    docker: Docker,
}

impl DockerManager {
    pub fn new() -> Result<Self> {
        let docker = Docker::connect_with_local_defaults()?;
        Ok(Self { docker })
    }

    pub async fn health_check(&self) -> Result<bool> {
        self.docker.ping().await?;
        Ok(true)
    }
}

#[async_trait]
impl ContainerRuntime for DockerManager {
    async fn create_container(&self, spec: &ContainerSpec) -> Result<String> {
        let env: Vec<String> = spec
            .env
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();

        let port_key = format!("{}/tcp", spec.container_port);
        let mut port_bindings = HashMap::new();
        port_bindings.insert(
            port_key.clone(),
            Some(vec![PortBinding {
                host_ip: None,
                host_port: Some(spec.host_port.to_string()),
            }]),
        );

        let host_config = HostConfig {
            port_bindings: Some(port_bindings),
            memory: Some(i64::from(spec.memory_mb) * 1024 * 1024),
            cpu_shares: Some(i64::from(spec.cpu_shares)),
            ..Default::default()
        };

        let mut exposed_ports = HashMap::new();
        exposed_ports.insert(port_key, HashMap::new());

        let mut labels = HashMap::new();
        labels.insert("pgdock.managed".to_string(), "true".to_string());

        let config = Config {
            image: Some(spec.image.clone()),
            env: Some(env),
            exposed_ports: Some(exposed_ports),
            host_config: Some(host_config),
            labels: Some(labels),
            ..Default::default()
        };

        let options = CreateContainerOptions {
            name: spec.name.as_str(),
            platform: None,
        };

        let response = self.docker.create_container(Some(options), config).await?;
        info!("Created container: {} ({})", spec.name, response.id);

        Ok(response.id)
    }

    async fn start_container(&self, container_id: &str) -> Result<()> {
        // Docker refuses to start a paused container; resume it instead.
        if self.inspect_container(container_id).await? == ContainerState::Paused {
            return self.unpause_container(container_id).await;
        }

        self.docker
            .start_container(container_id, None::<StartContainerOptions<String>>)
            .await?;
        info!("Started container: {}", container_id);
        Ok(())
    }

    async fn stop_container(&self, container_id: &str) -> Result<()> {
        info!("Stopping container: {}", container_id);

        let options = StopContainerOptions { t: 10 };

        match self.docker.stop_container(container_id, Some(options)).await {
            Ok(_) => {
                info!("Stopped container: {}", container_id);
                Ok(())
            }
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 304, ..
            }) => {
                warn!("Container {} was already stopped", container_id);
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn pause_container(&self, container_id: &str) -> Result<()> {
        self.docker.pause_container(container_id).await?;
        info!("Paused container: {}", container_id);
        Ok(())
    }

    async fn unpause_container(&self, container_id: &str) -> Result<()> {
        self.docker.unpause_container(container_id).await?;
        info!("Unpaused container: {}", container_id);
        Ok(())
    }

    async fn remove_container(&self, container_id: &str) -> Result<()> {
        info!("Removing container: {}", container_id);

        let options = RemoveContainerOptions {
            v: true,
            ..Default::default()
        };

        self.docker
            .remove_container(container_id, Some(options))
            .await?;

        info!("Removed container: {}", container_id);
        Ok(())
    }

    async fn inspect_container(&self, container_id: &str) -> Result<ContainerState> {
        let inspect = self.docker.inspect_container(container_id, None).await?;
        let state = inspect.state.unwrap_or_default();

        // A paused container also reports running=true.
        Ok(match (state.paused, state.running) {
            (Some(true), _) => ContainerState::Paused,
            (_, Some(true)) => ContainerState::Running,
            _ => ContainerState::Stopped,
        })
    }

    async fn logs(&self, container_id: &str) -> Result<BoxStream<'static, Result<Vec<u8>>>> {
        // Surface a missing container as an error rather than an empty stream.
        self.docker.inspect_container(container_id, None).await?;

        let options = LogsOptions::<String> {
            follow: false,
            stdout: true,
            stderr: true,
            timestamps: true,
            ..Default::default()
        };

        let stream = self
            .docker
            .logs(container_id, Some(options))
            .map(|chunk| {
                chunk
                    .map(|output| output.into_bytes().to_vec())
                    .map_err(AppError::from)
            })
            .boxed();

        Ok(stream)
    }

    async fn image_available(&self, image: &str) -> Result<bool> {
        match self.docker.inspect_image(image).await {
            Ok(inspect) => Ok(inspect.repo_tags.is_some_and(|tags| !tags.is_empty())),
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn pull_image(&self, image: &str) -> Result<()> {
        info!("Pulling image: {}", image);

        let options = CreateImageOptions {
            from_image: image,
            ..Default::default()
        };

        let mut stream = self.docker.create_image(Some(options), None, None);

        while let Some(result) = stream.next().await {
            let info = result?;
            if let Some(status) = info.status {
                debug!("Pull status: {}", status);
            }
        }

        info!("Image pulled successfully: {}", image);
        Ok(())
    }

    async fn published_ports(&self) -> Result<Vec<u16>> {
        let options = ListContainersOptions::<String> {
            all: true,
            ..Default::default()
        };

        let containers = self.docker.list_containers(Some(options)).await?;

        Ok(containers
            .iter()
            .flat_map(|c| c.ports.iter().flatten())
            .filter_map(|p| p.public_port)
            .collect())
    }
}
