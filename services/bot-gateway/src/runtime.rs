//! Runtime driver: thin wrapper over the container engine.
//!
//! Leaf dependency with no knowledge of messaging. The trait seam exists so
//! the lifecycle manager can be exercised against a mock in tests.

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, ListContainersOptions, RemoveContainerOptions,
    StartContainerOptions, StopContainerOptions,
};
use bollard::image::BuildImageOptions;
use bollard::models::{HostConfig, RestartPolicy, RestartPolicyNameEnum};
use bollard::Docker;
use futures_util::StreamExt;
use tracing::{debug, info, warn};

use crate::error::RuntimeError;

/// Request to create and start one container.
#[derive(Debug, Clone)]
pub struct CreateRequest {
    pub name: String,
    pub image: String,
    pub env: Vec<String>,
    pub network: Option<String>,
    pub mem_limit_bytes: Option<i64>,
    /// Backtest containers self-remove on completion.
    pub auto_remove: bool,
}

/// Handle to an existing container.
#[derive(Debug, Clone)]
pub struct InstanceHandle {
    pub id: String,
    pub name: String,
    pub state: String,
}

/// Projection used for fast status listing.
#[derive(Debug, Clone)]
pub struct InstanceSummary {
    pub id: String,
    pub name: String,
    pub status: String,
}

#[async_trait]
pub trait RuntimeDriver: Send + Sync {
    /// Explicit liveness probe against the engine.
    async fn ping(&self) -> Result<(), RuntimeError>;

    /// Pre-flight worker image build. Failure must not abort gateway
    /// initialization; later starts fail individually.
    async fn build_image(&self) -> Result<(), RuntimeError>;

    async fn create_and_start(&self, req: CreateRequest) -> Result<InstanceHandle, RuntimeError>;

    async fn get(&self, name: &str) -> Result<Option<InstanceHandle>, RuntimeError>;

    async fn stop(&self, name: &str, timeout_secs: i64) -> Result<(), RuntimeError>;

    async fn remove(&self, name: &str, force: bool) -> Result<(), RuntimeError>;

    /// List containers whose name starts with `prefix`.
    async fn list(&self, prefix: &str) -> Result<Vec<InstanceSummary>, RuntimeError>;
}

/// Split engine failures into the two halves of the taxonomy: transport
/// and IO errors mean the engine itself is unreachable, anything else is a
/// failure of the single operation.
fn classify(e: bollard::errors::Error) -> RuntimeError {
    use bollard::errors::Error;
    let unreachable = matches!(
        e,
        Error::IOError { .. }
            | Error::HyperResponseError { .. }
            | Error::HyperLegacyError { .. }
            | Error::RequestTimeoutError
    );
    if unreachable {
        RuntimeError::Unavailable(e.to_string())
    } else {
        RuntimeError::Operation(e.to_string())
    }
}

/// Docker-backed driver.
pub struct DockerDriver {
    docker: Docker,
    image_tag: String,
    build_context: Option<std::path::PathBuf>,
}

impl DockerDriver {
    /// Connect via local socket defaults and probe the daemon explicitly.
    /// Successful construction alone does not prove the engine is up: an
    /// unreachable engine is logged here and every later operation fails
    /// with `RuntimeError::Unavailable` until it recovers.
    pub async fn connect(
        image_tag: impl Into<String>,
        build_context: Option<std::path::PathBuf>,
    ) -> Result<Self, RuntimeError> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| RuntimeError::Unavailable(e.to_string()))?;

        match docker.ping().await {
            Ok(_) => info!("Runtime driver connected to container engine"),
            Err(e) => warn!(
                "Container engine unreachable ({}); lifecycle operations will fail until it recovers",
                e
            ),
        }

        Ok(Self {
            docker,
            image_tag: image_tag.into(),
            build_context,
        })
    }
}

#[async_trait]
impl RuntimeDriver for DockerDriver {
    async fn ping(&self) -> Result<(), RuntimeError> {
        self.docker
            .ping()
            .await
            .map(|_| ())
            .map_err(|e| RuntimeError::Unavailable(e.to_string()))
    }

    async fn build_image(&self) -> Result<(), RuntimeError> {
        let Some(context) = &self.build_context else {
            debug!("No image build context configured, assuming {} exists", self.image_tag);
            return Ok(());
        };

        let tarball = read_context(context)?;
        let options = BuildImageOptions {
            dockerfile: "Dockerfile".to_string(),
            t: self.image_tag.clone(),
            rm: true,
            ..Default::default()
        };

        let mut stream = self
            .docker
            .build_image(options, None, Some(bytes::Bytes::from(tarball)));

        while let Some(step) = stream.next().await {
            match step {
                Ok(output) => {
                    if let Some(line) = output.stream {
                        let line = line.trim();
                        if !line.is_empty() {
                            debug!("Image build: {}", line);
                        }
                    }
                }
                Err(e) => return Err(classify(e)),
            }
        }

        info!("Worker image {} built", self.image_tag);
        Ok(())
    }

    async fn create_and_start(&self, req: CreateRequest) -> Result<InstanceHandle, RuntimeError> {
        // Persistent workers restart with the host; backtests clean up
        // after themselves instead.
        let restart_policy = if req.auto_remove {
            None
        } else {
            Some(RestartPolicy {
                name: Some(RestartPolicyNameEnum::UNLESS_STOPPED),
                maximum_retry_count: None,
            })
        };

        let host_config = HostConfig {
            network_mode: req.network.clone(),
            memory: req.mem_limit_bytes,
            auto_remove: Some(req.auto_remove),
            restart_policy,
            ..Default::default()
        };

        let config = Config {
            image: Some(req.image.clone()),
            env: Some(req.env.clone()),
            host_config: Some(host_config),
            ..Default::default()
        };

        let created = self
            .docker
            .create_container(
                Some(CreateContainerOptions {
                    name: req.name.clone(),
                    platform: None,
                }),
                config,
            )
            .await
            .map_err(classify)?;

        for warning in &created.warnings {
            warn!("Container {} create warning: {}", req.name, warning);
        }

        self.docker
            .start_container(&req.name, None::<StartContainerOptions<String>>)
            .await
            .map_err(classify)?;

        Ok(InstanceHandle {
            id: created.id,
            name: req.name,
            state: "running".to_string(),
        })
    }

    async fn get(&self, name: &str) -> Result<Option<InstanceHandle>, RuntimeError> {
        match self.docker.inspect_container(name, None).await {
            Ok(details) => {
                let state = details
                    .state
                    .and_then(|s| s.status)
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| "unknown".to_string());
                Ok(Some(InstanceHandle {
                    id: details.id.unwrap_or_default(),
                    name: name.to_string(),
                    state,
                }))
            }
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => Ok(None),
            Err(e) => Err(classify(e)),
        }
    }

    async fn stop(&self, name: &str, timeout_secs: i64) -> Result<(), RuntimeError> {
        self.docker
            .stop_container(name, Some(StopContainerOptions { t: timeout_secs }))
            .await
            .map_err(classify)
    }

    async fn remove(&self, name: &str, force: bool) -> Result<(), RuntimeError> {
        self.docker
            .remove_container(
                name,
                Some(RemoveContainerOptions {
                    force,
                    ..Default::default()
                }),
            )
            .await
            .map_err(classify)
    }

    async fn list(&self, prefix: &str) -> Result<Vec<InstanceSummary>, RuntimeError> {
        let mut filters = HashMap::new();
        filters.insert("name".to_string(), vec![prefix.to_string()]);

        let containers = self
            .docker
            .list_containers(Some(ListContainersOptions {
                all: true,
                filters,
                ..Default::default()
            }))
            .await
            .map_err(classify)?;

        let summaries = containers
            .into_iter()
            .filter_map(|c| {
                // Docker reports names with a leading slash.
                let name = c
                    .names
                    .as_ref()
                    .and_then(|n| n.first())
                    .map(|n| n.trim_start_matches('/').to_string())?;
                if !name.starts_with(prefix) {
                    return None;
                }
                Some(InstanceSummary {
                    id: c.id.unwrap_or_default(),
                    name,
                    status: c.state.unwrap_or_else(|| "unknown".to_string()),
                })
            })
            .collect();

        Ok(summaries)
    }
}

fn read_context(path: &Path) -> Result<Vec<u8>, RuntimeError> {
    std::fs::read(path).map_err(|e| {
        RuntimeError::Operation(format!("cannot read build context {}: {}", path.display(), e))
    })
}
