//! Docker implementation of the container engine boundary, via bollard.

use std::collections::{BTreeMap, HashMap};

use bollard::Docker;
use bollard::container::{
    Config, CreateContainerOptions, LogsOptions, RemoveContainerOptions, StartContainerOptions,
    StopContainerOptions,
};
use bollard::image::CreateImageOptions;
use bollard::models::{HostConfig, PortBinding};
use futures::StreamExt;
use futures::stream::BoxStream;
use tokio_stream::wrappers::ReceiverStream;

use crate::engine::{ContainerEngine, ContainerInfo, ContainerSpec, EngineError, PullProgress};

/// Seconds a container gets to stop gracefully before the kill.
const DEFAULT_STOP_GRACE_SECS: i64 = 10;

/// Connect to the local Docker daemon.
///
/// Tries bollard's default connection (`DOCKER_HOST`, standard socket, named
/// pipe on Windows) first, then the rootless socket under the user runtime
/// directory on Unix. A connection only counts once the daemon answers a ping.
pub async fn connect_docker() -> Result<Docker, EngineError> {
    if let Ok(docker) = Docker::connect_with_local_defaults() {
        if docker.ping().await.is_ok() {
            return Ok(docker);
        }
    }

    #[cfg(unix)]
    if let Ok(runtime_dir) = std::env::var("XDG_RUNTIME_DIR") {
        let socket = format!("{runtime_dir}/docker.sock");
        if std::path::Path::new(&socket).exists() {
            let docker = Docker::connect_with_socket(&socket, 120, bollard::API_DEFAULT_VERSION)
                .map_err(|e| EngineError::Connect {
                    reason: e.to_string(),
                })?;
            if docker.ping().await.is_ok() {
                tracing::debug!("connected to rootless Docker socket at {}", socket);
                return Ok(docker);
            }
        }
    }

    Err(EngineError::Connect {
        reason: "no responsive Docker socket found".to_string(),
    })
}

/// [`ContainerEngine`] backed by a Docker daemon.
pub struct DockerEngine {
    docker: Docker,
    stop_grace_secs: i64,
}

impl DockerEngine {
    /// Wrap an already-connected bollard client.
    pub fn new(docker: Docker) -> Self {
        Self {
            docker,
            stop_grace_secs: DEFAULT_STOP_GRACE_SECS,
        }
    }

    /// Connect to the local daemon and wrap it.
    pub async fn connect() -> Result<Self, EngineError> {
        Ok(Self::new(connect_docker().await?))
    }

    /// Override the graceful-stop window.
    pub fn with_stop_grace_secs(mut self, secs: i64) -> Self {
        self.stop_grace_secs = secs;
        self
    }

    fn api_err(e: bollard::errors::Error) -> EngineError {
        EngineError::Api {
            reason: e.to_string(),
        }
    }
}

#[async_trait::async_trait]
impl ContainerEngine for DockerEngine {
    async fn ping(&self) -> Result<(), EngineError> {
        self.docker.ping().await.map(|_| ()).map_err(Self::api_err)
    }

    async fn image_present(&self, reference: &str) -> bool {
        self.docker.inspect_image(reference).await.is_ok()
    }

    fn pull_image(&self, reference: &str) -> BoxStream<'static, Result<PullProgress, EngineError>> {
        let docker = self.docker.clone();
        let reference = reference.to_string();
        let (tx, rx) = tokio::sync::mpsc::channel(16);

        tokio::spawn(async move {
            let options = CreateImageOptions {
                from_image: reference,
                ..Default::default()
            };
            let mut stream = docker.create_image(Some(options), None, None);
            while let Some(item) = stream.next().await {
                let mapped = match item {
                    Ok(info) => Ok(PullProgress {
                        status: info.status,
                        layer: info.id,
                        detail: info.progress,
                    }),
                    Err(e) => Err(EngineError::Stream {
                        reason: e.to_string(),
                    }),
                };
                if tx.send(mapped).await.is_err() {
                    // Receiver gone: the pull budget elapsed and nobody is
                    // watching anymore.
                    break;
                }
            }
        });

        Box::pin(ReceiverStream::new(rx))
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<String, EngineError> {
        let mut port_bindings = HashMap::new();
        for port in &spec.exposed_ports {
            // host_port left unset: the engine assigns a free port, which we
            // read back from inspect after start.
            port_bindings.insert(
                format!("{port}/tcp"),
                Some(vec![PortBinding {
                    host_ip: Some(spec.bind_host.clone()),
                    host_port: None,
                }]),
            );
        }

        let exposed_ports: HashMap<String, HashMap<(), ()>> = spec
            .exposed_ports
            .iter()
            .map(|port| (format!("{port}/tcp"), HashMap::new()))
            .collect();

        let env: Vec<String> = spec
            .env
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect();

        let host_config = HostConfig {
            port_bindings: Some(port_bindings),
            auto_remove: Some(false),
            ..Default::default()
        };

        let config = Config {
            image: Some(spec.image.clone()),
            env: if env.is_empty() { None } else { Some(env) },
            exposed_ports: Some(exposed_ports),
            host_config: Some(host_config),
            ..Default::default()
        };

        let options = CreateContainerOptions {
            name: spec.name.clone(),
            ..Default::default()
        };

        let response = self
            .docker
            .create_container(Some(options), config)
            .await
            .map_err(Self::api_err)?;

        Ok(response.id)
    }

    async fn start_container(&self, id: &str) -> Result<(), EngineError> {
        self.docker
            .start_container(id, None::<StartContainerOptions<String>>)
            .await
            .map_err(Self::api_err)
    }

    async fn inspect_container(&self, id: &str) -> Result<ContainerInfo, EngineError> {
        let response = self
            .docker
            .inspect_container(id, None)
            .await
            .map_err(Self::api_err)?;

        let running = response
            .state
            .as_ref()
            .and_then(|s| s.running)
            .unwrap_or(false);

        let mut host_bindings = BTreeMap::new();
        if let Some(ports) = response.network_settings.and_then(|n| n.ports) {
            for (key, bindings) in ports {
                let Some(container_port) = key
                    .split('/')
                    .next()
                    .and_then(|p| p.parse::<u16>().ok())
                else {
                    continue;
                };
                let Some(host_port) = bindings
                    .as_ref()
                    .and_then(|b| b.first())
                    .and_then(|b| b.host_port.as_deref())
                    .and_then(|p| p.parse::<u16>().ok())
                else {
                    continue;
                };
                host_bindings.insert(container_port, host_port);
            }
        }

        Ok(ContainerInfo {
            running,
            host_bindings,
        })
    }

    async fn container_logs(&self, id: &str) -> Result<String, EngineError> {
        let options = LogsOptions::<String> {
            stdout: true,
            stderr: true,
            tail: "all".to_string(),
            ..Default::default()
        };

        let mut stream = self.docker.logs(id, Some(options));
        let mut collected = String::new();
        while let Some(chunk) = stream.next().await {
            match chunk {
                Ok(output) => collected.push_str(&output.to_string()),
                Err(e) => return Err(Self::api_err(e)),
            }
        }
        Ok(collected)
    }

    async fn stop_container(&self, id: &str) -> Result<(), EngineError> {
        self.docker
            .stop_container(
                id,
                Some(StopContainerOptions {
                    t: self.stop_grace_secs,
                }),
            )
            .await
            .map_err(Self::api_err)
    }

    async fn remove_container(&self, id: &str) -> Result<(), EngineError> {
        self.docker
            .remove_container(
                id,
                Some(RemoveContainerOptions {
                    force: true,
                    ..Default::default()
                }),
            )
            .await
            .map_err(Self::api_err)
    }
}
