//! Container engine abstraction.
//!
//! [`ContainerEngine`] is the boundary to the container runtime: pull, create,
//! start, inspect, stop, remove. The provisioner and supervisor only ever see
//! this trait behind an `Arc`, so tests substitute a scripted engine
//! ([`crate::testing::StubEngine`]) without touching a daemon, and the bollard
//! transport details stay inside [`DockerEngine`].

pub mod detect;
pub mod docker;

pub use docker::{DockerEngine, connect_docker};

use std::collections::BTreeMap;

use async_trait::async_trait;
use futures::stream::BoxStream;
use thiserror::Error;

/// Errors surfaced by a container engine adapter.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The engine endpoint could not be reached.
    #[error("cannot reach container engine: {reason}")]
    Connect {
        /// Reason for failure.
        reason: String,
    },

    /// An engine API call failed.
    #[error("engine API call failed: {reason}")]
    Api {
        /// Reason for failure.
        reason: String,
    },

    /// The pull progress stream broke mid-way.
    #[error("pull stream error: {reason}")]
    Stream {
        /// Reason for failure.
        reason: String,
    },
}

/// One progress event from a streamed image pull.
#[derive(Debug, Clone, Default)]
pub struct PullProgress {
    /// Status line ("Downloading", "Pull complete", ...).
    pub status: Option<String>,
    /// Layer the event refers to, when the engine reports one.
    pub layer: Option<String>,
    /// Free-form progress detail (byte counts, progress bar).
    pub detail: Option<String>,
}

/// Everything the engine needs to create a container.
#[derive(Debug, Clone)]
pub struct ContainerSpec {
    /// Unique container name.
    pub name: String,
    /// Full image reference, `image:tag`.
    pub image: String,
    /// Container-internal ports to publish on engine-assigned host ports.
    pub exposed_ports: Vec<u16>,
    /// Environment variables injected into the container.
    pub env: Vec<(String, String)>,
    /// Host address the ports are bound to.
    pub bind_host: String,
}

/// Snapshot of a container as reported by the engine.
#[derive(Debug, Clone, Default)]
pub struct ContainerInfo {
    /// Whether the engine reports the container running.
    pub running: bool,
    /// Engine-assigned bindings, container port to host port.
    pub host_bindings: BTreeMap<u16, u16>,
}

/// Boundary to the container runtime.
#[async_trait]
pub trait ContainerEngine: Send + Sync {
    /// Check that the engine is responsive.
    async fn ping(&self) -> Result<(), EngineError>;

    /// Whether the image is already available locally.
    async fn image_present(&self, reference: &str) -> bool;

    /// Start pulling an image; the stream terminates when the pull does.
    fn pull_image(&self, reference: &str) -> BoxStream<'static, Result<PullProgress, EngineError>>;

    /// Create a container and return its id.
    async fn create_container(&self, spec: &ContainerSpec) -> Result<String, EngineError>;

    /// Start a created container.
    async fn start_container(&self, id: &str) -> Result<(), EngineError>;

    /// Inspect a container's run state and port bindings.
    async fn inspect_container(&self, id: &str) -> Result<ContainerInfo, EngineError>;

    /// Collected stdout/stderr of a container.
    async fn container_logs(&self, id: &str) -> Result<String, EngineError>;

    /// Stop a running container.
    async fn stop_container(&self, id: &str) -> Result<(), EngineError>;

    /// Remove a container, force-killing it if still running.
    async fn remove_container(&self, id: &str) -> Result<(), EngineError>;
}
