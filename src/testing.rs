//! Test doubles for the container engine.
//!
//! [`StubEngine`] scripts engine behavior without a daemon: it counts every
//! call, hands out fake container ids, and can be told to fail at any stage.
//! Point a [`Provisioner`](crate::provisioner::Provisioner) at one to exercise
//! the full provisioning flow in unit and integration tests.
//!
//! ```rust
//! use std::sync::Arc;
//! use needdock::testing::StubEngine;
//! use needdock::Provisioner;
//!
//! # async fn example() {
//! let engine = Arc::new(StubEngine::new());
//! let provisioner = Provisioner::new(engine.clone());
//! // ... provision against the stub, then assert on engine.pulls() etc.
//! # }
//! ```

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Mutex, Once, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::{self, BoxStream};

use crate::engine::{ContainerEngine, ContainerInfo, ContainerSpec, EngineError, PullProgress};

/// Install a tracing subscriber for tests. Safe to call repeatedly.
pub fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// A scripted [`ContainerEngine`] for tests.
///
/// Happy path by default: pulls emit three progress events and finish,
/// containers are created with ids `stub-1`, `stub-2`, ... and inspect
/// reports them running with the configured port bindings. Failure toggles
/// flip individual stages.
pub struct StubEngine {
    pulls: AtomicU32,
    creates: AtomicU32,
    starts: AtomicU32,
    stops: AtomicU32,
    removes: AtomicU32,
    next_id: AtomicU32,

    image_present: AtomicBool,
    fail_pull: AtomicBool,
    fail_create: AtomicBool,
    fail_start: AtomicBool,
    running: AtomicBool,

    pull_delay: Mutex<Duration>,
    bindings: Mutex<BTreeMap<u16, u16>>,
    logs: Mutex<String>,
    created: Mutex<Vec<String>>,
    removed: Mutex<Vec<String>>,
}

impl StubEngine {
    /// Create a stub scripted for the happy path.
    pub fn new() -> Self {
        Self {
            pulls: AtomicU32::new(0),
            creates: AtomicU32::new(0),
            starts: AtomicU32::new(0),
            stops: AtomicU32::new(0),
            removes: AtomicU32::new(0),
            next_id: AtomicU32::new(0),
            image_present: AtomicBool::new(false),
            fail_pull: AtomicBool::new(false),
            fail_create: AtomicBool::new(false),
            fail_start: AtomicBool::new(false),
            running: AtomicBool::new(true),
            pull_delay: Mutex::new(Duration::ZERO),
            bindings: Mutex::new(BTreeMap::new()),
            logs: Mutex::new(String::new()),
            created: Mutex::new(Vec::new()),
            removed: Mutex::new(Vec::new()),
        }
    }

    /// Create a stub whose pull stream ends in an error.
    pub fn failing_pull() -> Self {
        let stub = Self::new();
        stub.fail_pull.store(true, Ordering::SeqCst);
        stub
    }

    /// Report this container-port-to-host-port binding from inspect.
    pub fn with_binding(self, container_port: u16, host_port: u16) -> Self {
        self.bindings
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(container_port, host_port);
        self
    }

    /// Stretch each pull progress event by `delay` (to force overlap in
    /// concurrency tests).
    pub fn with_pull_delay(self, delay: Duration) -> Self {
        *self
            .pull_delay
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = delay;
        self
    }

    /// Toggle pull failure at runtime.
    pub fn set_fail_pull(&self, fail: bool) {
        self.fail_pull.store(fail, Ordering::SeqCst);
    }

    /// Toggle create failure at runtime.
    pub fn set_fail_create(&self, fail: bool) {
        self.fail_create.store(fail, Ordering::SeqCst);
    }

    /// Toggle start failure at runtime.
    pub fn set_fail_start(&self, fail: bool) {
        self.fail_start.store(fail, Ordering::SeqCst);
    }

    /// Toggle what inspect reports for the running flag.
    pub fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::SeqCst);
    }

    /// Pretend the image is already present locally (skips the pull).
    pub fn set_image_present(&self, present: bool) {
        self.image_present.store(present, Ordering::SeqCst);
    }

    /// Script the container logs returned to log-message probes.
    pub fn set_logs(&self, text: impl Into<String>) {
        *self.logs.lock().unwrap_or_else(PoisonError::into_inner) = text.into();
    }

    /// Number of pulls started.
    pub fn pulls(&self) -> u32 {
        self.pulls.load(Ordering::SeqCst)
    }

    /// Number of containers created.
    pub fn creates(&self) -> u32 {
        self.creates.load(Ordering::SeqCst)
    }

    /// Number of containers started.
    pub fn starts(&self) -> u32 {
        self.starts.load(Ordering::SeqCst)
    }

    /// Number of stop calls.
    pub fn stops(&self) -> u32 {
        self.stops.load(Ordering::SeqCst)
    }

    /// Number of remove calls.
    pub fn removes(&self) -> u32 {
        self.removes.load(Ordering::SeqCst)
    }

    /// Ids of containers created so far.
    pub fn created_ids(&self) -> Vec<String> {
        self.created
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Ids of containers removed so far.
    pub fn removed_ids(&self) -> Vec<String> {
        self.removed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Default for StubEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ContainerEngine for StubEngine {
    async fn ping(&self) -> Result<(), EngineError> {
        Ok(())
    }

    async fn image_present(&self, _reference: &str) -> bool {
        self.image_present.load(Ordering::SeqCst)
    }

    fn pull_image(&self, _reference: &str) -> BoxStream<'static, Result<PullProgress, EngineError>> {
        self.pulls.fetch_add(1, Ordering::SeqCst);
        let delay = *self
            .pull_delay
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let progress = |status: &str| {
            Ok(PullProgress {
                status: Some(status.to_string()),
                ..Default::default()
            })
        };

        let events: Vec<Result<PullProgress, EngineError>> =
            if self.fail_pull.load(Ordering::SeqCst) {
                vec![
                    progress("Pulling fs layer"),
                    Err(EngineError::Stream {
                        reason: "manifest unknown".to_string(),
                    }),
                ]
            } else {
                vec![
                    progress("Pulling fs layer"),
                    progress("Downloading"),
                    progress("Pull complete"),
                ]
            };

        stream::iter(events)
            .then(move |event| async move {
                if delay > Duration::ZERO {
                    tokio::time::sleep(delay).await;
                }
                event
            })
            .boxed()
    }

    async fn create_container(&self, _spec: &ContainerSpec) -> Result<String, EngineError> {
        self.creates.fetch_add(1, Ordering::SeqCst);
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(EngineError::Api {
                reason: "invalid container spec".to_string(),
            });
        }
        let id = format!("stub-{}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        self.created
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(id.clone());
        Ok(id)
    }

    async fn start_container(&self, _id: &str) -> Result<(), EngineError> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        if self.fail_start.load(Ordering::SeqCst) {
            return Err(EngineError::Api {
                reason: "cannot start container".to_string(),
            });
        }
        Ok(())
    }

    async fn inspect_container(&self, _id: &str) -> Result<ContainerInfo, EngineError> {
        Ok(ContainerInfo {
            running: self.running.load(Ordering::SeqCst),
            host_bindings: self
                .bindings
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone(),
        })
    }

    async fn container_logs(&self, _id: &str) -> Result<String, EngineError> {
        Ok(self
            .logs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone())
    }

    async fn stop_container(&self, _id: &str) -> Result<(), EngineError> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn remove_container(&self, id: &str) -> Result<(), EngineError> {
        self.removes.fetch_add(1, Ordering::SeqCst);
        self.removed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(id.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_stub_happy_path_counters() {
        let stub = StubEngine::new().with_binding(5432, 49153);

        let spec = ContainerSpec {
            name: "needdock-test".to_string(),
            image: "postgres:16".to_string(),
            exposed_ports: vec![5432],
            env: Vec::new(),
            bind_host: "127.0.0.1".to_string(),
        };
        let id = stub.create_container(&spec).await.expect("create");
        assert_eq!(id, "stub-1");
        stub.start_container(&id).await.expect("start");

        let info = stub.inspect_container(&id).await.expect("inspect");
        assert!(info.running);
        assert_eq!(info.host_bindings.get(&5432), Some(&49153));
        assert_eq!(stub.creates(), 1);
        assert_eq!(stub.starts(), 1);
    }

    #[tokio::test]
    async fn test_failing_pull_stream_ends_with_error() {
        let stub = StubEngine::failing_pull();
        let events: Vec<_> = stub.pull_image("postgres:16").collect().await;
        assert_eq!(stub.pulls(), 1);
        assert!(events.last().expect("events").is_err());
    }
}
