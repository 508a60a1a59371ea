//! Need provisioning orchestration.
//!
//! [`Provisioner::provision`] turns a [`Descriptor`] into a running, reachable
//! [`NeedInstance`]: pull (through the pull monitor) → create → start →
//! wait-for-ready → publish. Operations are single-flight per descriptor
//! identity: concurrent requests for the same identity serialize on a gate,
//! and when sharing is opted in the later callers reuse the instance the
//! first one published. Every suspension point is bounded by a timeout; an
//! expired budget surfaces as a [`ProvisionError`], never a hang.

use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use futures::FutureExt;
use regex::Regex;
use tokio::net::TcpStream;

use crate::config::RuntimeConfig;
use crate::descriptor::{Descriptor, NeedIdentity, WaitStrategy};
use crate::engine::{ContainerEngine, ContainerSpec};
use crate::error::{ProvisionError, Result};
use crate::instance::NeedInstance;
use crate::pull::{PullMonitor, PullOutcome};
use crate::state::ContainerStatus;
use crate::supervisor::Supervisor;

/// How long a single TCP readiness probe may take to connect.
const TCP_PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// Orchestrates provisioning of needs against one container engine.
pub struct Provisioner {
    engine: Arc<dyn ContainerEngine>,
    supervisor: Arc<Supervisor>,
    config: RuntimeConfig,
    gates: Mutex<HashMap<NeedIdentity, Arc<tokio::sync::Mutex<()>>>>,
    /// Reusable HTTP client for readiness probes (avoids per-probe allocation).
    probe_client: reqwest::Client,
}

impl Provisioner {
    /// Create a provisioner with default runtime configuration.
    pub fn new(engine: Arc<dyn ContainerEngine>) -> Self {
        Self::with_config(engine, RuntimeConfig::default())
    }

    /// Create a provisioner with explicit runtime configuration.
    pub fn with_config(engine: Arc<dyn ContainerEngine>, config: RuntimeConfig) -> Self {
        let supervisor = Arc::new(Supervisor::new(engine.clone(), &config));
        let probe_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            engine,
            supervisor,
            config,
            gates: Mutex::new(HashMap::new()),
            probe_client,
        }
    }

    /// The supervisor tracking everything this provisioner stands up.
    pub fn supervisor(&self) -> Arc<Supervisor> {
        self.supervisor.clone()
    }

    /// Provision a need, or return the shared running instance for its
    /// identity when the descriptor opts in to sharing.
    pub async fn provision(&self, descriptor: &Descriptor) -> Result<NeedInstance> {
        descriptor.validate()?;
        let identity = descriptor.identity();

        // Single-flight: one provisioning operation per identity at a time.
        // Waiting behind another caller is bounded by the full budget the
        // other caller could legally spend.
        let budget = descriptor.pull_timeout() + descriptor.ready_timeout();
        let gate = self.gate(&identity);
        let Ok(_guard) = tokio::time::timeout(budget, gate.lock()).await else {
            return Err(ProvisionError::Contended {
                image: descriptor.reference(),
                waited: budget,
            });
        };

        if descriptor.is_shared() {
            if let Some(existing) = self.supervisor.find_shared(&identity).await {
                tracing::debug!("reusing running instance for {}", identity);
                return Ok(existing);
            }
        }

        self.provision_fresh(descriptor, identity).await
    }

    /// Provision a need, run `body` against it, and tear it down on every
    /// exit path, including a panicking body, whose panic is re-raised
    /// after cleanup.
    pub async fn with_need<T, F, Fut>(&self, descriptor: &Descriptor, body: F) -> Result<T>
    where
        F: FnOnce(NeedInstance) -> Fut,
        Fut: Future<Output = T>,
    {
        let instance = self.provision(descriptor).await?;
        let identity = instance.identity().clone();

        let outcome = AssertUnwindSafe(body(instance)).catch_unwind().await;
        self.supervisor.teardown(&identity).await;

        match outcome {
            Ok(value) => Ok(value),
            Err(panic) => std::panic::resume_unwind(panic),
        }
    }

    fn gate(&self, identity: &NeedIdentity) -> Arc<tokio::sync::Mutex<()>> {
        let mut gates = self.gates.lock().unwrap_or_else(PoisonError::into_inner);
        gates
            .entry(identity.clone())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    async fn provision_fresh(
        &self,
        descriptor: &Descriptor,
        identity: NeedIdentity,
    ) -> Result<NeedInstance> {
        let reference = descriptor.reference();

        if let Err(e) = self.engine.ping().await {
            return Err(ProvisionError::EngineUnavailable {
                reason: e.to_string(),
            });
        }

        let slot = self
            .supervisor
            .open(identity.clone(), self.config.publish_host.clone());

        // Pull
        self.supervisor.advance(&slot, ContainerStatus::Pulling).await;
        if self.engine.image_present(&reference).await {
            tracing::debug!("image {} already present, skipping pull", reference);
        } else {
            tracing::info!("pulling image {}", reference);
            let stream = self.engine.pull_image(&reference);
            let (monitor, signal) = PullMonitor::channel();
            tokio::spawn(monitor.drive(stream));

            match signal.wait(descriptor.pull_timeout()).await {
                Some(PullOutcome::Complete { events }) => {
                    tracing::info!("pulled image {} ({} progress events)", reference, events);
                }
                Some(PullOutcome::Failed { reason }) => {
                    self.supervisor.scrap(&slot, &reason).await;
                    return Err(ProvisionError::PullFailed {
                        image: reference,
                        reason,
                    });
                }
                None => {
                    self.supervisor.scrap(&slot, "pull timed out").await;
                    return Err(ProvisionError::PullTimeout {
                        image: reference,
                        timeout: descriptor.pull_timeout(),
                    });
                }
            }
        }

        // Create and start
        self.supervisor.advance(&slot, ContainerStatus::Starting).await;
        let spec = ContainerSpec {
            name: descriptor.container_name(&self.config.container_prefix),
            image: reference.clone(),
            exposed_ports: descriptor.exposed_ports().iter().copied().collect(),
            env: descriptor
                .env()
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            bind_host: self.config.publish_host.clone(),
        };

        let id = match self.engine.create_container(&spec).await {
            Ok(id) => id,
            Err(e) => {
                self.supervisor.scrap(&slot, &e.to_string()).await;
                return Err(ProvisionError::CreateFailed {
                    image: reference,
                    reason: e.to_string(),
                });
            }
        };
        self.supervisor.attach_container(&slot, id.clone()).await;
        tracing::info!("created container {} for {}", id, identity);

        if let Err(e) = self.engine.start_container(&id).await {
            // Even when start fails, the created container must be removed.
            self.supervisor.scrap(&slot, &e.to_string()).await;
            return Err(ProvisionError::StartFailed {
                id,
                reason: e.to_string(),
            });
        }

        // Observe RUNNING and read back the engine-assigned bindings before
        // the readiness probe starts.
        let info = match self.engine.inspect_container(&id).await {
            Ok(info) => info,
            Err(e) => {
                self.supervisor.scrap(&slot, &e.to_string()).await;
                return Err(ProvisionError::StartFailed {
                    id,
                    reason: e.to_string(),
                });
            }
        };
        if !info.running {
            self.supervisor
                .scrap(&slot, "container exited immediately after start")
                .await;
            return Err(ProvisionError::StartFailed {
                id,
                reason: "container exited immediately after start".to_string(),
            });
        }
        let host = self.config.publish_host.clone();
        let bindings = info.host_bindings.clone();
        self.supervisor.record_bindings(&slot, info.host_bindings).await;
        self.supervisor.advance(&slot, ContainerStatus::Running).await;
        tracing::info!("container {} running, waiting for readiness", id);

        if let Err(e) = self
            .wait_until_ready(descriptor, &id, &host, &bindings)
            .await
        {
            self.supervisor.scrap(&slot, "readiness wait failed").await;
            return Err(e);
        }

        match self.supervisor.publish(&slot).await {
            Some(instance) => {
                tracing::info!("published need {} at {}", identity, instance);
                Ok(instance)
            }
            None => {
                self.supervisor
                    .scrap(&slot, "container left running state before publish")
                    .await;
                Err(ProvisionError::StartFailed {
                    id,
                    reason: "container left running state before publish".to_string(),
                })
            }
        }
    }

    /// Poll the descriptor's wait strategy until it succeeds or the
    /// readiness budget elapses.
    async fn wait_until_ready(
        &self,
        descriptor: &Descriptor,
        id: &str,
        host: &str,
        bindings: &std::collections::BTreeMap<u16, u16>,
    ) -> Result<()> {
        let timeout = descriptor.ready_timeout();
        let interval = self.config.poll_interval;

        // Compile a log pattern once, not per poll.
        let pattern = match descriptor.wait() {
            WaitStrategy::LogMessage { pattern } => Some(Regex::new(pattern).map_err(|e| {
                ProvisionError::InvalidDescriptor {
                    reason: format!("log wait pattern does not compile: {e}"),
                }
            })?),
            _ => None,
        };

        let started = Instant::now();
        loop {
            // The container must stay running while we probe.
            match self.engine.inspect_container(id).await {
                Ok(info) if !info.running => {
                    return Err(ProvisionError::StartFailed {
                        id: id.to_string(),
                        reason: "container stopped during readiness wait".to_string(),
                    });
                }
                Ok(_) => {}
                Err(e) => tracing::debug!("inspect during readiness wait failed: {}", e),
            }

            if self
                .probe_once(descriptor, id, host, bindings, pattern.as_ref(), started)
                .await
            {
                tracing::debug!("readiness probe succeeded for container {}", id);
                return Ok(());
            }

            if started.elapsed() >= timeout {
                return Err(ProvisionError::ReadinessTimeout {
                    id: id.to_string(),
                    timeout,
                });
            }
            tokio::time::sleep(interval).await;
        }
    }

    async fn probe_once(
        &self,
        descriptor: &Descriptor,
        id: &str,
        host: &str,
        bindings: &std::collections::BTreeMap<u16, u16>,
        pattern: Option<&Regex>,
        running_since: Instant,
    ) -> bool {
        match descriptor.wait() {
            WaitStrategy::PortOpen => {
                let Some(first) = descriptor.exposed_ports().iter().next() else {
                    return false;
                };
                let Some(port) = bindings.get(first).copied() else {
                    return false;
                };
                matches!(
                    tokio::time::timeout(TCP_PROBE_TIMEOUT, TcpStream::connect((host, port))).await,
                    Ok(Ok(_))
                )
            }
            WaitStrategy::HttpOk { path, port } => {
                let Some(host_port) = bindings.get(port).copied() else {
                    return false;
                };
                let url = format!(
                    "http://{}:{}/{}",
                    host,
                    host_port,
                    path.trim_start_matches('/')
                );
                match self.probe_client.get(&url).send().await {
                    Ok(response) => response.status().is_success(),
                    Err(e) => {
                        // Connection refused is expected while starting up.
                        if !e.is_connect() {
                            tracing::debug!("http readiness probe error: {}", e);
                        }
                        false
                    }
                }
            }
            WaitStrategy::LogMessage { .. } => {
                let Some(pattern) = pattern else {
                    return false;
                };
                match self.engine.container_logs(id).await {
                    Ok(logs) => pattern.is_match(&logs),
                    Err(e) => {
                        tracing::debug!("log readiness probe error: {}", e);
                        false
                    }
                }
            }
            WaitStrategy::Delay { duration } => running_since.elapsed() >= *duration,
        }
    }
}
