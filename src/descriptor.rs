//! Need descriptors: immutable specifications of external test dependencies.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::time::Duration;

use rand::Rng;
use rand::distributions::Alphanumeric;

use crate::error::ProvisionError;

/// Tag used when a descriptor does not name one.
pub const DEFAULT_TAG: &str = "latest";
/// Default budget for the image pull.
pub const DEFAULT_PULL_TIMEOUT: Duration = Duration::from_secs(60);
/// Default budget for the readiness probe.
pub const DEFAULT_READY_TIMEOUT: Duration = Duration::from_secs(30);

/// How readiness of a running container is probed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum WaitStrategy {
    /// First exposed port accepts a TCP connection (default).
    #[default]
    PortOpen,
    /// Container logs match a regex.
    LogMessage {
        /// Pattern matched against the collected container logs.
        pattern: String,
    },
    /// HTTP GET on a mapped port returns a success status.
    HttpOk {
        /// Path to request (e.g. "/" or "/health").
        path: String,
        /// Port inside the container.
        port: u16,
    },
    /// Fixed delay after the container is observed running.
    Delay {
        /// How long to wait.
        duration: Duration,
    },
}

/// Immutable specification of a need.
///
/// Built through [`Descriptor::builder`]; two descriptors with the same
/// [`identity`](Descriptor::identity) may share one running instance when
/// sharing is opted in.
#[derive(Debug, Clone)]
pub struct Descriptor {
    image: String,
    tag: String,
    exposed_ports: BTreeSet<u16>,
    env: BTreeMap<String, String>,
    wait: WaitStrategy,
    pull_timeout: Duration,
    ready_timeout: Duration,
    shared: bool,
}

impl Descriptor {
    /// Start building a descriptor for the given image.
    pub fn builder(image: impl Into<String>) -> DescriptorBuilder {
        DescriptorBuilder::new(image)
    }

    /// Image name without the tag.
    pub fn image(&self) -> &str {
        &self.image
    }

    /// Image tag.
    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// Full image reference, `image:tag`.
    pub fn reference(&self) -> String {
        format!("{}:{}", self.image, self.tag)
    }

    /// Container-internal ports to publish.
    pub fn exposed_ports(&self) -> &BTreeSet<u16> {
        &self.exposed_ports
    }

    /// Environment injected into the container.
    pub fn env(&self) -> &BTreeMap<String, String> {
        &self.env
    }

    /// Readiness strategy.
    pub fn wait(&self) -> &WaitStrategy {
        &self.wait
    }

    /// Budget for the image pull.
    pub fn pull_timeout(&self) -> Duration {
        self.pull_timeout
    }

    /// Budget for the readiness probe.
    pub fn ready_timeout(&self) -> Duration {
        self.ready_timeout
    }

    /// Whether a running instance with the same identity may be reused.
    pub fn is_shared(&self) -> bool {
        self.shared
    }

    /// Identity of this descriptor: image, tag, exposed ports and env.
    ///
    /// Wait strategy, timeouts and the share flag are deliberately excluded.
    pub fn identity(&self) -> NeedIdentity {
        NeedIdentity {
            image: self.image.clone(),
            tag: self.tag.clone(),
            exposed_ports: self.exposed_ports.clone(),
            env: self.env.clone(),
        }
    }

    pub(crate) fn validate(&self) -> Result<(), ProvisionError> {
        if self.image.trim().is_empty() {
            return Err(ProvisionError::InvalidDescriptor {
                reason: "image must not be empty".to_string(),
            });
        }
        if self.tag.trim().is_empty() {
            return Err(ProvisionError::InvalidDescriptor {
                reason: "tag must not be empty".to_string(),
            });
        }
        if self.exposed_ports.is_empty() {
            return Err(ProvisionError::InvalidDescriptor {
                reason: "at least one exposed port is required".to_string(),
            });
        }
        match &self.wait {
            WaitStrategy::LogMessage { pattern } => {
                regex::Regex::new(pattern).map_err(|e| ProvisionError::InvalidDescriptor {
                    reason: format!("log wait pattern does not compile: {e}"),
                })?;
            }
            WaitStrategy::HttpOk { port, .. } => {
                if !self.exposed_ports.contains(port) {
                    return Err(ProvisionError::InvalidDescriptor {
                        reason: format!("http wait port {port} is not an exposed port"),
                    });
                }
            }
            WaitStrategy::PortOpen | WaitStrategy::Delay { .. } => {}
        }
        Ok(())
    }

    /// Unique container name: `<prefix>-<image>-<random suffix>`.
    pub(crate) fn container_name(&self, prefix: &str) -> String {
        let image: String = self
            .image
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
            .collect();
        let suffix: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(6)
            .map(char::from)
            .collect();
        format!("{prefix}-{image}-{suffix}")
    }
}

/// Builder for [`Descriptor`].
#[derive(Debug, Clone)]
pub struct DescriptorBuilder {
    image: String,
    tag: String,
    exposed_ports: BTreeSet<u16>,
    env: BTreeMap<String, String>,
    wait: WaitStrategy,
    pull_timeout: Duration,
    ready_timeout: Duration,
    shared: bool,
}

impl DescriptorBuilder {
    fn new(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            tag: DEFAULT_TAG.to_string(),
            exposed_ports: BTreeSet::new(),
            env: BTreeMap::new(),
            wait: WaitStrategy::default(),
            pull_timeout: DEFAULT_PULL_TIMEOUT,
            ready_timeout: DEFAULT_READY_TIMEOUT,
            shared: false,
        }
    }

    /// Set the image tag.
    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = tag.into();
        self
    }

    /// Expose a container-internal port.
    pub fn expose(mut self, port: u16) -> Self {
        self.exposed_ports.insert(port);
        self
    }

    /// Inject an environment variable into the container.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Set the readiness strategy.
    pub fn wait(mut self, wait: WaitStrategy) -> Self {
        self.wait = wait;
        self
    }

    /// Set the pull budget.
    pub fn pull_timeout(mut self, timeout: Duration) -> Self {
        self.pull_timeout = timeout;
        self
    }

    /// Set the readiness budget.
    pub fn ready_timeout(mut self, timeout: Duration) -> Self {
        self.ready_timeout = timeout;
        self
    }

    /// Opt in to sharing one running instance across callers.
    pub fn shared(mut self, shared: bool) -> Self {
        self.shared = shared;
        self
    }

    /// Finish building.
    pub fn build(self) -> Descriptor {
        Descriptor {
            image: self.image,
            tag: self.tag,
            exposed_ports: self.exposed_ports,
            env: self.env,
            wait: self.wait,
            pull_timeout: self.pull_timeout,
            ready_timeout: self.ready_timeout,
            shared: self.shared,
        }
    }
}

/// Identity of a need: (image, tag, exposed ports, env).
///
/// Used to key single-flight gates and the supervisor registry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NeedIdentity {
    image: String,
    tag: String,
    exposed_ports: BTreeSet<u16>,
    env: BTreeMap<String, String>,
}

impl NeedIdentity {
    /// Full image reference, `image:tag`.
    pub fn reference(&self) -> String {
        format!("{}:{}", self.image, self.tag)
    }
}

impl fmt::Display for NeedIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.image, self.tag)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_builder_defaults() {
        let descriptor = Descriptor::builder("postgres").expose(5432).build();
        assert_eq!(descriptor.tag(), "latest");
        assert_eq!(descriptor.reference(), "postgres:latest");
        assert_eq!(descriptor.wait(), &WaitStrategy::PortOpen);
        assert_eq!(descriptor.pull_timeout(), DEFAULT_PULL_TIMEOUT);
        assert_eq!(descriptor.ready_timeout(), DEFAULT_READY_TIMEOUT);
        assert!(!descriptor.is_shared());
    }

    #[test]
    fn test_identity_ignores_wait_and_timeouts() {
        let a = Descriptor::builder("postgres")
            .tag("9.4")
            .expose(5432)
            .env("POSTGRES_PASSWORD", "secret")
            .build();
        let b = Descriptor::builder("postgres")
            .tag("9.4")
            .expose(5432)
            .env("POSTGRES_PASSWORD", "secret")
            .wait(WaitStrategy::Delay {
                duration: Duration::from_secs(1),
            })
            .ready_timeout(Duration::from_secs(5))
            .shared(true)
            .build();
        assert_eq!(a.identity(), b.identity());
    }

    #[test]
    fn test_identity_differs_on_env() {
        let a = Descriptor::builder("postgres").expose(5432).build();
        let b = Descriptor::builder("postgres")
            .expose(5432)
            .env("POSTGRES_PASSWORD", "secret")
            .build();
        assert_ne!(a.identity(), b.identity());
    }

    #[test]
    fn test_validate_rejects_empty_image_and_ports() {
        let err = Descriptor::builder("").expose(80).build().validate();
        assert!(err.is_err());

        let err = Descriptor::builder("postgres").build().validate();
        assert!(err.is_err());

        let err = Descriptor::builder("postgres").tag(" ").expose(5432).build().validate();
        assert!(err.is_err());
    }

    #[test]
    fn test_validate_rejects_bad_log_pattern() {
        let descriptor = Descriptor::builder("postgres")
            .expose(5432)
            .wait(WaitStrategy::LogMessage {
                pattern: "[unclosed".to_string(),
            })
            .build();
        assert!(descriptor.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_unexposed_http_port() {
        let descriptor = Descriptor::builder("nginx")
            .expose(80)
            .wait(WaitStrategy::HttpOk {
                path: "/health".to_string(),
                port: 8080,
            })
            .build();
        assert!(descriptor.validate().is_err());
    }

    #[test]
    fn test_container_name_is_sanitized_and_unique() {
        let descriptor = Descriptor::builder("ghcr.io/acme/widget").expose(80).build();
        let a = descriptor.container_name("needdock");
        let b = descriptor.container_name("needdock");
        assert!(a.starts_with("needdock-ghcr-io-acme-widget-"));
        assert_ne!(a, b);
    }
}
