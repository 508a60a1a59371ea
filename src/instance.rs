//! Read-only handles to provisioned needs.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use url::Url;

use crate::descriptor::NeedIdentity;

/// Read-only view of a running need.
///
/// Only the supervisor can construct one, and only from a container it has
/// observed running after a successful readiness probe. The handle never
/// grants ownership of the container; when the supervisor takes the backing
/// state out of running, the handle is invalidated and its port accessors
/// return `None`. All accessors fail softly: absence of a binding is an
/// `Option::None`, never a panic.
#[derive(Debug, Clone)]
pub struct NeedInstance {
    identity: NeedIdentity,
    host: String,
    bindings: BTreeMap<u16, u16>,
    alive: Arc<AtomicBool>,
}

impl NeedInstance {
    pub(crate) fn new(
        identity: NeedIdentity,
        host: String,
        bindings: BTreeMap<u16, u16>,
        alive: Arc<AtomicBool>,
    ) -> Self {
        Self {
            identity,
            host,
            bindings,
            alive,
        }
    }

    /// Identity of the descriptor this instance satisfies.
    pub fn identity(&self) -> &NeedIdentity {
        &self.identity
    }

    /// Host address the container's ports are published on.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Whether the backing container is still supervised as running.
    pub fn is_valid(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    /// Host port bound to `container_port`, if one exists and the instance
    /// is still valid.
    pub fn port_for(&self, container_port: u16) -> Option<u16> {
        if !self.is_valid() {
            return None;
        }
        self.bindings.get(&container_port).copied()
    }

    /// Host port of the lowest-numbered exposed container port.
    pub fn find_first_port(&self) -> Option<u16> {
        if !self.is_valid() {
            return None;
        }
        self.bindings.values().next().copied()
    }

    /// URI for `container_port` with the given scheme.
    pub fn uri_for(&self, scheme: &str, container_port: u16) -> Option<Url> {
        let port = self.port_for(container_port)?;
        Url::parse(&format!("{}://{}:{}", scheme, self.host, port)).ok()
    }

    /// URI for the first exposed port with the given scheme.
    pub fn find_first_uri(&self, scheme: &str) -> Option<Url> {
        let port = self.find_first_port()?;
        Url::parse(&format!("{}://{}:{}", scheme, self.host, port)).ok()
    }
}

impl fmt::Display for NeedInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.bindings.values().next() {
            Some(port) => write!(f, "{}:{}", self.host, port),
            None => write!(f, "{}:?", self.host),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn identity() -> NeedIdentity {
        crate::descriptor::Descriptor::builder("postgres")
            .tag("9.4")
            .expose(5432)
            .build()
            .identity()
    }

    fn instance(bindings: BTreeMap<u16, u16>, alive: bool) -> NeedInstance {
        NeedInstance::new(
            identity(),
            "127.0.0.1".to_string(),
            bindings,
            Arc::new(AtomicBool::new(alive)),
        )
    }

    #[test]
    fn test_port_lookup() {
        let instance = instance(BTreeMap::from([(5432, 49153)]), true);
        assert_eq!(instance.port_for(5432), Some(49153));
        assert_eq!(instance.find_first_port(), Some(49153));
        assert_eq!(instance.port_for(6379), None);
    }

    #[test]
    fn test_uri_derivation() {
        let instance = instance(BTreeMap::from([(5432, 49153)]), true);
        let uri = instance.find_first_uri("postgres").expect("uri");
        assert_eq!(uri.as_str(), "postgres://127.0.0.1:49153");
        assert_eq!(uri.port(), Some(49153));
    }

    #[test]
    fn test_accessors_fail_softly_without_bindings() {
        let instance = instance(BTreeMap::new(), true);
        assert_eq!(instance.find_first_port(), None);
        assert!(instance.find_first_uri("redis").is_none());
    }

    #[test]
    fn test_invalidated_instance_returns_nothing() {
        let bindings = BTreeMap::from([(5432, 49153)]);
        let alive = Arc::new(AtomicBool::new(true));
        let instance = NeedInstance::new(identity(), "127.0.0.1".to_string(), bindings, alive.clone());
        assert!(instance.is_valid());
        assert_eq!(instance.port_for(5432), Some(49153));

        alive.store(false, Ordering::SeqCst);
        assert!(!instance.is_valid());
        assert_eq!(instance.port_for(5432), None);
        assert_eq!(instance.find_first_port(), None);
    }
}
