//! Declarative need manifests.
//!
//! A test suite can declare its needs once, in TOML, instead of building
//! descriptors in code:
//!
//! ```toml
//! [needs.postgres]
//! image = "postgres"
//! tag = "9.4"
//! ports = [5432]
//! shared = true
//!
//! [needs.postgres.env]
//! POSTGRES_PASSWORD = "secret"
//!
//! [needs.broker]
//! image = "rabbitmq"
//! ports = [5672]
//! wait = { kind = "log-message", pattern = "Server startup complete" }
//! ```
//!
//! [`parse_manifest`] turns this into named [`Descriptor`]s, validated the
//! same way descriptors built in code are.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::Deserialize;

use crate::descriptor::{Descriptor, WaitStrategy};
use crate::error::ProvisionError;

#[derive(Debug, Deserialize)]
struct RawManifest {
    #[serde(default)]
    needs: BTreeMap<String, RawNeed>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawNeed {
    image: String,
    tag: Option<String>,
    #[serde(default)]
    ports: Vec<u16>,
    #[serde(default)]
    env: BTreeMap<String, String>,
    wait: Option<RawWait>,
    pull_timeout_secs: Option<u64>,
    ready_timeout_secs: Option<u64>,
    #[serde(default)]
    shared: bool,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
enum RawWait {
    PortOpen,
    LogMessage { pattern: String },
    HttpOk { path: String, port: u16 },
    Delay { secs: u64 },
}

impl RawNeed {
    fn into_descriptor(self) -> Result<Descriptor, ProvisionError> {
        let mut builder = Descriptor::builder(self.image);
        if let Some(tag) = self.tag {
            builder = builder.tag(tag);
        }
        for port in self.ports {
            builder = builder.expose(port);
        }
        for (key, value) in self.env {
            builder = builder.env(key, value);
        }
        if let Some(wait) = self.wait {
            builder = builder.wait(match wait {
                RawWait::PortOpen => WaitStrategy::PortOpen,
                RawWait::LogMessage { pattern } => WaitStrategy::LogMessage { pattern },
                RawWait::HttpOk { path, port } => WaitStrategy::HttpOk { path, port },
                RawWait::Delay { secs } => WaitStrategy::Delay {
                    duration: Duration::from_secs(secs),
                },
            });
        }
        if let Some(secs) = self.pull_timeout_secs {
            builder = builder.pull_timeout(Duration::from_secs(secs));
        }
        if let Some(secs) = self.ready_timeout_secs {
            builder = builder.ready_timeout(Duration::from_secs(secs));
        }
        let descriptor = builder.shared(self.shared).build();
        descriptor.validate()?;
        Ok(descriptor)
    }
}

/// Parse a TOML manifest into named descriptors.
pub fn parse_manifest(text: &str) -> Result<BTreeMap<String, Descriptor>, ProvisionError> {
    let raw: RawManifest =
        toml::from_str(text).map_err(|e| ProvisionError::InvalidDescriptor {
            reason: e.to_string(),
        })?;

    raw.needs
        .into_iter()
        .map(|(name, need)| Ok((name, need.into_descriptor()?)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_full_manifest() {
        let manifest = r#"
            [needs.postgres]
            image = "postgres"
            tag = "9.4"
            ports = [5432]
            ready_timeout_secs = 5
            shared = true

            [needs.postgres.env]
            POSTGRES_PASSWORD = "secret"

            [needs.broker]
            image = "rabbitmq"
            ports = [5672]
            wait = { kind = "log-message", pattern = "Server startup complete" }
        "#;

        let needs = parse_manifest(manifest).expect("manifest parses");
        assert_eq!(needs.len(), 2);

        let postgres = &needs["postgres"];
        assert_eq!(postgres.reference(), "postgres:9.4");
        assert_eq!(postgres.ready_timeout(), Duration::from_secs(5));
        assert!(postgres.is_shared());
        assert_eq!(postgres.env()["POSTGRES_PASSWORD"], "secret");

        let broker = &needs["broker"];
        assert_eq!(broker.tag(), "latest");
        assert_eq!(
            broker.wait(),
            &WaitStrategy::LogMessage {
                pattern: "Server startup complete".to_string()
            }
        );
    }

    #[test]
    fn test_manifest_without_ports_is_rejected() {
        let manifest = r#"
            [needs.broken]
            image = "postgres"
        "#;
        assert!(parse_manifest(manifest).is_err());
    }

    #[test]
    fn test_unknown_field_is_rejected() {
        let manifest = r#"
            [needs.typo]
            image = "postgres"
            ports = [5432]
            prots = [5432]
        "#;
        assert!(parse_manifest(manifest).is_err());
    }

    #[test]
    fn test_empty_manifest() {
        let needs = parse_manifest("").expect("empty manifest parses");
        assert!(needs.is_empty());
    }
}
