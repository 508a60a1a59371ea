//! Provisioning of external test dependencies ("needs") backed by Docker.
//!
//! A test that needs a real service (a throwaway Postgres, a message broker)
//! declares it as a [`Descriptor`]. The [`Provisioner`] pulls the image,
//! creates and starts a container, waits until it is actually reachable, and
//! hands back a read-only [`NeedInstance`] carrying the engine-assigned port
//! bindings. The [`Supervisor`] guarantees the container is stopped and
//! removed afterward, whatever the test outcome.
//!
//! Concurrent requests for the same descriptor identity are single-flight:
//! only one pull/create/start sequence runs, and callers that opted in to
//! sharing reuse the published instance.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use needdock::{Descriptor, DockerEngine, Provisioner};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let engine = Arc::new(DockerEngine::connect().await?);
//! let provisioner = Provisioner::new(engine);
//!
//! let postgres = Descriptor::builder("postgres")
//!     .tag("16")
//!     .expose(5432)
//!     .env("POSTGRES_PASSWORD", "secret")
//!     .build();
//!
//! let instance = provisioner.provision(&postgres).await?;
//! if let Some(uri) = instance.find_first_uri("postgres") {
//!     // run the test body against `uri` ...
//! }
//! provisioner.supervisor().teardown(&postgres.identity()).await;
//! # Ok(())
//! # }
//! ```
//!
//! For cleanup on every exit path (including a panicking test body), use
//! [`Provisioner::with_need`].

pub mod config;
pub mod descriptor;
pub mod engine;
pub mod error;
pub mod instance;
pub mod manifest;
pub mod provisioner;
pub mod pull;
pub mod state;
pub mod supervisor;
pub mod testing;

pub use config::RuntimeConfig;
pub use descriptor::{Descriptor, DescriptorBuilder, NeedIdentity, WaitStrategy};
pub use engine::{ContainerEngine, DockerEngine, EngineError};
pub use error::{ConfigError, ProvisionError, Result};
pub use instance::NeedInstance;
pub use provisioner::Provisioner;
pub use state::ContainerStatus;
pub use supervisor::Supervisor;
