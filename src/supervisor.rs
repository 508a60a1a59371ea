//! Lifecycle supervision and guaranteed teardown.
//!
//! The supervisor owns every [`ContainerState`] in the process. Each
//! provisioned need lives in a slot whose state sits behind a `tokio::Mutex`,
//! so no two tasks can advance the same container's lifecycle concurrently.
//! Published instances are registered by identity; [`Supervisor::teardown`]
//! is idempotent and always attempts stop-then-remove on the engine, logging
//! (never raising) cleanup errors so a teardown hiccup cannot mask the
//! outcome of the test that owned the need.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::{Mutex, RwLock};

use crate::config::RuntimeConfig;
use crate::descriptor::NeedIdentity;
use crate::engine::ContainerEngine;
use crate::instance::NeedInstance;
use crate::state::{ContainerState, ContainerStatus};

/// One supervised container: its state machine plus the liveness flag shared
/// with every published [`NeedInstance`].
pub(crate) struct Slot {
    identity: NeedIdentity,
    state: Mutex<ContainerState>,
    alive: Arc<AtomicBool>,
}

impl Slot {
    pub(crate) fn identity(&self) -> &NeedIdentity {
        &self.identity
    }
}

/// Tracks all provisioned needs and serializes their lifecycle transitions.
pub struct Supervisor {
    engine: Arc<dyn ContainerEngine>,
    keep_on_teardown: bool,
    slots: RwLock<HashMap<NeedIdentity, Vec<Arc<Slot>>>>,
}

impl Supervisor {
    /// Create a supervisor over the given engine.
    pub fn new(engine: Arc<dyn ContainerEngine>, config: &RuntimeConfig) -> Self {
        Self {
            engine,
            keep_on_teardown: config.keep_on_teardown,
            slots: RwLock::new(HashMap::new()),
        }
    }

    /// Open a fresh slot for a provisioning attempt. The slot is not
    /// registered until it is published.
    pub(crate) fn open(&self, identity: NeedIdentity, host: String) -> Arc<Slot> {
        Arc::new(Slot {
            identity,
            state: Mutex::new(ContainerState::new(host)),
            alive: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Advance a slot's state machine.
    pub(crate) async fn advance(&self, slot: &Slot, next: ContainerStatus) -> bool {
        slot.state.lock().await.advance(next)
    }

    /// Record the engine-assigned container id.
    pub(crate) async fn attach_container(&self, slot: &Slot, id: String) {
        slot.state.lock().await.set_id(id);
    }

    /// Record the engine-assigned host port bindings.
    pub(crate) async fn record_bindings(&self, slot: &Slot, bindings: BTreeMap<u16, u16>) {
        slot.state.lock().await.set_bindings(bindings);
    }

    /// Publish a slot as a read-only instance and register it.
    ///
    /// Returns `None` unless the slot is RUNNING: an instance can never be
    /// handed out for a pulling, starting or failed container.
    pub(crate) async fn publish(&self, slot: &Arc<Slot>) -> Option<NeedInstance> {
        let instance = {
            let state = slot.state.lock().await;
            if state.status() != ContainerStatus::Running {
                return None;
            }
            slot.alive.store(true, Ordering::SeqCst);
            NeedInstance::new(
                slot.identity.clone(),
                state.host().to_string(),
                state.bindings().clone(),
                slot.alive.clone(),
            )
        };

        self.slots
            .write()
            .await
            .entry(slot.identity.clone())
            .or_default()
            .push(slot.clone());

        Some(instance)
    }

    /// A registered, still-running instance for this identity, if any.
    pub(crate) async fn find_shared(&self, identity: &NeedIdentity) -> Option<NeedInstance> {
        let slots = self.slots.read().await;
        for slot in slots.get(identity)? {
            if !slot.alive.load(Ordering::SeqCst) {
                continue;
            }
            let state = slot.state.lock().await;
            if state.status() == ContainerStatus::Running {
                return Some(NeedInstance::new(
                    slot.identity.clone(),
                    state.host().to_string(),
                    state.bindings().clone(),
                    slot.alive.clone(),
                ));
            }
        }
        None
    }

    /// Failure-path cleanup: invalidate, best-effort stop and remove any
    /// partially created container, and mark the slot failed.
    ///
    /// Errors from the engine are logged and swallowed.
    pub(crate) async fn scrap(&self, slot: &Slot, reason: &str) {
        let mut state = slot.state.lock().await;
        slot.alive.store(false, Ordering::SeqCst);
        state.record_error(reason);

        if let Some(id) = state.container_id().map(String::from) {
            if let Err(e) = self.engine.stop_container(&id).await {
                tracing::debug!("stop of failed container {} did not succeed: {}", id, e);
            }
            if let Err(e) = self.engine.remove_container(&id).await {
                tracing::warn!("could not remove failed container {}: {}", id, e);
            }
        }

        state.advance(ContainerStatus::Failed);
        tracing::info!("scrapped {}: {}", slot.identity, reason);
    }

    /// Tear down everything registered for this identity.
    ///
    /// Idempotent: unknown identities and already-terminal slots are no-ops.
    /// Cleanup errors are logged, never raised.
    pub async fn teardown(&self, identity: &NeedIdentity) {
        let removed = { self.slots.write().await.remove(identity) };
        let Some(slots) = removed else {
            tracing::debug!("teardown: nothing registered for {}", identity);
            return;
        };

        for slot in slots {
            self.stop_slot(&slot).await;
        }
    }

    /// Tear down every registered identity.
    pub async fn teardown_all(&self) {
        let identities: Vec<NeedIdentity> = self.slots.read().await.keys().cloned().collect();
        for identity in identities {
            self.teardown(&identity).await;
        }
    }

    /// Whether any instance is currently registered for this identity.
    pub async fn is_registered(&self, identity: &NeedIdentity) -> bool {
        self.slots
            .read()
            .await
            .get(identity)
            .is_some_and(|slots| !slots.is_empty())
    }

    /// Status of the first registered slot for this identity.
    pub async fn status(&self, identity: &NeedIdentity) -> Option<ContainerStatus> {
        let slots = self.slots.read().await;
        let slot = slots.get(identity)?.first()?;
        let state = slot.state.lock().await;
        Some(state.status())
    }

    async fn stop_slot(&self, slot: &Slot) {
        let mut state = slot.state.lock().await;
        if state.status().is_terminal() {
            return;
        }
        slot.alive.store(false, Ordering::SeqCst);

        if !state.advance(ContainerStatus::Stopping) {
            return;
        }

        if let Some(id) = state.container_id().map(String::from) {
            if self.keep_on_teardown {
                tracing::info!("keeping container {} on teardown as configured", id);
            } else {
                if let Err(e) = self.engine.stop_container(&id).await {
                    tracing::debug!("stop of container {} did not succeed: {}", id, e);
                }
                if let Err(e) = self.engine.remove_container(&id).await {
                    tracing::warn!("could not remove container {}: {}", id, e);
                }
            }
        }

        state.advance(ContainerStatus::Stopped);
        tracing::info!("tore down {}", slot.identity);
    }
}

impl Drop for Supervisor {
    fn drop(&mut self) {
        if let Ok(slots) = self.slots.try_read() {
            if !slots.is_empty() {
                tracing::warn!(
                    "Supervisor dropped with {} need(s) still registered; containers may leak",
                    slots.len()
                );
            }
        }
    }
}
