//! In-memory host for reconciler tests.
//!
//! `FakeHost` implements `StateApplier` over a map of interfaces. Clones
//! share state, so a test keeps one handle while the reconciler owns
//! another. Every operation is logged; only operations that change the map
//! count as mutations.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use keymaster_common::{KeymasterError, KeymasterResult, StateApplier};
use keymaster_types::Interface;
use tracing::debug;

/// Operation received by the host, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostOp {
    Read,
    Apply(String),
    Remove(String),
}

#[derive(Debug, Default)]
struct HostState {
    interfaces: BTreeMap<String, Interface>,
    ops: Vec<HostOp>,
    mutations: usize,
    fail_names: HashSet<String>,
    panic_names: HashSet<String>,
    fail_reads: bool,
    in_flight: HashSet<String>,
    max_in_flight: usize,
    overlap: bool,
}

#[derive(Debug, Clone, Copy, Default)]
struct HostOptions {
    redact_keys: bool,
    delay: Option<Duration>,
}

#[derive(Debug, Clone, Default)]
pub struct FakeHost {
    state: Arc<Mutex<HostState>>,
    options: HostOptions,
}

impl FakeHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report interfaces without private keys, like a host that cannot read
    /// them back.
    pub fn with_redacted_keys(mut self) -> Self {
        self.options.redact_keys = true;
        self
    }

    /// Hold every apply/remove for `delay` so overlapping calls are visible.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.options.delay = Some(delay);
        self
    }

    fn state(&self) -> MutexGuard<'_, HostState> {
        // a panicking test thread must not hide the state from the others
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Puts an interface on the host without counting a mutation.
    pub fn insert(&self, iface: Interface) {
        let iface = strip_source(iface);
        self.state().interfaces.insert(iface.name.clone(), iface);
    }

    pub fn interface(&self, name: &str) -> Option<Interface> {
        self.state().interfaces.get(name).cloned()
    }

    pub fn interface_names(&self) -> Vec<String> {
        self.state().interfaces.keys().cloned().collect()
    }

    pub fn mutation_count(&self) -> usize {
        self.state().mutations
    }

    pub fn ops(&self) -> Vec<HostOp> {
        self.state().ops.clone()
    }

    pub fn clear_ops(&self) {
        self.state().ops.clear();
    }

    /// Makes apply and remove fail for `name` until `recover` is called.
    pub fn fail_on(&self, name: &str) {
        self.state().fail_names.insert(name.to_string());
    }

    pub fn recover(&self, name: &str) {
        self.state().fail_names.remove(name);
    }

    /// Makes apply and remove panic for `name`, like a crashed task.
    pub fn panic_on(&self, name: &str) {
        self.state().panic_names.insert(name.to_string());
    }

    pub fn fail_reads(&self, fail: bool) {
        self.state().fail_reads = fail;
    }

    pub fn max_in_flight(&self) -> usize {
        self.state().max_in_flight
    }

    /// True if two operations on the same interface ever ran at once.
    pub fn saw_overlap(&self) -> bool {
        self.state().overlap
    }

    async fn enter(&self, name: &str, op: HostOp) -> KeymasterResult<()> {
        {
            let mut state = self.state();
            state.ops.push(op);
            if !state.in_flight.insert(name.to_string()) {
                state.overlap = true;
            }
            state.max_in_flight = state.max_in_flight.max(state.in_flight.len());
        }

        if let Some(delay) = self.options.delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state();
        state.in_flight.remove(name);
        if state.panic_names.contains(name) {
            drop(state);
            panic!("fake host crashed on {}", name);
        }
        if state.fail_names.contains(name) {
            return Err(KeymasterError::ShellCommandFailed {
                command: format!("fake-host {}", name),
                exit_code: 1,
                output: "injected failure".to_string(),
            });
        }
        Ok(())
    }
}

/// The host never learns where an interface came from.
fn strip_source(iface: Interface) -> Interface {
    iface.with_source(None, None)
}

#[async_trait]
impl StateApplier for FakeHost {
    fn name(&self) -> &str {
        "fake-host"
    }

    async fn read_current(&self) -> KeymasterResult<Vec<Interface>> {
        let mut state = self.state();
        state.ops.push(HostOp::Read);
        if state.fail_reads {
            return Err(KeymasterError::internal("injected read failure"));
        }
        Ok(state
            .interfaces
            .values()
            .map(|i| {
                if self.options.redact_keys {
                    i.clone().with_private_key(None)
                } else {
                    i.clone()
                }
            })
            .collect())
    }

    async fn apply(&self, desired: &Interface) -> KeymasterResult<()> {
        self.enter(&desired.name, HostOp::Apply(desired.name.clone()))
            .await?;
        if desired.private_key.is_none() {
            return Err(KeymasterError::missing_private_key(&desired.name));
        }

        let desired = strip_source(desired.clone());
        let mut state = self.state();
        if state.interfaces.get(&desired.name) != Some(&desired) {
            debug!(interface = %desired.name, "fake host applying");
            state.interfaces.insert(desired.name.clone(), desired);
            state.mutations += 1;
        }
        Ok(())
    }

    async fn remove(&self, name: &str) -> KeymasterResult<()> {
        self.enter(name, HostOp::Remove(name.to_string())).await?;
        let mut state = self.state();
        if state.interfaces.remove(name).is_some() {
            debug!(interface = %name, "fake host removing");
            state.mutations += 1;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures;

    #[test]
    fn test_apply_is_idempotent() {
        let host = FakeHost::new();
        tokio_test::block_on(async {
            host.apply(&fixtures::wg0()).await.unwrap();
            host.apply(&fixtures::wg0()).await.unwrap();
        });
        assert_eq!(host.mutation_count(), 1);
        assert_eq!(
            host.ops(),
            vec![HostOp::Apply("wg0".into()), HostOp::Apply("wg0".into())]
        );
    }

    #[tokio::test]
    async fn test_remove_absent_is_noop() {
        let host = FakeHost::new();
        host.remove("wg0").await.unwrap();
        assert_eq!(host.mutation_count(), 0);
    }

    #[tokio::test]
    async fn test_injected_failures() {
        let host = FakeHost::new();
        host.fail_on("wg0");
        assert!(host.apply(&fixtures::wg0()).await.is_err());
        assert!(host.interface("wg0").is_none());

        host.recover("wg0");
        host.apply(&fixtures::wg0()).await.unwrap();
        assert!(host.interface("wg0").is_some());

        host.fail_reads(true);
        assert!(host.read_current().await.is_err());
    }

    #[tokio::test]
    #[should_panic(expected = "fake host crashed on wg0")]
    async fn test_panic_on() {
        let host = FakeHost::new();
        host.panic_on("wg0");
        let _ = host.apply(&fixtures::wg0()).await;
    }

    #[tokio::test]
    async fn test_redacted_keys() {
        let host = FakeHost::new().with_redacted_keys();
        host.insert(fixtures::wg0());
        let read = host.read_current().await.unwrap();
        assert!(read[0].private_key.is_none());
        assert!(host.interface("wg0").unwrap().private_key.is_some());
    }

    #[tokio::test]
    async fn test_source_not_stored() {
        let host = FakeHost::new();
        let iface = fixtures::from_server(fixtures::wg0(), "1", None);
        host.apply(&iface).await.unwrap();
        assert_eq!(host.interface("wg0"), Some(fixtures::wg0()));
    }
}
