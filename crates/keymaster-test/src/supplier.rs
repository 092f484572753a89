//! Scripted supplier for reconciler tests.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use keymaster_common::{KeymasterError, KeymasterResult, StateSupplier};
use keymaster_types::{Interface, PublicKey};

#[derive(Debug, Default)]
struct SupplierState {
    interfaces: Vec<Interface>,
    /// One-shot responses served before `interfaces`.
    queued: VecDeque<KeymasterResult<Vec<Interface>>>,
    fail_fetches: bool,
    fail_reports: bool,
    fetch_count: usize,
    reported: Vec<(String, PublicKey)>,
}

/// Returns a fixed interface list until told otherwise. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct ScriptedSupplier {
    state: Arc<Mutex<SupplierState>>,
}

impl ScriptedSupplier {
    pub fn new(interfaces: Vec<Interface>) -> Self {
        let supplier = Self::default();
        supplier.set_interfaces(interfaces);
        supplier
    }

    fn state(&self) -> MutexGuard<'_, SupplierState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn set_interfaces(&self, interfaces: Vec<Interface>) {
        self.state().interfaces = interfaces;
    }

    /// Serves `response` on the next fetch only.
    pub fn queue(&self, response: KeymasterResult<Vec<Interface>>) {
        self.state().queued.push_back(response);
    }

    pub fn fail_fetches(&self, fail: bool) {
        self.state().fail_fetches = fail;
    }

    pub fn fail_reports(&self, fail: bool) {
        self.state().fail_reports = fail;
    }

    pub fn fetch_count(&self) -> usize {
        self.state().fetch_count
    }

    /// Public keys accepted so far, as (interface name, key).
    pub fn reported(&self) -> Vec<(String, PublicKey)> {
        self.state().reported.clone()
    }
}

#[async_trait]
impl StateSupplier for ScriptedSupplier {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn fetch(&self) -> KeymasterResult<Vec<Interface>> {
        let mut state = self.state();
        state.fetch_count += 1;
        if let Some(response) = state.queued.pop_front() {
            return response;
        }
        if state.fail_fetches {
            return Err(KeymasterError::http(
                "fetch interfaces",
                "connection refused",
            ));
        }
        Ok(state.interfaces.clone())
    }

    async fn report_public_key(
        &self,
        interface: &Interface,
        public_key: &PublicKey,
    ) -> KeymasterResult<()> {
        let mut state = self.state();
        if state.fail_reports {
            return Err(KeymasterError::http_status(
                "report public key",
                503,
                "unavailable",
            ));
        }
        state
            .reported
            .push((interface.name.clone(), *public_key));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures;

    #[tokio::test]
    async fn test_queued_response_served_once() {
        let supplier = ScriptedSupplier::new(vec![fixtures::wg0()]);
        supplier.queue(Ok(Vec::new()));

        assert!(supplier.fetch().await.unwrap().is_empty());
        assert_eq!(supplier.fetch().await.unwrap().len(), 1);
        assert_eq!(supplier.fetch_count(), 2);
    }

    #[tokio::test]
    async fn test_failures() {
        let supplier = ScriptedSupplier::new(vec![fixtures::wg0()]);
        supplier.fail_fetches(true);
        assert!(supplier.fetch().await.unwrap_err().is_retryable());

        supplier.fail_reports(true);
        let result = supplier
            .report_public_key(&fixtures::wg0(), &fixtures::public_key(1))
            .await;
        assert!(result.is_err());
        assert!(supplier.reported().is_empty());
    }
}
