//! The reconciliation loop.
//!
//! A pass fetches the desired interfaces, reads what the host has, resolves
//! private keys, diffs the two by name and dispatches one host operation per
//! divergent interface. Passes never overlap; shutdown is only observed
//! between passes.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use keymaster_common::{KeymasterError, KeymasterResult, StateApplier, StateSupplier};
use keymaster_types::{Interface, PrivateKey};
use tokio::sync::{watch, Semaphore};
use tokio::task::{self, JoinSet};
use tracing::{debug, error, info, warn};

use crate::keys;
use crate::plan::{InterfaceAction, ReconcilePlan};

pub const DEFAULT_MAX_CONCURRENT_APPLIES: usize = 4;

#[derive(Debug, Clone)]
pub struct ReconcilerOptions {
    /// Used for every interface when set, whatever the supplier says.
    pub private_key_override: Option<PrivateKey>,
    pub max_concurrent_applies: usize,
}

impl Default for ReconcilerOptions {
    fn default() -> Self {
        Self {
            private_key_override: None,
            max_concurrent_applies: DEFAULT_MAX_CONCURRENT_APPLIES,
        }
    }
}

/// How a pass ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassOutcome {
    /// Every action was dispatched; individual ones may still have failed.
    Completed,
    FetchFailed,
    /// The supplier returned a set the reconciler refuses to act on.
    Rejected,
    ReadFailed,
}

#[derive(Debug)]
pub struct PassReport {
    pub outcome: PassOutcome,
    pub created: Vec<String>,
    pub converged: Vec<String>,
    pub unchanged: Vec<String>,
    pub removed: Vec<String>,
    pub failed: Vec<(String, KeymasterError)>,
    /// Interfaces whose public key was accepted by the supplier.
    pub reported: Vec<String>,
}

impl PassReport {
    fn new(outcome: PassOutcome) -> Self {
        Self {
            outcome,
            created: Vec::new(),
            converged: Vec::new(),
            unchanged: Vec::new(),
            removed: Vec::new(),
            failed: Vec::new(),
            reported: Vec::new(),
        }
    }

    /// True when the pass ran to the end and no interface failed.
    pub fn is_success(&self) -> bool {
        self.outcome == PassOutcome::Completed && self.failed.is_empty()
    }

    pub fn is_failed(&self, name: &str) -> bool {
        self.failed.iter().any(|(n, _)| n == name)
    }
}

pub struct Reconciler<S, A> {
    supplier: S,
    applier: Arc<A>,
    options: ReconcilerOptions,
    /// Keys this process generated, by interface name.
    generated_keys: HashMap<String, PrivateKey>,
}

impl<S, A> Reconciler<S, A>
where
    S: StateSupplier,
    A: StateApplier + 'static,
{
    pub fn new(supplier: S, applier: A, options: ReconcilerOptions) -> Self {
        info!(
            supplier = supplier.name(),
            applier = applier.name(),
            max_concurrent_applies = options.max_concurrent_applies,
            key_override = options.private_key_override.is_some(),
            "Reconciler initialized"
        );
        Self {
            supplier,
            applier: Arc::new(applier),
            options,
            generated_keys: HashMap::new(),
        }
    }

    /// Runs passes every `period` until `shutdown` turns true.
    pub async fn run(&mut self, period: Duration, mut shutdown: watch::Receiver<bool>) {
        info!(period_secs = period.as_secs(), "Reconciliation loop started");

        while !*shutdown.borrow() {
            self.run_pass().await;

            tokio::select! {
                _ = tokio::time::sleep(period) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        // a dropped sender counts as shutdown
                        break;
                    }
                }
            }
        }

        info!("Reconciliation loop stopped");
    }

    /// Runs one full pass.
    pub async fn run_pass(&mut self) -> PassReport {
        let mut desired = match self.supplier.fetch().await {
            Ok(interfaces) => interfaces,
            Err(e) => {
                warn!(
                    supplier = self.supplier.name(),
                    error = %e,
                    retryable = e.is_retryable(),
                    "Fetch failed, host left untouched"
                );
                return PassReport::new(PassOutcome::FetchFailed);
            }
        };

        if let Err(e) = self.check_unique_names(&desired) {
            warn!(error = %e, "Desired state rejected, host left untouched");
            return PassReport::new(PassOutcome::Rejected);
        }

        let actual = match self.applier.read_current().await {
            Ok(interfaces) => interfaces,
            Err(e) => {
                warn!(
                    applier = self.applier.name(),
                    error = %e,
                    "Reading host state failed, host left untouched"
                );
                return PassReport::new(PassOutcome::ReadFailed);
            }
        };

        self.resolve_keys(&mut desired, &actual);

        let plan = ReconcilePlan::build(&desired, &actual);
        debug!(
            actions = plan.actions.len(),
            unchanged = plan.unchanged.len(),
            "Plan built"
        );

        let mut report = PassReport::new(PassOutcome::Completed);
        report.unchanged = plan.unchanged.clone();
        self.dispatch(plan, &mut report).await;
        self.report_public_keys(&desired, &mut report).await;

        info!(
            desired = desired.len(),
            created = report.created.len(),
            converged = report.converged.len(),
            unchanged = report.unchanged.len(),
            removed = report.removed.len(),
            failed = report.failed.len(),
            "Pass finished"
        );
        report
    }

    fn check_unique_names(&self, desired: &[Interface]) -> KeymasterResult<()> {
        let mut seen = HashSet::new();
        for iface in desired {
            if !seen.insert(iface.name.as_str()) {
                return Err(KeymasterError::supplier_contract(
                    self.supplier.name(),
                    format!("interface '{}' listed more than once", iface.name),
                ));
            }
        }
        Ok(())
    }

    /// Gives every desired interface a private key.
    ///
    /// Order: configured override, supplier key, host key for the same
    /// name, key generated earlier by this process, fresh key.
    fn resolve_keys(&mut self, desired: &mut [Interface], actual: &[Interface]) {
        let host_keys: HashMap<&str, PrivateKey> = actual
            .iter()
            .filter_map(|i| i.private_key.map(|k| (i.name.as_str(), k)))
            .collect();

        for iface in desired.iter_mut() {
            if let Some(key) = self.options.private_key_override {
                iface.private_key = Some(key);
                continue;
            }
            if iface.private_key.is_some() {
                continue;
            }
            if let Some(key) = host_keys.get(iface.name.as_str()) {
                iface.private_key = Some(*key);
                continue;
            }
            let key = *self
                .generated_keys
                .entry(iface.name.clone())
                .or_insert_with(|| {
                    info!(interface = %iface.name, "Generating private key");
                    keys::generate_private_key()
                });
            iface.private_key = Some(key);
        }

        let names: HashSet<&str> = desired.iter().map(|i| i.name.as_str()).collect();
        self.generated_keys
            .retain(|name, _| names.contains(name.as_str()));
    }

    async fn dispatch(&self, plan: ReconcilePlan, report: &mut PassReport) {
        let semaphore = Arc::new(Semaphore::new(self.options.max_concurrent_applies.max(1)));
        let mut tasks = JoinSet::new();
        let mut names: HashMap<task::Id, String> = HashMap::new();

        for action in plan.actions {
            let name = action.name().to_string();
            let applier = Arc::clone(&self.applier);
            let semaphore = Arc::clone(&semaphore);
            let handle = tasks.spawn(async move {
                let result = match semaphore.acquire_owned().await {
                    Ok(_permit) => execute(&*applier, &action).await,
                    Err(_) => Err(KeymasterError::internal("apply semaphore closed")),
                };
                (action, result)
            });
            names.insert(handle.id(), name);
        }

        while let Some(joined) = tasks.join_next_with_id().await {
            let (action, result) = match joined {
                Ok((_, done)) => done,
                Err(e) => {
                    let name = names.remove(&e.id()).unwrap_or_default();
                    error!(interface = %name, error = %e, "Interface task aborted");
                    report.failed.push((
                        name,
                        KeymasterError::internal(format!("interface task aborted: {}", e)),
                    ));
                    continue;
                }
            };

            let name = action.name().to_string();
            match result {
                Ok(()) => {
                    info!(interface = %name, action = action.kind(), "Interface reconciled");
                    match action {
                        InterfaceAction::Create(_) => report.created.push(name),
                        InterfaceAction::Converge { .. } => report.converged.push(name),
                        InterfaceAction::Remove(_) => report.removed.push(name),
                    }
                }
                Err(e) => {
                    warn!(
                        interface = %name,
                        action = action.kind(),
                        error = %e,
                        "Interface reconcile failed, retrying next pass"
                    );
                    report.failed.push((name, e));
                }
            }
        }
    }

    /// Publishes derived public keys the supplier does not know yet.
    ///
    /// Covers unchanged interfaces too so a report that failed once is
    /// retried on the next pass.
    async fn report_public_keys(&self, desired: &[Interface], report: &mut PassReport) {
        for iface in desired {
            if iface.source_id.is_none() || report.is_failed(&iface.name) {
                continue;
            }
            let Some(private_key) = iface.private_key else {
                continue;
            };
            let public_key = keys::public_key_for(&private_key);
            if iface.advertised_public_key == Some(public_key) {
                continue;
            }

            match self.supplier.report_public_key(iface, &public_key).await {
                Ok(()) => {
                    info!(interface = %iface.name, public_key = %public_key, "Public key reported");
                    report.reported.push(iface.name.clone());
                }
                Err(e) => {
                    warn!(interface = %iface.name, error = %e, "Public key report failed");
                }
            }
        }
    }
}

async fn execute<A: StateApplier + ?Sized>(
    applier: &A,
    action: &InterfaceAction,
) -> KeymasterResult<()> {
    match action {
        InterfaceAction::Create(desired) => {
            debug!(interface = %desired.name, "Creating interface");
            applier.apply(desired).await
        }
        InterfaceAction::Converge { desired, delta } => {
            debug!(interface = %desired.name, %delta, "Converging interface");
            applier.apply(desired).await
        }
        InterfaceAction::Remove(name) => {
            debug!(interface = %name, "Removing interface");
            applier.remove(name).await
        }
    }
}
