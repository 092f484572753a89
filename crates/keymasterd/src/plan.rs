//! Pairing desired and actual interfaces by name.

use std::collections::BTreeMap;

use keymaster_types::{Interface, InterfaceDelta};

/// One host operation decided for a pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InterfaceAction {
    /// Present in desired state only.
    Create(Interface),
    /// Present on both sides but not equivalent.
    Converge {
        desired: Interface,
        delta: InterfaceDelta,
    },
    /// Present on the host only.
    Remove(String),
}

impl InterfaceAction {
    pub fn name(&self) -> &str {
        match self {
            InterfaceAction::Create(iface) => &iface.name,
            InterfaceAction::Converge { desired, .. } => &desired.name,
            InterfaceAction::Remove(name) => name,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            InterfaceAction::Create(_) => "create",
            InterfaceAction::Converge { .. } => "converge",
            InterfaceAction::Remove(_) => "remove",
        }
    }
}

/// The actions for one pass, at most one per interface name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcilePlan {
    pub actions: Vec<InterfaceAction>,
    /// Names present on both sides and already equivalent.
    pub unchanged: Vec<String>,
}

impl ReconcilePlan {
    /// Builds the plan. `desired` must not contain duplicate names.
    pub fn build(desired: &[Interface], actual: &[Interface]) -> Self {
        let mut actual_by_name: BTreeMap<&str, &Interface> =
            actual.iter().map(|i| (i.name.as_str(), i)).collect();

        let mut plan = ReconcilePlan::default();

        for want in desired {
            match actual_by_name.remove(want.name.as_str()) {
                None => plan.actions.push(InterfaceAction::Create(want.clone())),
                Some(have) => {
                    let delta = InterfaceDelta::between(want, have);
                    if delta.is_empty() {
                        plan.unchanged.push(want.name.clone());
                    } else {
                        plan.actions.push(InterfaceAction::Converge {
                            desired: want.clone(),
                            delta,
                        });
                    }
                }
            }
        }

        for name in actual_by_name.into_keys() {
            plan.actions.push(InterfaceAction::Remove(name.to_string()));
        }

        plan
    }

    pub fn is_noop(&self) -> bool {
        self.actions.is_empty()
    }
}
