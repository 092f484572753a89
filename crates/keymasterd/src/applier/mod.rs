//! State appliers: how the desired interface set is made real on the host.

pub(crate) mod host;
mod uci;
mod wg;

pub use uci::UciApplier;
pub use wg::WgApplier;

use async_trait::async_trait;
use keymaster_common::{KeymasterResult, StateApplier};
use keymaster_types::Interface;

use crate::config::ApplierConfig;

/// The applier chosen at startup.
pub enum Applier {
    Wg(WgApplier),
    Uci(UciApplier),
}

impl Applier {
    pub fn from_config(config: &ApplierConfig) -> Self {
        match config {
            ApplierConfig::Wg { config_dir } => Applier::Wg(WgApplier::new(config_dir.clone())),
            ApplierConfig::Uci => Applier::Uci(UciApplier::new()),
        }
    }
}

#[async_trait]
impl StateApplier for Applier {
    fn name(&self) -> &str {
        match self {
            Applier::Wg(a) => a.name(),
            Applier::Uci(a) => a.name(),
        }
    }

    async fn read_current(&self) -> KeymasterResult<Vec<Interface>> {
        match self {
            Applier::Wg(a) => a.read_current().await,
            Applier::Uci(a) => a.read_current().await,
        }
    }

    async fn apply(&self, desired: &Interface) -> KeymasterResult<()> {
        match self {
            Applier::Wg(a) => a.apply(desired).await,
            Applier::Uci(a) => a.apply(desired).await,
        }
    }

    async fn remove(&self, name: &str) -> KeymasterResult<()> {
        match self {
            Applier::Wg(a) => a.remove(name).await,
            Applier::Uci(a) => a.remove(name).await,
        }
    }
}
