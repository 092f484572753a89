//! State suppliers: where the desired interface set comes from.

mod file;
mod http;
mod keymaster_server;
mod udpu;

pub use file::FileSupplier;
pub use keymaster_server::KeymasterServerSupplier;
pub use udpu::UdpuSupplier;

use async_trait::async_trait;
use keymaster_common::{KeymasterResult, StateSupplier};
use keymaster_types::{Interface, PublicKey};

use crate::config::SupplierConfig;

/// The supplier chosen at startup.
pub enum Supplier {
    KeymasterServer(KeymasterServerSupplier),
    Udpu(UdpuSupplier),
    File(FileSupplier),
}

impl Supplier {
    pub fn from_config(config: &SupplierConfig) -> KeymasterResult<Self> {
        Ok(match config {
            SupplierConfig::KeymasterServer {
                url,
                token,
                timeout,
            } => Supplier::KeymasterServer(KeymasterServerSupplier::new(
                url.clone(),
                token,
                *timeout,
            )?),
            SupplierConfig::Udpu {
                url,
                network_name,
                timeout,
            } => Supplier::Udpu(UdpuSupplier::new(
                url.clone(),
                network_name.clone(),
                *timeout,
            )?),
            SupplierConfig::File { path } => Supplier::File(FileSupplier::new(path.clone())),
        })
    }
}

#[async_trait]
impl StateSupplier for Supplier {
    fn name(&self) -> &str {
        match self {
            Supplier::KeymasterServer(s) => s.name(),
            Supplier::Udpu(s) => s.name(),
            Supplier::File(s) => s.name(),
        }
    }

    async fn fetch(&self) -> KeymasterResult<Vec<Interface>> {
        match self {
            Supplier::KeymasterServer(s) => s.fetch().await,
            Supplier::Udpu(s) => s.fetch().await,
            Supplier::File(s) => s.fetch().await,
        }
    }

    async fn report_public_key(
        &self,
        interface: &Interface,
        public_key: &PublicKey,
    ) -> KeymasterResult<()> {
        match self {
            Supplier::KeymasterServer(s) => s.report_public_key(interface, public_key).await,
            Supplier::Udpu(s) => s.report_public_key(interface, public_key).await,
            Supplier::File(s) => s.report_public_key(interface, public_key).await,
        }
    }
}
