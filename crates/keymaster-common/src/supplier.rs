//! The source of desired interface state.

use async_trait::async_trait;
use keymaster_types::{Interface, PublicKey};

use crate::error::KeymasterResult;

/// Produces the desired set of interfaces for one reconciliation pass.
///
/// `fetch` is called once per pass and never concurrently with itself.
#[async_trait]
pub trait StateSupplier: Send + Sync {
    /// Short name for logs (e.g., "keymaster-server").
    fn name(&self) -> &str;

    /// Returns the complete desired state. An empty list is a valid answer
    /// and means every managed interface should be removed.
    async fn fetch(&self) -> KeymasterResult<Vec<Interface>>;

    /// Publishes the public half of the key an interface is now running with.
    ///
    /// Suppliers with no place to store it keep the default no-op.
    async fn report_public_key(
        &self,
        _interface: &Interface,
        _public_key: &PublicKey,
    ) -> KeymasterResult<()> {
        Ok(())
    }
}
