//! Reading and writing interface state on a host.

use async_trait::async_trait;
use keymaster_types::Interface;

use crate::error::KeymasterResult;

/// A mechanism that configures WireGuard interfaces on the local host.
///
/// Implementations must tolerate concurrent calls for different interface
/// names; the caller never issues two concurrent calls for the same name.
/// `apply` and `remove` are idempotent: repeating a call whose effect is
/// already in place performs no host mutation.
#[async_trait]
pub trait StateApplier: Send + Sync {
    /// Short name for logs (e.g., "wg").
    fn name(&self) -> &str;

    /// Returns every interface this mechanism currently manages.
    ///
    /// Private keys may be `None` where the host does not expose them.
    async fn read_current(&self) -> KeymasterResult<Vec<Interface>>;

    /// Creates `desired` if absent, otherwise converges the existing
    /// interface to it.
    async fn apply(&self, desired: &Interface) -> KeymasterResult<()>;

    /// Deletes an interface. Removing one that does not exist succeeds.
    async fn remove(&self, name: &str) -> KeymasterResult<()>;
}
