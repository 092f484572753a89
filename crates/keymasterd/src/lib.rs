//! keymasterd - WireGuard interface reconciliation daemon
//!
//! keymasterd keeps the WireGuard interfaces on a host in line with a
//! remote source of truth:
//! - Suppliers fetch the desired interface set (keymaster-server, udpu or a
//!   local file) and receive the public keys of generated private keys
//! - Appliers read and converge host state (`ip`/`wg`, or OpenWrt UCI)
//! - The reconciler runs one pass per sync period, diffing by interface name

pub mod applier;
pub mod commands;
pub mod config;
pub mod keys;
pub mod plan;
pub mod reconciler;
pub mod supplier;
pub mod wg_conf;

pub use applier::Applier;
pub use config::{DaemonConfig, KeymasterConfig};
pub use plan::{InterfaceAction, ReconcilePlan};
pub use reconciler::{PassOutcome, PassReport, Reconciler, ReconcilerOptions};
pub use supplier::Supplier;
