//! Test infrastructure for keymaster
//!
//! Provides:
//! - Deterministic keys and interface fixtures
//! - An in-memory host implementing `StateApplier`
//! - A scripted `StateSupplier`
//! - Verification helpers for host state

pub mod fixtures;
mod host;
mod supplier;
mod verification;

pub use host::{FakeHost, HostOp};
pub use supplier::ScriptedSupplier;
pub use verification::*;
