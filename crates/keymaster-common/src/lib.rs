//! Common infrastructure for the keymaster reconciler.
//!
//! - [`shell`]: shell command execution with proper quoting, plus a variant
//!   that feeds secrets on stdin
//! - [`StateSupplier`]: where desired interface state comes from
//! - [`StateApplier`]: how interface state is read from and written to a host
//! - [`error`]: the error taxonomy shared by every collaborator
//!
//! # Example
//!
//! ```ignore
//! use keymaster_common::{
//!     shell::{self, IP_CMD, shellquote},
//!     KeymasterResult,
//! };
//!
//! async fn link_up(name: &str) -> KeymasterResult<()> {
//!     let cmd = format!("{} link set dev {} up", IP_CMD, shellquote(name));
//!     shell::exec_or_throw(&cmd).await?;
//!     Ok(())
//! }
//! ```

pub mod applier;
pub mod error;
pub mod shell;
pub mod supplier;

pub use applier::StateApplier;
pub use error::{KeymasterError, KeymasterResult};
pub use supplier::StateSupplier;
