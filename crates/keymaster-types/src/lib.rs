//! Interface model shared by every keymaster crate.
//!
//! This crate provides the value types a reconciliation pass works on:
//!
//! - [`Interface`]: one WireGuard tunnel interface and its peers
//! - [`Peer`]: a remote endpoint, identified by its [`PublicKey`]
//! - [`IpPrefix`]: an address with prefix length (CIDR notation)
//! - [`Endpoint`]: a `host:port` pair
//! - [`PrivateKey`], [`PublicKey`], [`PresharedKey`]: base64 Curve25519 keys
//! - [`InterfaceDelta`]: field-level difference between two interfaces
//!
//! Values are rebuilt on every pass and never mutated in place by the
//! reconciler. Decoding validates the invariants (unique peer keys,
//! non-empty address and allowed-IP sets, legal interface names).

mod delta;
mod endpoint;
mod interface;
mod ip;
mod key;

pub use delta::InterfaceDelta;
pub use endpoint::Endpoint;
pub use interface::{Interface, Peer};
pub use ip::IpPrefix;
pub use key::{PresharedKey, PrivateKey, PublicKey, KEY_LEN};

/// Common error type for parsing and validation failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("invalid IP prefix format: {0}")]
    InvalidIpPrefix(String),

    #[error("invalid endpoint format: {0}")]
    InvalidEndpoint(String),

    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("invalid interface name: {0}")]
    InvalidInterfaceName(String),

    #[error("interface {interface}: {message}")]
    InvalidInterface { interface: String, message: String },

    #[error("peer {peer}: {message}")]
    InvalidPeer { peer: String, message: String },
}
