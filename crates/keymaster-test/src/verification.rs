//! Verification helpers for host state
//!
//! Assertions return `VerifyResult` so a failing check names exactly what
//! differed.

use crate::FakeHost;
use keymaster_types::{Interface, Peer, PublicKey};
use thiserror::Error;

/// Verification error types
#[derive(Error, Debug)]
pub enum VerificationError {
    #[error("Expected interface '{name}' on the host")]
    InterfaceMissing { name: String },

    #[error("Interface '{name}' should not be on the host")]
    InterfaceUnexpected { name: String },

    #[error("Interface '{interface}' has no peer {public_key}")]
    PeerMissing {
        interface: String,
        public_key: PublicKey,
    },

    #[error("Peer {public_key} on '{interface}' differs: expected {expected:?}, got {actual:?}")]
    PeerMismatch {
        interface: String,
        public_key: PublicKey,
        expected: Box<Peer>,
        actual: Box<Peer>,
    },

    #[error("Expected {expected} {what}, found {actual}")]
    CountMismatch {
        what: &'static str,
        expected: usize,
        actual: usize,
    },
}

/// Result type for verification operations
pub type VerifyResult<T> = Result<T, VerificationError>;

/// Host state verification helper
pub struct HostVerifier<'a> {
    host: &'a FakeHost,
}

impl<'a> HostVerifier<'a> {
    pub fn new(host: &'a FakeHost) -> Self {
        Self { host }
    }

    pub fn assert_interface_exists(&self, name: &str) -> VerifyResult<Interface> {
        self.host
            .interface(name)
            .ok_or_else(|| VerificationError::InterfaceMissing {
                name: name.to_string(),
            })
    }

    pub fn assert_interface_absent(&self, name: &str) -> VerifyResult<()> {
        match self.host.interface(name) {
            Some(_) => Err(VerificationError::InterfaceUnexpected {
                name: name.to_string(),
            }),
            None => Ok(()),
        }
    }

    /// Verify the host holds exactly `expected` for this peer
    pub fn assert_peer(&self, interface: &str, expected: &Peer) -> VerifyResult<()> {
        let iface = self.assert_interface_exists(interface)?;
        match iface.peer(&expected.public_key) {
            None => Err(VerificationError::PeerMissing {
                interface: interface.to_string(),
                public_key: expected.public_key,
            }),
            Some(actual) if actual == expected => Ok(()),
            Some(actual) => Err(VerificationError::PeerMismatch {
                interface: interface.to_string(),
                public_key: expected.public_key,
                expected: Box::new(expected.clone()),
                actual: Box::new(actual.clone()),
            }),
        }
    }

    pub fn assert_peer_count(&self, interface: &str, expected: usize) -> VerifyResult<()> {
        let actual = self.assert_interface_exists(interface)?.peer_count();
        if actual != expected {
            return Err(VerificationError::CountMismatch {
                what: "peers",
                expected,
                actual,
            });
        }
        Ok(())
    }

    pub fn assert_interface_count(&self, expected: usize) -> VerifyResult<()> {
        let actual = self.host.interface_names().len();
        if actual != expected {
            return Err(VerificationError::CountMismatch {
                what: "interfaces",
                expected,
                actual,
            });
        }
        Ok(())
    }

    /// Verify the host saw no state changes since `baseline`
    pub fn assert_no_mutations_since(&self, baseline: usize) -> VerifyResult<()> {
        let actual = self.host.mutation_count();
        if actual != baseline {
            return Err(VerificationError::CountMismatch {
                what: "host mutations",
                expected: baseline,
                actual,
            });
        }
        Ok(())
    }
}
