//! WireGuard key material.
//!
//! All three key kinds are 32-byte Curve25519 values carried as standard
//! base64 (44 characters with padding), the format `wg genkey` prints.

use crate::ParseError;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Length of every WireGuard key in bytes.
pub const KEY_LEN: usize = 32;

fn decode_key(s: &str) -> Result<[u8; KEY_LEN], ParseError> {
    let s = s.trim();
    let bytes = BASE64
        .decode(s)
        .map_err(|e| ParseError::InvalidKey(format!("not base64: {}", e)))?;
    bytes.try_into().map_err(|bytes: Vec<u8>| {
        ParseError::InvalidKey(format!(
            "expected {} bytes, got {}",
            KEY_LEN,
            bytes.len()
        ))
    })
}

macro_rules! wg_key {
    ($(#[$meta:meta])* $name:ident, redacted = $redacted:expr) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name([u8; KEY_LEN]);

        impl $name {
            pub const fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
                Self(bytes)
            }

            pub const fn as_bytes(&self) -> &[u8; KEY_LEN] {
                &self.0
            }

            /// Returns the base64 form used on the wire and by `wg`.
            pub fn to_base64(&self) -> String {
                BASE64.encode(self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.to_base64())
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                if $redacted {
                    write!(f, "{}([REDACTED])", stringify!($name))
                } else {
                    write!(f, "{}({})", stringify!($name), self.to_base64())
                }
            }
        }

        impl FromStr for $name {
            type Err = ParseError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                decode_key(s).map(Self)
            }
        }

        impl TryFrom<String> for $name {
            type Error = ParseError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                value.parse()
            }
        }

        impl From<$name> for String {
            fn from(key: $name) -> Self {
                key.to_base64()
            }
        }
    };
}

wg_key!(
    /// Interface private key. `Debug` output never shows the value.
    PrivateKey,
    redacted = true
);

wg_key!(
    /// Peer identity and the public half of an interface key pair.
    PublicKey,
    redacted = false
);

wg_key!(
    /// Optional symmetric key shared with one peer.
    PresharedKey,
    redacted = true
);

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const SAMPLE: &str = "yAnz5TF+lXXJte14tji3zlMNq+hd2rYUIgJBgB3fBmk=";

    #[test]
    fn test_base64_roundtrip() {
        let key: PublicKey = SAMPLE.parse().unwrap();
        assert_eq!(key.to_base64(), SAMPLE);
        assert_eq!(key.to_string(), SAMPLE);
    }

    #[test]
    fn test_rejects_wrong_length() {
        let err = "AAAA".parse::<PublicKey>().unwrap_err();
        assert!(err.to_string().contains("expected 32 bytes"));
        assert!("not base64 at all!".parse::<PrivateKey>().is_err());
    }

    #[test]
    fn test_private_key_debug_redacted() {
        let key: PrivateKey = SAMPLE.parse().unwrap();
        let debug = format!("{:?}", key);
        assert_eq!(debug, "PrivateKey([REDACTED])");
        assert!(!debug.contains(SAMPLE));
    }

    #[test]
    fn test_public_key_debug_shows_value() {
        let key: PublicKey = SAMPLE.parse().unwrap();
        assert!(format!("{:?}", key).contains(SAMPLE));
    }

    #[test]
    fn test_serde_as_string() {
        let key: PresharedKey = serde_json::from_str(&format!("\"{}\"", SAMPLE)).unwrap();
        assert_eq!(serde_json::to_string(&key).unwrap(), format!("\"{}\"", SAMPLE));
    }
}
