//! Private key generation and public key derivation (Curve25519).

use keymaster_types::{PrivateKey, PublicKey};
use rand::rngs::OsRng;
use x25519_dalek::StaticSecret;

/// Generates a fresh private key, clamped the way `wg genkey` clamps it.
pub fn generate_private_key() -> PrivateKey {
    let secret = StaticSecret::random_from_rng(OsRng);
    PrivateKey::from_bytes(clamp(secret.to_bytes()))
}

/// Derives the public key that peers use to address this interface.
pub fn public_key_for(private_key: &PrivateKey) -> PublicKey {
    let secret = StaticSecret::from(*private_key.as_bytes());
    PublicKey::from_bytes(x25519_dalek::PublicKey::from(&secret).to_bytes())
}

fn clamp(mut bytes: [u8; 32]) -> [u8; 32] {
    bytes[0] &= 248;
    bytes[31] &= 127;
    bytes[31] |= 64;
    bytes
}
