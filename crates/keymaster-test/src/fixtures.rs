//! Test fixtures for common reconciliation scenarios
//!
//! Keys are derived from a single byte so tests can name them by number.

use keymaster_types::{Endpoint, Interface, IpPrefix, Peer, PresharedKey, PrivateKey, PublicKey};

/// Private key whose 32 bytes are all `n`.
pub fn private_key(n: u8) -> PrivateKey {
    PrivateKey::from_bytes([n; 32])
}

/// Peer public key whose 32 bytes are all `n`.
pub fn public_key(n: u8) -> PublicKey {
    PublicKey::from_bytes([n; 32])
}

pub fn preshared_key(n: u8) -> PresharedKey {
    PresharedKey::from_bytes([n; 32])
}

fn prefix(s: &str) -> IpPrefix {
    s.parse().expect("fixture prefix")
}

/// Peer `n`: public key `n`, allowed IP `10.0.0.{n+1}/32`, endpoint
/// `198.51.100.{n}:51820`.
pub fn peer(n: u8) -> Peer {
    Peer::new(public_key(n), [prefix(&format!("10.0.0.{}/32", n + 1))]).with_endpoint(Some(
        Endpoint::new(format!("198.51.100.{}", n), 51820).expect("fixture endpoint"),
    ))
}

/// An interface with an address and a private key but no peers.
pub fn interface(name: &str, key: u8, address: &str) -> Interface {
    Interface::new(name)
        .expect("fixture interface name")
        .with_private_key(Some(private_key(key)))
        .with_address(prefix(address))
}

/// `wg0` on 51820 with peer 1 (the "P1" of the scenarios).
pub fn wg0() -> Interface {
    interface("wg0", 1, "10.0.0.1/24")
        .with_listen_port(Some(51820))
        .with_peer(peer(1))
}

/// `wg0` with peers 1 and 2.
pub fn wg0_with_p2() -> Interface {
    wg0().with_peer(peer(2))
}

/// `wg1` on 51821 with one peer of its own.
pub fn wg1() -> Interface {
    interface("wg1", 4, "10.1.0.1/24")
        .with_listen_port(Some(51821))
        .with_peer(peer(3))
}

/// `wg{10+i}`, for tests that need many distinct interfaces.
pub fn numbered(i: usize) -> Interface {
    let octet = u8::try_from(i % 200).unwrap_or(0);
    interface(
        &format!("wg{}", 10 + i),
        octet.wrapping_add(10),
        &format!("10.{}.0.1/24", octet.wrapping_add(10)),
    )
    .with_peer(peer(octet))
}

/// `iface` as handed out by a server that tracks it under `id`.
pub fn from_server(iface: Interface, id: &str, advertised: Option<PublicKey>) -> Interface {
    iface.with_source(Some(id.to_string()), advertised)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keys_are_distinct_by_number() {
        assert_ne!(private_key(1), private_key(2));
        assert_ne!(public_key(1), public_key(2));
    }

    #[test]
    fn test_scenario_interfaces() {
        let wg0 = wg0();
        assert_eq!(wg0.name, "wg0");
        assert_eq!(wg0.peer_count(), 1);
        assert!(wg0.peer(&public_key(1)).is_some());

        let both = wg0_with_p2();
        assert_eq!(both.peer_count(), 2);
        assert_eq!(both.peer(&public_key(1)), wg0.peer(&public_key(1)));
    }

    #[test]
    fn test_numbered_names_unique() {
        let names: std::collections::BTreeSet<_> = (0..20).map(|i| numbered(i).name).collect();
        assert_eq!(names.len(), 20);
    }

    #[test]
    fn test_from_server() {
        let iface = from_server(wg0(), "7", Some(public_key(5)));
        assert_eq!(iface.source_id.as_deref(), Some("7"));
        assert_eq!(iface.advertised_public_key, Some(public_key(5)));
    }
}
