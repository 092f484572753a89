//! Field-level difference between a desired and an actual interface.

use crate::{Interface, IpPrefix, Peer, PublicKey};
use std::fmt;

/// What has to change on the host to turn `actual` into `desired`.
///
/// Built by [`InterfaceDelta::between`]; an empty delta means the two are
/// equivalent and nothing should be touched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InterfaceDelta {
    pub private_key_changed: bool,
    pub listen_port: Option<u16>,
    /// New firewall mark; `Some(0)` turns it off.
    pub fw_mark: Option<u32>,
    pub addresses_to_add: Vec<IpPrefix>,
    pub addresses_to_remove: Vec<IpPrefix>,
    pub peers_to_add: Vec<Peer>,
    pub peers_to_remove: Vec<PublicKey>,
    /// Peers on both sides whose settings diverge, carrying the desired
    /// settings. An endpoint going from present to absent lands here too.
    pub peers_to_update: Vec<Peer>,
}

impl InterfaceDelta {
    /// Computes the delta for two interfaces with the same name.
    ///
    /// Sets are compared without regard to order. An actual private key that
    /// could not be read and an absent desired listen port never count as
    /// divergence.
    pub fn between(desired: &Interface, actual: &Interface) -> Self {
        let private_key_changed = match (&desired.private_key, &actual.private_key) {
            (Some(want), Some(have)) => want != have,
            _ => false,
        };

        let listen_port = desired.listen_port.filter(|p| Some(*p) != actual.listen_port);

        let want_mark = desired.fw_mark.unwrap_or(0);
        let fw_mark = (want_mark != actual.fw_mark.unwrap_or(0)).then_some(want_mark);

        let addresses_to_add = desired
            .addresses
            .difference(&actual.addresses)
            .copied()
            .collect();
        let addresses_to_remove = actual
            .addresses
            .difference(&desired.addresses)
            .copied()
            .collect();

        let mut peers_to_add = Vec::new();
        let mut peers_to_update = Vec::new();
        for peer in desired.peers() {
            match actual.peer(&peer.public_key) {
                None => peers_to_add.push(peer.clone()),
                Some(current) if current != peer => peers_to_update.push(peer.clone()),
                Some(_) => {}
            }
        }

        let peers_to_remove = actual
            .peers()
            .filter(|p| desired.peer(&p.public_key).is_none())
            .map(|p| p.public_key)
            .collect();

        Self {
            private_key_changed,
            listen_port,
            fw_mark,
            addresses_to_add,
            addresses_to_remove,
            peers_to_add,
            peers_to_remove,
            peers_to_update,
        }
    }

    /// The delta that builds `desired` on a host that has nothing.
    pub fn from_scratch(desired: &Interface) -> Self {
        Self {
            private_key_changed: desired.private_key.is_some(),
            listen_port: desired.listen_port,
            fw_mark: desired.fw_mark,
            addresses_to_add: desired.addresses.iter().copied().collect(),
            addresses_to_remove: Vec::new(),
            peers_to_add: desired.peers().cloned().collect(),
            peers_to_remove: Vec::new(),
            peers_to_update: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        !self.private_key_changed
            && self.listen_port.is_none()
            && self.fw_mark.is_none()
            && self.addresses_to_add.is_empty()
            && self.addresses_to_remove.is_empty()
            && !self.touches_peers()
    }

    pub fn touches_peers(&self) -> bool {
        !self.peers_to_add.is_empty()
            || !self.peers_to_remove.is_empty()
            || !self.peers_to_update.is_empty()
    }
}

impl fmt::Display for InterfaceDelta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("no changes");
        }

        let mut parts = Vec::new();
        if self.private_key_changed {
            parts.push("private key".to_string());
        }
        if let Some(port) = self.listen_port {
            parts.push(format!("listen port {}", port));
        }
        if let Some(mark) = self.fw_mark {
            parts.push(format!("fwmark {}", mark));
        }
        for (sign, count, what) in [
            ('+', self.addresses_to_add.len(), "addresses"),
            ('-', self.addresses_to_remove.len(), "addresses"),
            ('+', self.peers_to_add.len(), "peers"),
            ('-', self.peers_to_remove.len(), "peers"),
            ('~', self.peers_to_update.len(), "peers"),
        ] {
            if count > 0 {
                parts.push(format!("{}{} {}", sign, count, what));
            }
        }
        f.write_str(&parts.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PrivateKey;
    use pretty_assertions::assert_eq;

    const KEY_A: &str = "yAnz5TF+lXXJte14tji3zlMNq+hd2rYUIgJBgB3fBmk=";
    const KEY_B: &str = "xTIBA5rboUvnH4htodjb6e697QjLERt1NAB4mZqp8Dg=";
    const KEY_C: &str = "TrMvSoP4jYQlY6RIzBgbssQqY3vxI2Pi+y71lOWWXX0=";

    fn peer(key: &str, allowed: &[&str]) -> Peer {
        Peer::new(
            key.parse().unwrap(),
            allowed.iter().map(|a| a.parse().unwrap()),
        )
    }

    fn wg0() -> Interface {
        Interface::new("wg0")
            .unwrap()
            .with_address("10.0.0.1/24".parse().unwrap())
            .with_listen_port(Some(51820))
            .with_peer(
                peer(KEY_A, &["10.0.0.2/32"])
                    .with_endpoint(Some("198.51.100.7:51820".parse().unwrap())),
            )
    }

    #[test]
    fn test_identical_is_empty() {
        let delta = InterfaceDelta::between(&wg0(), &wg0());
        assert!(delta.is_empty());
        assert_eq!(delta.to_string(), "no changes");
    }

    #[test]
    fn test_redacted_actual_key_is_unchanged() {
        let key: PrivateKey = KEY_C.parse().unwrap();
        let desired = wg0().with_private_key(Some(key));
        assert!(InterfaceDelta::between(&desired, &wg0()).is_empty());

        let other: PrivateKey = KEY_B.parse().unwrap();
        let actual = wg0().with_private_key(Some(other));
        assert!(InterfaceDelta::between(&desired, &actual).private_key_changed);
    }

    #[test]
    fn test_absent_desired_port_is_dont_care() {
        let desired = wg0().with_listen_port(None);
        assert!(InterfaceDelta::between(&desired, &wg0()).is_empty());

        let desired = wg0().with_listen_port(Some(51821));
        assert_eq!(
            InterfaceDelta::between(&desired, &wg0()).listen_port,
            Some(51821)
        );
    }

    #[test]
    fn test_fw_mark_zero_means_off() {
        let actual = wg0().with_fw_mark(Some(0x51));
        let delta = InterfaceDelta::between(&wg0(), &actual);
        assert_eq!(delta.fw_mark, Some(0));
    }

    #[test]
    fn test_peer_added_others_untouched() {
        let desired = wg0().with_peer(peer(KEY_B, &["10.0.0.3/32"]));
        let delta = InterfaceDelta::between(&desired, &wg0());
        assert_eq!(delta.peers_to_add.len(), 1);
        assert_eq!(delta.peers_to_add[0].public_key, KEY_B.parse().unwrap());
        assert!(delta.peers_to_update.is_empty());
        assert!(delta.peers_to_remove.is_empty());
        assert_eq!(delta.to_string(), "+1 peers");
    }

    #[test]
    fn test_peer_removed() {
        let actual = wg0().with_peer(peer(KEY_B, &["10.0.0.3/32"]));
        let delta = InterfaceDelta::between(&wg0(), &actual);
        assert_eq!(delta.peers_to_remove, vec![KEY_B.parse().unwrap()]);
    }

    #[test]
    fn test_endpoint_cleared_is_update() {
        let desired = wg0().with_peer(peer(KEY_A, &["10.0.0.2/32"]));
        let delta = InterfaceDelta::between(&desired, &wg0());
        assert_eq!(delta.peers_to_update, vec![peer(KEY_A, &["10.0.0.2/32"])]);
        assert!(delta.peers_to_add.is_empty());
        assert!(delta.peers_to_remove.is_empty());
    }

    #[test]
    fn test_allowed_ips_order_irrelevant() {
        let a = wg0().with_peer(peer(KEY_B, &["10.0.0.3/32", "192.168.1.0/24"]));
        let b = wg0().with_peer(peer(KEY_B, &["192.168.1.0/24", "10.0.0.3/32"]));
        assert!(InterfaceDelta::between(&a, &b).is_empty());
    }

    #[test]
    fn test_addresses_diff() {
        let desired = wg0().with_address("fd00::1/64".parse().unwrap());
        let mut actual = wg0();
        actual.addresses.clear();
        actual.addresses.insert("10.0.0.9/24".parse().unwrap());

        let delta = InterfaceDelta::between(&desired, &actual);
        assert_eq!(delta.addresses_to_add.len(), 2);
        assert_eq!(
            delta.addresses_to_remove,
            vec!["10.0.0.9/24".parse::<IpPrefix>().unwrap()]
        );
    }

    #[test]
    fn test_from_scratch_adds_everything() {
        let desired = wg0().with_private_key(Some(KEY_C.parse().unwrap()));
        let delta = InterfaceDelta::from_scratch(&desired);
        assert!(delta.private_key_changed);
        assert_eq!(delta.listen_port, Some(51820));
        assert_eq!(delta.addresses_to_add.len(), 1);
        assert_eq!(delta.peers_to_add.len(), 1);
    }
}
