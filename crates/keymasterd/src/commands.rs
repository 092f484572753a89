//! Shell command builders for the `ip`, `wg` and `uci` mechanisms.
//!
//! Builders only produce strings; secrets are never part of them. Commands
//! that consume a key read it from `/dev/stdin`.

use keymaster_common::shell::{self, shellquote};
use keymaster_types::{IpPrefix, Peer, PublicKey};

/// Build WireGuard link creation command
pub fn build_add_link_cmd(name: &str) -> String {
    format!(
        "{} link add dev {} type wireguard",
        shell::IP_CMD,
        shellquote(name)
    )
}

pub fn build_del_link_cmd(name: &str) -> String {
    format!("{} link del dev {}", shell::IP_CMD, shellquote(name))
}

pub fn build_set_link_up_cmd(name: &str) -> String {
    format!("{} link set dev {} up", shell::IP_CMD, shellquote(name))
}

/// Build the JSON address dump used to read link state and addresses
pub fn build_show_addresses_cmd(name: &str) -> String {
    format!("{} -j address show dev {}", shell::IP_CMD, shellquote(name))
}

pub fn build_add_address_cmd(name: &str, address: &IpPrefix) -> String {
    format!(
        "{} address add {} dev {}",
        shell::IP_CMD,
        shellquote(&address.to_string()),
        shellquote(name)
    )
}

pub fn build_del_address_cmd(name: &str, address: &IpPrefix) -> String {
    format!(
        "{} address del {} dev {}",
        shell::IP_CMD,
        shellquote(&address.to_string()),
        shellquote(name)
    )
}

/// Build private key command; the key itself is written to stdin
pub fn build_set_private_key_cmd(name: &str) -> String {
    format!(
        "{} set {} private-key /dev/stdin",
        shell::WG_CMD,
        shellquote(name)
    )
}

pub fn build_set_listen_port_cmd(name: &str, port: u16) -> String {
    format!(
        "{} set {} listen-port {}",
        shell::WG_CMD,
        shellquote(name),
        port
    )
}

/// Build fwmark command; a mark of 0 turns it off
pub fn build_set_fwmark_cmd(name: &str, mark: u32) -> String {
    let mark = if mark == 0 {
        "off".to_string()
    } else {
        format!("0x{:x}", mark)
    };
    format!("{} set {} fwmark {}", shell::WG_CMD, shellquote(name), mark)
}

pub fn build_remove_peer_cmd(name: &str, public_key: &PublicKey) -> String {
    format!(
        "{} set {} peer {} remove",
        shell::WG_CMD,
        shellquote(name),
        shellquote(&public_key.to_base64())
    )
}

/// Build peer add/update command
///
/// `allowed-ips` replaces the whole set, keepalive and preshared key are
/// always stated so an update clears them when desired state has none.
/// When the peer has a preshared key it must be written to stdin.
pub fn build_set_peer_cmd(name: &str, peer: &Peer) -> String {
    let mut cmd = format!(
        "{} set {} peer {}",
        shell::WG_CMD,
        shellquote(name),
        shellquote(&peer.public_key.to_base64())
    );

    if let Some(endpoint) = &peer.endpoint {
        cmd.push_str(&format!(" endpoint {}", shellquote(&endpoint.to_string())));
    }

    let allowed_ips: Vec<String> = peer.allowed_ips.iter().map(|p| p.to_string()).collect();
    cmd.push_str(&format!(" allowed-ips {}", shellquote(&allowed_ips.join(","))));

    match peer.persistent_keepalive {
        Some(secs) => cmd.push_str(&format!(" persistent-keepalive {}", secs)),
        None => cmd.push_str(" persistent-keepalive off"),
    }

    if peer.preshared_key.is_some() {
        cmd.push_str(" preshared-key /dev/stdin");
    } else {
        cmd.push_str(" preshared-key /dev/null");
    }

    cmd
}

pub fn build_uci_show_cmd() -> String {
    format!("{} show network", shell::UCI_CMD)
}

/// Build `uci batch`; the script is written to stdin
pub fn build_uci_batch_cmd() -> String {
    format!("{} batch", shell::UCI_CMD)
}

pub fn build_uci_commit_cmd() -> String {
    format!("{} commit network", shell::UCI_CMD)
}

pub fn build_ifup_cmd(name: &str) -> String {
    format!("{} {}", shell::IFUP_CMD, shellquote(name))
}

pub fn build_ifdown_cmd(name: &str) -> String {
    format!("{} {}", shell::IFDOWN_CMD, shellquote(name))
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &str = "xTIBA5rboUvnH4htodjb6e697QjLERt1NAB4mZqp8Dg=";

    fn peer() -> Peer {
        Peer::new(
            KEY.parse().unwrap(),
            [
                "10.0.0.2/32".parse().unwrap(),
                "192.168.1.0/24".parse().unwrap(),
            ],
        )
    }

    #[test]
    fn test_build_add_link_cmd() {
        let cmd = build_add_link_cmd("wg0");
        assert!(cmd.contains("ip link add dev \"wg0\" type wireguard"));
    }

    #[test]
    fn test_build_del_link_cmd() {
        assert!(build_del_link_cmd("wg0").contains("ip link del dev \"wg0\""));
    }

    #[test]
    fn test_build_address_cmds() {
        let prefix: IpPrefix = "10.0.0.1/24".parse().unwrap();
        let cmd = build_add_address_cmd("wg0", &prefix);
        assert!(cmd.contains("ip address add \"10.0.0.1/24\" dev \"wg0\""));

        let cmd = build_del_address_cmd("wg0", &prefix);
        assert!(cmd.contains("ip address del \"10.0.0.1/24\""));
    }

    #[test]
    fn test_private_key_from_stdin() {
        let cmd = build_set_private_key_cmd("wg0");
        assert!(cmd.ends_with("set \"wg0\" private-key /dev/stdin"));
    }

    #[test]
    fn test_build_fwmark_cmd() {
        assert!(build_set_fwmark_cmd("wg0", 0x51820).ends_with("fwmark 0x51820"));
        assert!(build_set_fwmark_cmd("wg0", 0).ends_with("fwmark off"));
    }

    #[test]
    fn test_build_set_peer_cmd_minimal() {
        let cmd = build_set_peer_cmd("wg0", &peer());
        assert!(cmd.contains(&format!("peer \"{}\"", KEY)));
        assert!(cmd.contains("allowed-ips \"10.0.0.2/32,192.168.1.0/24\""));
        assert!(cmd.contains("persistent-keepalive off"));
        assert!(cmd.contains("preshared-key /dev/null"));
        assert!(!cmd.contains("endpoint"));
    }

    #[test]
    fn test_build_set_peer_cmd_full() {
        let peer = peer()
            .with_endpoint(Some("[fd00::7]:51820".parse().unwrap()))
            .with_keepalive(Some(25))
            .with_preshared_key(Some(KEY.parse().unwrap()));
        let cmd = build_set_peer_cmd("wg0", &peer);
        assert!(cmd.contains("endpoint \"[fd00::7]:51820\""));
        assert!(cmd.contains("persistent-keepalive 25"));
        assert!(cmd.contains("preshared-key /dev/stdin"));
    }

    #[test]
    fn test_build_remove_peer_cmd() {
        let cmd = build_remove_peer_cmd("wg0", &KEY.parse().unwrap());
        assert!(cmd.ends_with(&format!("peer \"{}\" remove", KEY)));
    }

    #[test]
    fn test_build_uci_cmds() {
        assert!(build_uci_show_cmd().ends_with("uci show network"));
        assert!(build_uci_batch_cmd().ends_with("uci batch"));
        assert!(build_uci_commit_cmd().ends_with("uci commit network"));
        assert!(build_ifup_cmd("wg0").ends_with("ifup \"wg0\""));
    }
}
